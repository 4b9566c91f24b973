//! Backend-call composition: `retry(breaker(bulkhead(timeout(call))))`.
//!
//! Folded in from `stack.rs`'s `ResilienceStack<E>`/`ResilienceStackBuilder<E>`,
//! generalized to operate on the concrete [`BrokerError`] directly instead of a
//! generic backend error type, since every backend adapter already speaks
//! `BrokerError` at the [`crate::backend::BackendAdapter`] seam.

use crate::bulkhead::BulkheadPolicy;
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerPolicy, CircuitState};
use crate::error::BrokerError;
use crate::retry::RetryPolicy;
use crate::timeout::TimeoutPolicy;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One backend call's worth of resilience wrapping. Cheap to clone: every
/// field is itself a cheaply-cloneable handle (atomics, a semaphore `Arc`, or
/// a plain value).
#[derive(Clone)]
pub struct Pipeline {
    timeout: TimeoutPolicy,
    bulkhead: BulkheadPolicy,
    circuit_breaker: CircuitBreakerPolicy,
    retry: RetryPolicy,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn circuit_metrics(&self) -> CircuitBreakerMetrics {
        self.circuit_breaker.metrics()
    }

    /// Runs `operation` through the full stack. `operation` is called at
    /// most `retry`'s `max_attempts` times; each attempt is subject to the
    /// bulkhead's concurrency bound and the timeout's per-attempt deadline,
    /// and the whole attempt is gated by the circuit breaker.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, BrokerError>
    where
        T: Send,
        Fut: Future<Output = Result<T, BrokerError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let op_cell = Arc::new(Mutex::new(operation));

        self.retry
            .execute(|| {
                let op = op_cell.clone();
                let circuit_breaker = self.circuit_breaker.clone();
                let bulkhead = self.bulkhead.clone();
                let timeout = self.timeout;

                async move {
                    circuit_breaker
                        .execute(|| {
                            let op = op.clone();
                            let bulkhead = bulkhead.clone();
                            async move {
                                bulkhead
                                    .execute(|| {
                                        let op = op.clone();
                                        async move {
                                            timeout
                                                .execute(|| {
                                                    let mut op = op.lock().unwrap();
                                                    op()
                                                })
                                                .await
                                        }
                                    })
                                    .await
                            }
                        })
                        .await
                }
            })
            .await
    }
}

pub struct PipelineBuilder {
    timeout: Duration,
    bulkhead: usize,
    circuit_breaker: CircuitBreakerConfig,
    retry: Option<RetryPolicy>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            bulkhead: 100,
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: None,
        }
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = duration;
        self
    }

    pub fn bulkhead(mut self, max_concurrent: usize) -> Self {
        self.bulkhead = max_concurrent;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn build(self) -> Result<Pipeline, BrokerError> {
        let timeout = TimeoutPolicy::new(self.timeout)
            .map_err(|e| BrokerError::invalid_configuration(e.to_string()))?;

        Ok(Pipeline {
            timeout,
            bulkhead: BulkheadPolicy::new(self.bulkhead),
            circuit_breaker: CircuitBreakerPolicy::with_config(self.circuit_breaker),
            retry: self.retry.unwrap_or_else(|| RetryPolicy::builder().build()),
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
