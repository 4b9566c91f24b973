//! The broker skeleton (C5): lifecycle state machine, subscription registry,
//! and the publish/subscribe pipeline wired through [`pipeline::Pipeline`],
//! [`crate::rate_limit::RateLimiter`], and [`crate::compression::CompressorRegistry`].
//!
//! Grounded in `src/circuit_breaker_registry.rs`'s "enumerated states behind a
//! mutex, handles cloned out to callers" shape, generalized from a registry of
//! named circuit breakers to a registry of named subscriptions.

pub mod pipeline;

use crate::backend::{
    effective_routing_key, BackendAdapter, DeliveryContext, HeaderValue, OutboundEnvelope,
    SubscribeHandler, SubscriptionOptions,
};
use crate::compression::CompressorRegistry;
use crate::config::BrokerOptions;
use crate::error::BrokerError;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::telemetry::{broker_metrics, names};
use futures::future::BoxFuture;
use pipeline::Pipeline;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// The broker's lifecycle. Transitions only move forward except that
/// `start()`/`stop()` are each idempotent at their own state.
///
/// ```text
/// Created --start()--> Starting --> Running --stop()--> Stopping --> Stopped
///    |                                 |                                |
///    +-------------------dispose()-----+----------------dispose()-------+
///                                      v
///                                  Disposed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
    Disposed,
}

/// Validates a message's JSON representation against a per-type contract
/// before it's serialized to bytes. Violations accumulate into a single
/// [`BrokerError::ValidationFailed`] rather than failing on the first one, so
/// a caller sees every problem in one round trip.
#[async_trait::async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, message_type: &str, value: &serde_json::Value) -> Vec<String>;
}

/// A registered subscription: enough to hand back to the caller and enough
/// for the broker to replay against the backend on demand.
struct Subscription {
    message_type: String,
    options: SubscriptionOptions,
}

/// The broker skeleton. Generic over the concrete [`BackendAdapter`] so each
/// backend crate (AMQP, Kafka, SQS/SNS, Service Bus, NATS, EventStore) plugs
/// in without the core depending on any one transport's crates.
pub struct Broker<A: BackendAdapter + 'static> {
    state: Mutex<BrokerState>,
    options: BrokerOptions,
    backend: Arc<A>,
    pipeline: Pipeline,
    rate_limiter: RateLimiter,
    compressors: CompressorRegistry,
    validator: Option<Arc<dyn Validator>>,
    subscriptions: Mutex<Vec<Subscription>>,
    /// Last circuit-breaker state reported to `relay.circuit_breaker.state`, as
    /// the numeric encoding `circuit_breaker::CircuitState` itself uses
    /// (0 = closed, 1 = open, 2 = half-open). `UpDownCounter` only supports
    /// deltas, so publishing has to diff against this rather than set a value.
    last_circuit_state: AtomicI64,
}

fn circuit_state_value(state: crate::circuit_breaker::CircuitState) -> i64 {
    match state {
        crate::circuit_breaker::CircuitState::Closed => 0,
        crate::circuit_breaker::CircuitState::Open => 1,
        crate::circuit_breaker::CircuitState::HalfOpen => 2,
    }
}

impl<A: BackendAdapter + 'static> Broker<A> {
    /// Validates `options`, builds the resilience pipeline and rate limiter
    /// from it, and wraps `backend`. Fails fast on a malformed configuration
    /// rather than deferring to the first `publish`/`subscribe` call.
    pub fn new(options: BrokerOptions, backend: A) -> Result<Self, BrokerError> {
        options.validate()?;

        let retry = RetryPolicy::builder()
            .max_attempts(options.retry_policy.max_attempts)
            .backoff(options.retry_policy.to_backoff())
            .build();

        let pipeline = Pipeline::builder()
            .circuit_breaker(options.circuit_breaker.clone())
            .retry(retry)
            .build()?;

        let rate_limiter = RateLimiter::new(options.rate_limit.clone())?;

        Ok(Self {
            state: Mutex::new(BrokerState::Created),
            options,
            backend: Arc::new(backend),
            pipeline,
            rate_limiter,
            compressors: CompressorRegistry::new(),
            validator: None,
            subscriptions: Mutex::new(Vec::new()),
            last_circuit_state: AtomicI64::new(0),
        })
    }

    /// Attaches a per-message-type contract validator, consulted at step 2 of
    /// [`Broker::publish`].
    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn state(&self) -> BrokerState {
        *self.state.lock().unwrap()
    }

    pub fn circuit_state(&self) -> crate::circuit_breaker::CircuitState {
        self.pipeline.circuit_state()
    }

    /// Starts the backend connection. A no-op when already `Running`; returns
    /// `Disposed` once the broker has been torn down.
    pub async fn start(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                BrokerState::Running => return Ok(()),
                BrokerState::Disposed => return Err(BrokerError::Disposed),
                _ => *state = BrokerState::Starting,
            }
        }

        self.backend.start_internal().await?;
        *self.state.lock().unwrap() = BrokerState::Running;
        broker_metrics().connections_active.add(1, &[]);
        Ok(())
    }

    /// Stops the backend connection. A no-op before `start()` has run;
    /// returns `Disposed` once the broker has been torn down. Safe to call
    /// more than once.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                BrokerState::Created | BrokerState::Stopped => return Ok(()),
                BrokerState::Disposed => return Err(BrokerError::Disposed),
                _ => *state = BrokerState::Stopping,
            }
        }

        self.backend.stop_internal().await?;
        *self.state.lock().unwrap() = BrokerState::Stopped;
        broker_metrics().connections_active.add(-1, &[]);
        Ok(())
    }

    /// Tears the broker down for good. Idempotent: a second call is a no-op.
    /// Stops the backend first if it was still running; failures from the
    /// backend's own stop/dispose calls are logged, not propagated, since
    /// disposal must still leave the broker in the `Disposed` state.
    pub async fn dispose(&self) -> Result<(), BrokerError> {
        let was_running = {
            let mut state = self.state.lock().unwrap();
            if *state == BrokerState::Disposed {
                return Ok(());
            }
            let was_running = *state == BrokerState::Running;
            *state = BrokerState::Disposed;
            was_running
        };

        if was_running {
            if let Err(err) = self.backend.stop_internal().await {
                tracing::warn!(error = %err, "backend stop_internal failed during dispose");
            }
            broker_metrics().connections_active.add(-1, &[]);
        }
        if let Err(err) = self.backend.dispose_internal().await {
            tracing::warn!(error = %err, "backend dispose_internal failed");
        }
        Ok(())
    }

    fn ensure_not_disposed(&self) -> Result<(), BrokerError> {
        if self.state() == BrokerState::Disposed {
            return Err(BrokerError::Disposed);
        }
        Ok(())
    }

    /// Publishes `message` under `message_type`, running it through the full
    /// pipeline:
    ///
    /// 1. Serialize to a JSON value.
    /// 2. Validate against the registered [`Validator`], if any.
    /// 3. Serialize the value to bytes.
    /// 4. Compress, if enabled and the payload clears `minimum_size` and
    ///    `message_type` isn't in `skip_types`.
    /// 5. Check the rate limiter.
    /// 6. Resolve the routing key (explicit override, else the configured
    ///    pattern) and apply FIFO group/deduplication semantics.
    /// 7. Run the backend call through the resilience pipeline (circuit
    ///    breaker, bulkhead, timeout, retry).
    /// 8. Record a tracing span and the publish metrics.
    #[tracing::instrument(skip(self, message, cancellation), fields(message_type = %message_type))]
    pub async fn publish<M>(
        &self,
        message: &M,
        message_type: &str,
        routing_key: Option<&str>,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError>
    where
        M: Serialize + Send + Sync,
    {
        self.ensure_not_disposed()?;
        let started = Instant::now();

        let value = serde_json::to_value(message).map_err(|e| BrokerError::InvalidData(e.to_string()))?;

        if let Some(validator) = &self.validator {
            let violations = validator.validate(message_type, &value).await;
            if !violations.is_empty() {
                return Err(BrokerError::ValidationFailed(violations));
            }
        }

        let mut bytes = serde_json::to_vec(&value).map_err(|e| BrokerError::InvalidData(e.to_string()))?;

        let compression = &self.options.compression;
        let mut compressed = false;
        if compression.enabled
            && bytes.len() >= compression.minimum_size
            && !compression.skip_types.contains(message_type)
        {
            bytes = self.compressors.compress(compression.algorithm, &bytes, compression.level)?;
            compressed = true;
        }
        let payload_size = bytes.len() as u64;

        let decision = self.rate_limiter.check(message_type).await?;
        if !decision.allowed {
            return Err(BrokerError::RateLimited {
                retry_after: decision.retry_after.unwrap_or_default(),
            });
        }

        let resolved_key =
            effective_routing_key(routing_key, &self.options.default_routing_key_pattern, message_type, message_type);

        let mut envelope = OutboundEnvelope::new(bytes);
        envelope.routing_key = Some(resolved_key);
        if compressed {
            envelope.headers.insert(
                "relay.compression.algorithm".to_string(),
                HeaderValue::Str(compression.algorithm.as_str().to_string()),
            );
        }

        let backend = self.backend.clone();
        let result = self
            .pipeline
            .execute(|| {
                let backend = backend.clone();
                let envelope = envelope.clone();
                let cancellation = cancellation.clone();
                async move { backend.publish_internal(envelope, cancellation).await }
            })
            .await;

        let duration = started.elapsed();
        let metrics = broker_metrics();
        metrics.payload_size.record(payload_size, &[]);
        metrics.publish_duration.record(duration.as_secs_f64(), &[]);

        let current_state = circuit_state_value(self.pipeline.circuit_state());
        let previous_state = self.last_circuit_state.swap(current_state, Ordering::SeqCst);
        if current_state != previous_state {
            metrics.circuit_breaker_state.add(current_state - previous_state, &[]);
        }

        match &result {
            Ok(()) => {
                metrics.messages_published.add(1, &[]);
                tracing::info!(
                    event = names::EVENT_MESSAGE_PUBLISHED,
                    compressed,
                    duration_ms = duration.as_millis() as u64,
                    "message published"
                );
            }
            Err(err) => {
                metrics.messages_failed.add(1, &[]);
                tracing::warn!(error = %err, message_type, "message publish failed");
            }
        }

        result
    }

    /// Registers a subscription and forwards it to the backend. `handler` is
    /// invoked by the backend per delivered message, outside any lock this
    /// broker holds: the registry mutex only ever guards the bookkeeping
    /// list, never a delivery in flight.
    pub async fn subscribe(
        &self,
        message_type: &str,
        options: SubscriptionOptions,
        handler: SubscribeHandler,
        cancellation: CancellationToken,
    ) -> Result<(), BrokerError> {
        self.ensure_not_disposed()?;
        if self.state() != BrokerState::Running {
            self.start().await?;
        }

        self.subscriptions.lock().unwrap().push(Subscription {
            message_type: message_type.to_string(),
            options: options.clone(),
        });
        broker_metrics().queue_size.add(1, &[]);

        let wrapped: SubscribeHandler = {
            let message_type = message_type.to_string();
            Arc::new(move |bytes: Vec<u8>, ctx: DeliveryContext, cancellation: CancellationToken| {
                let message_type = message_type.clone();
                let handler = handler.clone();
                let fut: BoxFuture<'static, Result<(), BrokerError>> = Box::pin(async move {
                    broker_metrics().messages_received.add(1, &[]);
                    tracing::debug!(event = names::EVENT_MESSAGE_RECEIVED, message_type, "message received");
                    let started = Instant::now();
                    let result = handler(bytes, ctx, cancellation).await;
                    broker_metrics()
                        .process_duration
                        .record(started.elapsed().as_secs_f64(), &[]);
                    result
                });
                fut
            })
        };

        self.backend.subscribe_internal(options, wrapped, cancellation).await
    }

    /// Subscriptions currently registered, for diagnostics/testing.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerType, LightweightOptions};
    use async_trait::async_trait;
    use serde::Serialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeBackend {
        published: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl BackendAdapter for FakeBackend {
        async fn start_internal(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn stop_internal(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn dispose_internal(&self) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn publish_internal(
            &self,
            _envelope: OutboundEnvelope,
            _cancellation: CancellationToken,
        ) -> Result<(), BrokerError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(BrokerError::TransportFailure("boom".into()));
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn subscribe_internal(
            &self,
            _options: SubscriptionOptions,
            handler: SubscribeHandler,
            cancellation: CancellationToken,
        ) -> Result<(), BrokerError> {
            handler(b"{}".to_vec(), DeliveryContext::new(Default::default(), None), cancellation).await
        }
    }

    #[derive(Serialize)]
    struct OrderCreated {
        order_id: String,
    }

    fn lightweight_options() -> BrokerOptions {
        let mut opts = BrokerOptions::default();
        opts.broker_type = BrokerType::Lightweight;
        opts.backend.lightweight = Some(LightweightOptions {
            servers: vec!["nats://localhost:4222".into()],
            ..Default::default()
        });
        opts
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_idempotent() {
        let broker = Broker::new(lightweight_options(), FakeBackend::default()).unwrap();
        assert_eq!(broker.state(), BrokerState::Created);

        broker.stop().await.unwrap();
        assert_eq!(broker.state(), BrokerState::Created);

        broker.start().await.unwrap();
        assert_eq!(broker.state(), BrokerState::Running);
        broker.start().await.unwrap();
        assert_eq!(broker.state(), BrokerState::Running);

        broker.stop().await.unwrap();
        assert_eq!(broker.state(), BrokerState::Stopped);
    }

    #[tokio::test]
    async fn dispose_is_safe_to_call_repeatedly_and_blocks_further_use() {
        let broker = Broker::new(lightweight_options(), FakeBackend::default()).unwrap();
        broker.start().await.unwrap();
        broker.dispose().await.unwrap();
        broker.dispose().await.unwrap();
        assert_eq!(broker.state(), BrokerState::Disposed);

        let err = broker
            .publish(&OrderCreated { order_id: "1".into() }, "OrderCreated", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Disposed));
    }

    #[tokio::test]
    async fn publish_round_trips_through_the_fake_backend() {
        let broker = Broker::new(lightweight_options(), FakeBackend::default()).unwrap();
        broker.start().await.unwrap();
        let result = broker
            .publish(&OrderCreated { order_id: "42".into() }, "OrderCreated", None, CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn publish_retries_a_transient_transport_failure() {
        let backend = FakeBackend::default();
        backend.fail_next.store(true, Ordering::SeqCst);
        let broker = Broker::new(lightweight_options(), backend).unwrap();
        broker.start().await.unwrap();
        let result = broker
            .publish(&OrderCreated { order_id: "7".into() }, "OrderCreated", None, CancellationToken::new())
            .await;
        assert!(result.is_ok());
    }

    struct RejectEverything;
    #[async_trait]
    impl Validator for RejectEverything {
        async fn validate(&self, _message_type: &str, _value: &serde_json::Value) -> Vec<String> {
            vec!["order_id must not be empty".to_string()]
        }
    }

    #[tokio::test]
    async fn validation_failure_short_circuits_before_the_backend() {
        let broker = Broker::new(lightweight_options(), FakeBackend::default())
            .unwrap()
            .with_validator(Arc::new(RejectEverything));
        broker.start().await.unwrap();
        let err = broker
            .publish(&OrderCreated { order_id: "".into() }, "OrderCreated", None, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::ValidationFailed(_)));
    }

    #[tokio::test]
    async fn subscribe_forwards_to_the_backend_and_invokes_handler() {
        let broker = Broker::new(lightweight_options(), FakeBackend::default()).unwrap();
        broker.start().await.unwrap();
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        let handler: SubscribeHandler = Arc::new(move |_bytes, _ctx, _cancel| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });

        broker
            .subscribe("OrderCreated", SubscriptionOptions::default(), handler, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(invoked.load(Ordering::SeqCst), 1);
        assert_eq!(broker.subscription_count(), 1);
    }
}
