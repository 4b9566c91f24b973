//! Saga orchestration (C7): an ordered list of steps executed forward, with
//! reverse-order compensation on failure.
//!
//! There's no direct teacher analogue for this module; the state machine
//! shape follows the same "enumerated states + serialized transitions" idiom
//! as [`crate::circuit_breaker`]'s `Closed/Open/HalfOpen`, and event
//! emission reuses [`crate::telemetry::BrokerEvent`] rather than inventing a
//! parallel event type.

use crate::telemetry::BrokerEvent;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Compensating,
    Compensated,
    CompensationFailed,
}

/// One step in a saga. `data` is shared, mutable state threaded through every
/// step in both directions; steps mutate it in place rather than passing
/// results along a chain.
#[async_trait]
pub trait SagaStep<D: Send>: Send + Sync {
    /// Defaults to the step's type name; override for a friendlier label in
    /// events and error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn execute(&self, data: &mut D, cancellation: &CancellationToken) -> Result<(), String>;

    async fn compensate(&self, data: &mut D, cancellation: &CancellationToken) -> Result<(), String>;
}

/// Outcome of running a saga to completion (forward success, or failure
/// followed by compensation).
#[derive(Debug, Clone)]
pub struct SagaOutcome {
    pub status: SagaStatus,
    /// Names of steps that executed successfully, in execution order.
    pub history: Vec<String>,
    /// Steps that were compensated, in compensation (reverse) order.
    pub compensated: Vec<String>,
}

/// An ordered list of steps operating on shared data `D`.
pub struct Saga<D: Send> {
    id: String,
    steps: Vec<Arc<dyn SagaStep<D>>>,
}

impl<D: Send> Saga<D> {
    pub fn new(id: impl Into<String>, steps: Vec<Arc<dyn SagaStep<D>>>) -> Self {
        Self { id: id.into(), steps }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Runs every step in order. On failure at step `k`, compensates steps
    /// `k-1..=0` in reverse order; a compensation failure is recorded but
    /// does not stop the remaining compensations from running. `emit` is
    /// called with every lifecycle event as it happens (wire it to a
    /// `TelemetrySink` at the call site).
    pub async fn execute(
        &self,
        data: &mut D,
        cancellation: CancellationToken,
        emit: impl Fn(BrokerEvent) + Send + Sync,
    ) -> SagaOutcome {
        let started_at = Instant::now();
        emit(BrokerEvent::SagaStarted { saga_id: self.id.clone() });

        let mut history = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            if cancellation.is_cancelled() {
                return self
                    .compensate_from(data, index, history, "operation cancelled".to_string(), &emit)
                    .await;
            }

            match step.execute(data, &cancellation).await {
                Ok(()) => history.push(step.name().to_string()),
                Err(error) => {
                    return self.compensate_from(data, index, history, error, &emit).await;
                }
            }
        }

        let duration = started_at.elapsed();
        emit(BrokerEvent::SagaCompleted {
            saga_id: self.id.clone(),
            steps_executed: history.len(),
            duration,
        });

        SagaOutcome { status: SagaStatus::Completed, history, compensated: Vec::new() }
    }

    async fn compensate_from(
        &self,
        data: &mut D,
        failed_index: usize,
        history: Vec<String>,
        error: String,
        emit: &(impl Fn(BrokerEvent) + Send + Sync),
    ) -> SagaOutcome {
        let failed_step = self.steps[failed_index].name().to_string();
        emit(BrokerEvent::SagaFailed {
            saga_id: self.id.clone(),
            failed_step: failed_step.clone(),
            error: error.clone(),
            steps_executed_before_failure: history.len(),
        });

        let cancellation = CancellationToken::new();
        let mut compensated = Vec::new();
        let mut all_succeeded = true;

        for step in self.steps[..failed_index].iter().rev() {
            match step.compensate(data, &cancellation).await {
                Ok(()) => compensated.push(step.name().to_string()),
                Err(_) => all_succeeded = false,
            }
        }

        emit(BrokerEvent::SagaCompensated {
            saga_id: self.id.clone(),
            compensation_succeeded: all_succeeded,
            steps_compensated: compensated.len(),
            original_error: error,
        });

        let status = if all_succeeded { SagaStatus::Compensated } else { SagaStatus::CompensationFailed };
        SagaOutcome { status, history, compensated }
    }
}
