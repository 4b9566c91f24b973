//! Unified error type for the broker core and its backend adapters.

use std::time::Duration;
use thiserror::Error;

/// The single error type returned by every public broker operation.
///
/// Kinds follow the reliability pipeline: configuration and argument errors
/// never retry, transport failures retry up to the policy's `max_attempts`,
/// and `RateLimited`/`CircuitOpen` short-circuit the backend call entirely.
#[derive(Debug, Error, Clone)]
pub enum BrokerError {
    /// A caller-supplied argument was empty, out of range, or otherwise malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A required backend option was missing or invalid. The message names the
    /// offending option or backend (e.g. "DefaultQueueUrl is required for consuming messages.").
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Contract validation against a per-type schema accumulated one or more violations.
    #[error("validation failed: {0:?}")]
    ValidationFailed(Vec<String>),

    /// The rate limiter rejected the call. Carries how long the caller should wait.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The circuit breaker is open and rejected the call without invoking the backend.
    #[error("circuit open ({failure_count} failures, open for {open_duration:?})")]
    CircuitOpen {
        failure_count: usize,
        open_duration: Duration,
    },

    /// The backend I/O call failed. Retriable per the active retry policy.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// All retry attempts were exhausted.
    #[error("retry exhausted after {attempts} attempts, last error: {last}")]
    RetryExhausted { attempts: usize, last: String },

    /// The operation was cancelled before it completed. Never counted as a
    /// circuit-breaker failure and never retried.
    #[error("operation cancelled")]
    Cancelled,

    /// Bytes did not conform to the expected wire format (bad compression magic,
    /// malformed JSON, etc.).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// The broker (or a resource it owns) has already been disposed.
    #[error("broker disposed")]
    Disposed,
}

impl BrokerError {
    pub fn invalid_argument(field: impl Into<String>) -> Self {
        Self::InvalidArgument(field.into())
    }

    pub fn invalid_configuration(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Whether the retry engine should treat this error as retriable.
    ///
    /// `InvalidArgument`, `InvalidConfiguration`, `ValidationFailed`, `RateLimited`,
    /// `CircuitOpen`, `Cancelled`, and `Disposed` are never retried: they are either
    /// caller mistakes or already-applied backpressure decisions. `TransportFailure`
    /// is the only retriable kind.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, Self::RetryExhausted { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failure_is_retriable() {
        let err = BrokerError::TransportFailure("connection reset".into());
        assert!(err.is_retriable());
    }

    #[test]
    fn invalid_configuration_is_not_retriable() {
        let err =
            BrokerError::invalid_configuration("DefaultQueueUrl is required for consuming messages.");
        assert!(!err.is_retriable());
        assert_eq!(
            err.to_string(),
            "invalid configuration: DefaultQueueUrl is required for consuming messages."
        );
    }

    #[test]
    fn cancelled_is_not_retriable_and_flagged() {
        let err = BrokerError::Cancelled;
        assert!(!err.is_retriable());
        assert!(err.is_cancelled());
    }

    #[test]
    fn circuit_open_predicate() {
        let err = BrokerError::CircuitOpen {
            failure_count: 5,
            open_duration: Duration::from_secs(1),
        };
        assert!(err.is_circuit_open());
        assert!(!err.is_retriable());
    }
}
