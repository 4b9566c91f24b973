//! Convenient re-exports for common `relay-broker` types.
pub use crate::{
    backend::{
        BackendAdapter, DeliveryContext, HeaderValue, Headers, OutboundEnvelope, SubscribeHandler,
        SubscriptionOptions,
    },
    backoff::Backoff,
    broker::{
        pipeline::{Pipeline, PipelineBuilder},
        Broker, BrokerState, Validator,
    },
    bulkhead::BulkheadPolicy,
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitBreakerPolicy, CircuitState},
    clock::{Clock, MonotonicClock},
    compression::{Algorithm, CompressorRegistry},
    config::{BrokerOptions, BrokerType},
    error::BrokerError,
    jitter::Jitter,
    rate_limit::{RateLimitAlgorithm, RateLimitConfig, RateLimiter},
    retry::{RetryPolicy, RetryPolicyBuilder},
    saga::{Saga, SagaOutcome, SagaStatus, SagaStep},
    telemetry::{
        BrokerEvent, FallbackSink, LogSink, MemorySink, MulticastSink, NullSink, PolicyEvent,
        StreamingSink, TelemetrySink,
    },
    timeout::{TimeoutError, TimeoutPolicy, MAX_TIMEOUT},
};
