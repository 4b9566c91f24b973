//! Ready-to-use [`Pipeline`] recipes for relay-broker.
//! Each function returns a fully-built `Pipeline` you can call `.execute()` on
//! around a backend call. The goal is pragmatic defaults that are safe for
//! production, not an exhaustive tuning guide.
//!
//! **Ladder:**
//! - Simple: [`retry_fast`], [`timeout_p95`], [`bulkhead_isolate`]
//! - Intermediate: [`api_guardrail`]
//! - Advanced: [`reliable_read`]
//! - Starter pack: [`sensible_defaults`]

use std::time::Duration;

use relay_broker::broker::pipeline::Pipeline;
use relay_broker::error::BrokerError;
use relay_broker::{Backoff, CircuitBreakerConfig, Jitter, RetryPolicy};

/// Simple, fast retry: 3 attempts, exponential backoff starting at 50ms, full jitter.
/// No circuit breaker beyond the default, generous bulkhead, 30s timeout.
pub fn retry_fast() -> Result<Pipeline, BrokerError> {
    Pipeline::builder()
        .retry(
            RetryPolicy::builder()
                .max_attempts(3)
                .backoff(Backoff::exponential(Duration::from_millis(50), 2.0))
                .with_jitter(Jitter::full())
                .build(),
        )
        .build()
}

/// Latency guard: 95th percentile focused timeout at 300ms, no retry beyond the default.
pub fn timeout_p95() -> Result<Pipeline, BrokerError> {
    Pipeline::builder().timeout(Duration::from_millis(300)).build()
}

/// Bulkhead for noisy neighbors: cap at `max_in_flight` concurrent calls.
pub fn bulkhead_isolate(max_in_flight: usize) -> Result<Pipeline, BrokerError> {
    Pipeline::builder().bulkhead(max_in_flight).build()
}

/// Circuit breaker tuned for flapping services: opens after 5 failures, needs
/// 3 consecutive successes in the half-open state to close, waits 5s before probing.
pub fn circuit_flap_guard() -> Result<Pipeline, BrokerError> {
    let config = CircuitBreakerConfig {
        failure_threshold: 5,
        success_threshold: 3,
        timeout: Duration::from_secs(5),
        ..CircuitBreakerConfig::default()
    };
    Pipeline::builder().circuit_breaker(config).build()
}

/// Reliable read: tight timeout, a handful of quick retries, and a breaker
/// tuned to stop hammering a service once it's clearly down.
pub fn reliable_read() -> Result<Pipeline, BrokerError> {
    let config = CircuitBreakerConfig {
        failure_threshold: 8,
        success_threshold: 3,
        timeout: Duration::from_secs(10),
        ..CircuitBreakerConfig::default()
    };
    Pipeline::builder()
        .timeout(Duration::from_secs(2))
        .circuit_breaker(config)
        .retry(
            RetryPolicy::builder()
                .max_attempts(5)
                .backoff(Backoff::exponential(Duration::from_millis(150), 2.0))
                .with_jitter(Jitter::full())
                .build(),
        )
        .build()
}

/// API guardrail: bulkhead + circuit breaker + timeout, for external calls
/// where a slow or misbehaving dependency should never take the whole
/// service down with it.
pub fn api_guardrail() -> Result<Pipeline, BrokerError> {
    let config = CircuitBreakerConfig { failure_threshold: 5, timeout: Duration::from_secs(5), ..CircuitBreakerConfig::default() };
    Pipeline::builder()
        .timeout(Duration::from_secs(1))
        .bulkhead(64)
        .circuit_breaker(config)
        .build()
}

/// Low-risk default: timeout + retry + bulkhead. Good starting point for most I/O.
pub fn sensible_defaults(max_in_flight: usize) -> Result<Pipeline, BrokerError> {
    Pipeline::builder()
        .timeout(Duration::from_millis(750))
        .bulkhead(max_in_flight)
        .retry(
            RetryPolicy::builder()
                .max_attempts(3)
                .backoff(Backoff::exponential(Duration::from_millis(100), 2.0))
                .with_jitter(Jitter::full())
                .build(),
        )
        .build()
}
