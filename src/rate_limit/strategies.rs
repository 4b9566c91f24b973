//! Token-bucket and sliding-window rate-limit algorithms.
//!
//! Both strategies share the same [`RateLimitStrategy`] contract and the same
//! optimistic compare-and-set discipline against a [`RateLimitStore`]: read
//! the current state, compute the next state, and commit conditioned on
//! nothing having changed in between. A lost race just means another caller
//! on the same key got there first; we re-read and try again.
//!
//! The per-key effective limit (capacity for token bucket, request count for
//! sliding window) is passed into `check` rather than fixed at construction,
//! so the caller can resolve per-tenant overrides before dispatching.

use super::store::{BucketState, RateLimitStore};
use super::RateLimitDecision;
use crate::clock::{Clock, MonotonicClock};
use crate::error::BrokerError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of optimistic-CAS attempts before a key is treated as too
/// contended and the caller is asked to back off briefly.
const MAX_CAS_ATTEMPTS: usize = 3;

#[async_trait]
pub trait RateLimitStrategy: Send + Sync {
    /// `limit` is the effective capacity (token bucket) or request count per
    /// window (sliding window) for this key, already resolved against any
    /// per-tenant override.
    async fn check(&self, key: &str, permits: u32, limit: f64) -> Result<RateLimitDecision, BrokerError>;
}

/// Refills at a fixed `rate` tokens/second; `limit` (passed per call) is the
/// bucket capacity, so bursts up to that capacity are permitted. A key with
/// no recorded state is treated as a full bucket.
pub struct TokenBucket<S: RateLimitStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    rate: f64,
}

impl<S: RateLimitStore> TokenBucket<S> {
    pub fn new(store: Arc<S>, rate: f64) -> Result<Self, BrokerError> {
        if rate <= 0.0 {
            return Err(BrokerError::invalid_configuration(
                "token bucket requires requests_per_second > 0",
            ));
        }
        Ok(Self {
            store,
            clock: Arc::new(MonotonicClock::default()),
            rate,
        })
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl<S: RateLimitStore> RateLimitStrategy for TokenBucket<S> {
    async fn check(&self, key: &str, permits: u32, limit: f64) -> Result<RateLimitDecision, BrokerError> {
        let cost = permits as f64;
        let now = self.clock.now_nanos();

        for _ in 0..MAX_CAS_ATTEMPTS {
            let expected = self
                .store
                .get_bucket(key)
                .await
                .map_err(|e| BrokerError::InvalidConfiguration(e.to_string()))?;
            let (current_tokens, last_refill_nanos) = match expected {
                Some(state) => (state.tokens, state.last_refill_nanos),
                None => (limit, now),
            };

            let elapsed_secs = now.saturating_sub(last_refill_nanos) as f64 / 1_000_000_000.0;
            let refilled = (current_tokens + elapsed_secs * self.rate).min(limit);

            if refilled >= cost {
                let next = BucketState {
                    tokens: refilled - cost,
                    last_refill_nanos: now,
                };
                let committed = self
                    .store
                    .compare_and_set_bucket(key, expected, next)
                    .await
                    .map_err(|e| BrokerError::InvalidConfiguration(e.to_string()))?;
                if committed {
                    return Ok(RateLimitDecision {
                        allowed: true,
                        remaining: Some(next.tokens.floor().max(0.0) as u64),
                        retry_after: None,
                        reset_at: None,
                    });
                }
                continue;
            }

            let missing = cost - refilled;
            let retry_after = Duration::from_secs_f64(missing / self.rate);
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: Some(0),
                retry_after: Some(retry_after),
                reset_at: Some(Instant::now() + retry_after),
            });
        }

        // Every attempt lost the race; the key is hot. Ask the caller to back
        // off briefly rather than spin indefinitely.
        Ok(RateLimitDecision {
            allowed: false,
            remaining: None,
            retry_after: Some(Duration::from_millis(50)),
            reset_at: None,
        })
    }
}

/// Window length `window`; `limit` (passed per call) is the maximum request
/// count inside that window. Drops timestamps older than `now - window`;
/// allows and records `now` if fewer than `limit` remain, otherwise rejects
/// with `retry_after` computed from the oldest surviving timestamp.
pub struct SlidingWindow<S: RateLimitStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    window: Duration,
}

impl<S: RateLimitStore> SlidingWindow<S> {
    pub fn new(store: Arc<S>, window: Duration) -> Result<Self, BrokerError> {
        if window.is_zero() {
            return Err(BrokerError::invalid_configuration(
                "sliding window requires window_size > 0",
            ));
        }
        Ok(Self {
            store,
            clock: Arc::new(MonotonicClock::default()),
            window,
        })
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }
}

#[async_trait]
impl<S: RateLimitStore> RateLimitStrategy for SlidingWindow<S> {
    async fn check(&self, key: &str, permits: u32, limit: f64) -> Result<RateLimitDecision, BrokerError> {
        let limit = limit.max(0.0) as usize;
        let window_nanos = self.window.as_nanos() as u64;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.now_nanos();
            let current = self
                .store
                .get_window(key)
                .await
                .map_err(|e| BrokerError::InvalidConfiguration(e.to_string()))?;
            let cutoff = now.saturating_sub(window_nanos);
            let retained: Vec<u64> = current.iter().copied().filter(|&ts| ts >= cutoff).collect();

            if retained.len() + permits as usize <= limit {
                let mut next = retained.clone();
                for _ in 0..permits {
                    next.push(now);
                }
                let committed = self
                    .store
                    .compare_and_set_window(key, current, next.clone())
                    .await
                    .map_err(|e| BrokerError::InvalidConfiguration(e.to_string()))?;
                if committed {
                    return Ok(RateLimitDecision {
                        allowed: true,
                        remaining: Some(limit.saturating_sub(next.len()) as u64),
                        retry_after: None,
                        reset_at: None,
                    });
                }
                continue;
            }

            let oldest = retained.iter().min().copied().unwrap_or(now);
            let retry_after_nanos = (oldest + window_nanos).saturating_sub(now);
            let retry_after = Duration::from_nanos(retry_after_nanos);
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: Some(0),
                retry_after: Some(retry_after),
                reset_at: Some(Instant::now() + retry_after),
            });
        }

        Ok(RateLimitDecision {
            allowed: false,
            remaining: None,
            retry_after: Some(Duration::from_millis(50)),
            reset_at: None,
        })
    }
}
