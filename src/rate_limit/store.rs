//! Pluggable state store for rate limiter algorithms.
//!
//! Token bucket and sliding window both need per-key state that concurrent
//! callers converge on without a global lock. `RateLimitStore` expresses that
//! as an optimistic compare-and-set: callers read the current state, compute
//! the next state, and commit it conditioned on the previous value still
//! being current. A CAS failure means someone else raced ahead; the caller
//! retries with freshly read state.

use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Mutex;

/// Token-bucket state: fractional tokens remaining and the monotonic
/// nanosecond timestamp of the last refill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    pub tokens: f64,
    pub last_refill_nanos: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current state for `key`, or `None` if the key has never been touched
    /// (callers treat this as a full bucket / empty window).
    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>, Self::Error>;

    /// Commit `next` for `key`, conditioned on the stored state still being
    /// exactly `expected` (`None` meaning "still absent"). Returns `false` on
    /// a lost race; the caller re-reads and retries.
    async fn compare_and_set_bucket(
        &self,
        key: &str,
        expected: Option<BucketState>,
        next: BucketState,
    ) -> Result<bool, Self::Error>;

    /// Current sliding-window timestamps (nanoseconds) for `key`, oldest first.
    async fn get_window(&self, key: &str) -> Result<Vec<u64>, Self::Error>;

    /// Commit `next` for `key`, conditioned on the stored deque still being
    /// exactly `expected`.
    async fn compare_and_set_window(
        &self,
        key: &str,
        expected: Vec<u64>,
        next: Vec<u64>,
    ) -> Result<bool, Self::Error>;

    /// Drop all state for `key`. Used by the background cleanup task.
    async fn remove(&self, key: &str) -> Result<(), Self::Error>;

    /// Keys currently holding state, for `RateLimiterMetrics::active_keys`
    /// and for the cleanup task to enumerate candidates.
    async fn keys(&self) -> Result<Vec<String>, Self::Error>;
}

#[derive(Debug, Default)]
struct InMemoryState {
    buckets: HashMap<String, BucketState>,
    windows: HashMap<String, Vec<u64>>,
}

/// Default in-process store. Distributed deployments would implement
/// [`RateLimitStore`] against Redis or similar with the same CAS contract.
#[derive(Default)]
pub struct InMemoryRateLimitStore {
    state: Mutex<InMemoryState>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    type Error = Infallible;

    async fn get_bucket(&self, key: &str) -> Result<Option<BucketState>, Self::Error> {
        Ok(self.state.lock().unwrap().buckets.get(key).copied())
    }

    async fn compare_and_set_bucket(
        &self,
        key: &str,
        expected: Option<BucketState>,
        next: BucketState,
    ) -> Result<bool, Self::Error> {
        let mut state = self.state.lock().unwrap();
        if state.buckets.get(key).copied() != expected {
            return Ok(false);
        }
        state.buckets.insert(key.to_string(), next);
        Ok(true)
    }

    async fn get_window(&self, key: &str) -> Result<Vec<u64>, Self::Error> {
        Ok(self.state.lock().unwrap().windows.get(key).cloned().unwrap_or_default())
    }

    async fn compare_and_set_window(
        &self,
        key: &str,
        expected: Vec<u64>,
        next: Vec<u64>,
    ) -> Result<bool, Self::Error> {
        let mut state = self.state.lock().unwrap();
        let current = state.windows.get(key).cloned().unwrap_or_default();
        if current != expected {
            return Ok(false);
        }
        state.windows.insert(key.to_string(), next);
        Ok(true)
    }

    async fn remove(&self, key: &str) -> Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();
        state.buckets.remove(key);
        state.windows.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Self::Error> {
        let state = self.state.lock().unwrap();
        let mut keys: Vec<String> = state.buckets.keys().cloned().collect();
        keys.extend(state.windows.keys().cloned());
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
