//! Rate limiting: token-bucket and sliding-window algorithms behind a common
//! contract, keyed globally or per tenant, backed by a pluggable
//! compare-and-set store with a background task that reclaims idle keys.

pub mod store;
pub mod strategies;

use crate::clock::{Clock, MonotonicClock};
use crate::error::BrokerError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use store::{InMemoryRateLimitStore, RateLimitStore};
use strategies::{RateLimitStrategy, SlidingWindow, TokenBucket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of a single rate-limit check.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Permits left in the bucket/window after this check, when known.
    pub remaining: Option<u64>,
    /// How long the caller should wait before retrying, when denied.
    pub retry_after: Option<Duration>,
    /// When the limit is expected to have recovered, when known.
    pub reset_at: Option<Instant>,
}

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterMetrics {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub rejected_requests: u64,
    /// Allowed requests per second since construction.
    pub current_rate: f64,
    pub active_keys: usize,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    total_requests: AtomicU64,
    allowed_requests: AtomicU64,
    rejected_requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
}

/// Construction options. Invalid combinations surface as
/// `BrokerError::InvalidConfiguration` from [`RateLimiter::new`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub algorithm: RateLimitAlgorithm,
    /// Sustained request rate. Governs token-bucket refill directly; for
    /// sliding window it is converted to a request count over `window_size`.
    pub requests_per_second: f64,
    /// Token-bucket burst capacity. Unused by sliding window.
    pub bucket_capacity: f64,
    /// Sliding-window length. Unused by token bucket.
    pub window_size: Duration,
    pub enable_per_tenant_limits: bool,
    /// Requests/second applied to a tenant absent from `tenant_limits`.
    pub default_tenant_limit: f64,
    pub tenant_limits: HashMap<String, f64>,
    /// How long a key may sit idle before the background task reclaims it.
    pub cleanup_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: RateLimitAlgorithm::TokenBucket,
            requests_per_second: 100.0,
            bucket_capacity: 100.0,
            window_size: Duration::from_secs(1),
            enable_per_tenant_limits: false,
            default_tenant_limit: 100.0,
            tenant_limits: HashMap::new(),
            cleanup_interval: Duration::from_secs(300),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), BrokerError> {
        if self.requests_per_second <= 0.0 {
            return Err(BrokerError::invalid_configuration(
                "rate limiter requires requests_per_second > 0",
            ));
        }
        if matches!(self.algorithm, RateLimitAlgorithm::TokenBucket) && self.bucket_capacity <= 0.0 {
            return Err(BrokerError::invalid_configuration(
                "token bucket rate limiter requires bucket_capacity > 0",
            ));
        }
        if matches!(self.algorithm, RateLimitAlgorithm::SlidingWindow) && self.window_size.is_zero() {
            return Err(BrokerError::invalid_configuration(
                "sliding window rate limiter requires window_size > 0",
            ));
        }
        if self.enable_per_tenant_limits && self.default_tenant_limit <= 0.0 {
            return Err(BrokerError::invalid_configuration(
                "rate limiter requires default_tenant_limit > 0 when per-tenant limits are enabled",
            ));
        }
        Ok(())
    }
}

/// Reserved key used when per-tenant limits are disabled and every caller
/// shares a single bucket/window.
const GLOBAL_KEY: &str = "__global__";

enum Strategy<S: RateLimitStore> {
    TokenBucket(TokenBucket<S>),
    SlidingWindow(SlidingWindow<S>),
}

impl<S: RateLimitStore> Strategy<S> {
    async fn check(&self, key: &str, permits: u32, limit: f64) -> Result<RateLimitDecision, BrokerError> {
        match self {
            Strategy::TokenBucket(s) => s.check(key, permits, limit).await,
            Strategy::SlidingWindow(s) => s.check(key, permits, limit).await,
        }
    }
}

/// Global or per-tenant rate limiter. Disposable: drop or call
/// [`RateLimiter::shutdown`] to stop the background cleanup task.
pub struct RateLimiter<S: RateLimitStore + 'static = InMemoryRateLimitStore> {
    config: RateLimitConfig,
    store: Arc<S>,
    strategy: Strategy<S>,
    clock: Arc<dyn Clock>,
    counters: Arc<MetricsCounters>,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    cleanup_handle: Option<JoinHandle<()>>,
}

impl RateLimiter<InMemoryRateLimitStore> {
    pub fn new(config: RateLimitConfig) -> Result<Self, BrokerError> {
        Self::with_store(config, Arc::new(InMemoryRateLimitStore::new()))
    }
}

impl<S: RateLimitStore + 'static> RateLimiter<S> {
    pub fn with_store(config: RateLimitConfig, store: Arc<S>) -> Result<Self, BrokerError> {
        config.validate()?;

        let strategy = match config.algorithm {
            RateLimitAlgorithm::TokenBucket => {
                Strategy::TokenBucket(TokenBucket::new(store.clone(), config.requests_per_second)?)
            }
            RateLimitAlgorithm::SlidingWindow => {
                Strategy::SlidingWindow(SlidingWindow::new(store.clone(), config.window_size)?)
            }
        };

        let counters = Arc::new(MetricsCounters::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let cleanup_handle = spawn_cleanup_task(store.clone(), config.cleanup_interval, shutdown_rx);

        Ok(Self {
            config,
            store,
            strategy,
            clock: Arc::new(MonotonicClock::default()),
            counters,
            started_at: Instant::now(),
            shutdown_tx,
            cleanup_handle: Some(cleanup_handle),
        })
    }

    /// Check a single permit against `key`'s limit.
    pub async fn check(&self, key: &str) -> Result<RateLimitDecision, BrokerError> {
        self.check_n(key, 1).await
    }

    pub async fn check_n(&self, key: &str, permits: u32) -> Result<RateLimitDecision, BrokerError> {
        if key.is_empty() {
            return Err(BrokerError::invalid_argument("rate limit key must not be empty"));
        }

        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        if !self.config.enabled {
            self.counters.allowed_requests.fetch_add(1, Ordering::Relaxed);
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: None,
                retry_after: None,
                reset_at: None,
            });
        }

        let (resolved_key, limit) = self.resolve(key);
        let decision = self.strategy.check(resolved_key, permits, limit).await?;

        if decision.allowed {
            self.counters.allowed_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.rejected_requests.fetch_add(1, Ordering::Relaxed);
        }
        Ok(decision)
    }

    fn resolve<'a>(&'a self, key: &'a str) -> (&'a str, f64) {
        if !self.config.enable_per_tenant_limits {
            let limit = match self.config.algorithm {
                RateLimitAlgorithm::TokenBucket => self.config.bucket_capacity,
                RateLimitAlgorithm::SlidingWindow => {
                    self.config.requests_per_second * self.config.window_size.as_secs_f64()
                }
            };
            return (GLOBAL_KEY, limit);
        }

        let per_second = self
            .config
            .tenant_limits
            .get(key)
            .copied()
            .unwrap_or(self.config.default_tenant_limit);
        let limit = match self.config.algorithm {
            RateLimitAlgorithm::TokenBucket => per_second,
            RateLimitAlgorithm::SlidingWindow => per_second * self.config.window_size.as_secs_f64(),
        };
        (key, limit)
    }

    pub async fn metrics(&self) -> RateLimiterMetrics {
        let elapsed = self.clock_elapsed_secs();
        let allowed = self.counters.allowed_requests.load(Ordering::Relaxed);
        let active_keys = self.store.keys().await.map(|keys| keys.len()).unwrap_or(0);
        RateLimiterMetrics {
            total_requests: self.counters.total_requests.load(Ordering::Relaxed),
            allowed_requests: allowed,
            rejected_requests: self.counters.rejected_requests.load(Ordering::Relaxed),
            current_rate: if elapsed > 0.0 { allowed as f64 / elapsed } else { 0.0 },
            active_keys,
        }
    }

    fn clock_elapsed_secs(&self) -> f64 {
        let _ = &self.clock;
        self.started_at.elapsed().as_secs_f64()
    }

    /// Stop the background cleanup task and wait for it to exit.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.cleanup_handle.take() {
            let _ = handle.await;
        }
    }
}

impl<S: RateLimitStore + 'static> Drop for RateLimiter<S> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.cleanup_handle.take() {
            handle.abort();
        }
    }
}

fn spawn_cleanup_task<S: RateLimitStore + 'static>(
    store: Arc<S>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if let Ok(keys) = store.keys().await {
                        for key in keys {
                            reclaim_if_idle(&store, &key, interval).await;
                        }
                    }
                }
            }
        }
    })
}

async fn reclaim_if_idle<S: RateLimitStore>(store: &Arc<S>, key: &str, idle_after: Duration) {
    let clock = MonotonicClock::default();
    let now = clock.now_nanos();
    let idle_nanos = idle_after.as_nanos() as u64;

    let bucket_idle = match store.get_bucket(key).await {
        Ok(Some(state)) => now.saturating_sub(state.last_refill_nanos) >= idle_nanos,
        Ok(None) => true,
        Err(_) => false,
    };
    let window_idle = match store.get_window(key).await {
        Ok(timestamps) => timestamps.iter().all(|&ts| now.saturating_sub(ts) >= idle_nanos),
        Err(_) => false,
    };

    if bucket_idle && window_idle {
        let _ = store.remove(key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_key_is_invalid_argument() {
        let limiter = RateLimiter::new(RateLimitConfig::default()).unwrap();
        let err = limiter.check("").await.unwrap_err();
        assert!(matches!(err, BrokerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn non_positive_rate_is_invalid_configuration() {
        let config = RateLimitConfig {
            requests_per_second: 0.0,
            ..RateLimitConfig::default()
        };
        let err = RateLimiter::new(config).unwrap_err();
        assert!(matches!(err, BrokerError::InvalidConfiguration(_)));
    }

    #[tokio::test]
    async fn disabled_limiter_always_allows() {
        let config = RateLimitConfig {
            enabled: false,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config).unwrap();
        for _ in 0..10 {
            assert!(limiter.check("anything").await.unwrap().allowed);
        }
    }

    #[tokio::test]
    async fn global_key_shared_across_callers_without_per_tenant() {
        let config = RateLimitConfig {
            bucket_capacity: 1.0,
            requests_per_second: 1.0,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config).unwrap();
        assert!(limiter.check("tenant-a").await.unwrap().allowed);
        // Same global bucket, so a different caller key is still denied.
        assert!(!limiter.check("tenant-b").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn per_tenant_limits_are_independent() {
        let mut tenant_limits = HashMap::new();
        tenant_limits.insert("big".to_string(), 5.0);
        let config = RateLimitConfig {
            enable_per_tenant_limits: true,
            default_tenant_limit: 1.0,
            tenant_limits,
            requests_per_second: 1.0,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config).unwrap();

        assert!(limiter.check("small").await.unwrap().allowed);
        assert!(!limiter.check("small").await.unwrap().allowed);

        for _ in 0..5 {
            assert!(limiter.check("big").await.unwrap().allowed);
        }
        assert!(!limiter.check("big").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn metrics_reflect_allowed_and_rejected_counts() {
        let config = RateLimitConfig {
            bucket_capacity: 2.0,
            requests_per_second: 1.0,
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config).unwrap();
        let _ = limiter.check("k").await.unwrap();
        let _ = limiter.check("k").await.unwrap();
        let _ = limiter.check("k").await.unwrap();

        let metrics = limiter.metrics().await;
        assert_eq!(metrics.total_requests, 3);
        assert_eq!(metrics.allowed_requests, 2);
        assert_eq!(metrics.rejected_requests, 1);
        assert_eq!(metrics.active_keys, 1);
    }

    #[tokio::test]
    async fn sliding_window_algorithm_end_to_end() {
        let config = RateLimitConfig {
            algorithm: RateLimitAlgorithm::SlidingWindow,
            requests_per_second: 2.0,
            window_size: Duration::from_secs(1),
            ..RateLimitConfig::default()
        };
        let limiter = RateLimiter::new(config).unwrap();
        assert!(limiter.check("k").await.unwrap().allowed);
        assert!(limiter.check("k").await.unwrap().allowed);
        assert!(!limiter.check("k").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn shutdown_stops_cleanup_task() {
        let mut limiter = RateLimiter::new(RateLimitConfig::default()).unwrap();
        limiter.shutdown().await;
        assert!(limiter.cleanup_handle.is_none());
    }
}
