//! Circuit breaker implementation with lock-free state transitions
//!
//! The state tuple (`state`, `opened_at`, the half-open admission counter) is
//! managed with atomic CAS loops so the hot path never takes a broad mutex.
//! The rolling outcome window used for failure-rate evaluation is secondary
//! bookkeeping and lives behind a small mutex, matching the scope of what
//! actually needs serializing.

use crate::clock::{Clock, MonotonicClock};
use crate::error::BrokerError;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state byte"),
        }
    }
}

#[derive(Clone, Debug)]
#[cfg_attr(feature = "config-serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CircuitBreakerConfig {
    /// When `false`, the breaker is bypassed entirely: every call is admitted
    /// and no outcome is recorded.
    pub enabled: bool,
    /// Consecutive failures (regardless of window/minimum_throughput) that
    /// trip the breaker open.
    pub failure_threshold: usize,
    /// Consecutive successful probes required in `HalfOpen` to close.
    pub success_threshold: usize,
    /// Time spent in `Open` before a probe is admitted.
    pub timeout: Duration,
    /// Failure fraction (0..1) within the rolling window that trips the
    /// breaker open, once `minimum_throughput` samples are present.
    pub failure_rate_threshold: f64,
    /// Samples required in the window before `failure_rate_threshold` is
    /// evaluated.
    pub minimum_throughput: usize,
    /// A call slower than this is tracked as a slow call.
    pub slow_call_duration: Duration,
    /// Once this many slow calls have accumulated in the window, further
    /// slow calls are counted as failures.
    pub slow_call_threshold: usize,
    /// Concurrent probes admitted while `HalfOpen`.
    pub half_open_max_calls: usize,
    /// Capacity of the rolling outcome window.
    pub window_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 1,
            timeout: Duration::from_secs(30),
            failure_rate_threshold: 1.0,
            minimum_throughput: usize::MAX,
            slow_call_duration: Duration::from_secs(60),
            slow_call_threshold: usize::MAX,
            half_open_max_calls: 1,
            window_size: 100,
        }
    }
}

impl CircuitBreakerConfig {
    /// A breaker that never opens, used where circuit breaking is turned off
    /// but the call site still wants the same `execute` shape.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

struct Window {
    outcomes: VecDeque<bool>,
    slow_calls: usize,
    capacity: usize,
}

impl Window {
    fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity.min(1024)),
            slow_calls: 0,
            capacity,
        }
    }

    fn push(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.capacity {
            self.outcomes.pop_front();
        }
    }

    fn failure_rate(&self) -> (usize, f64) {
        let total = self.outcomes.len();
        if total == 0 {
            return (0, 0.0);
        }
        let failed = self.outcomes.iter().filter(|ok| !**ok).count();
        (total, failed as f64 / total as f64)
    }

    fn reset(&mut self) {
        self.outcomes.clear();
        self.slow_calls = 0;
    }
}

struct CircuitBreakerState {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    half_open_successes: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
    successful_calls: AtomicUsize,
    failed_calls: AtomicUsize,
    rejected_calls: AtomicUsize,
    window: Mutex<Window>,
}

/// Point-in-time counters exposed for observability and tests.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    pub successful_calls: usize,
    pub failed_calls: usize,
    pub rejected_calls: usize,
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: usize, timeout: Duration) -> Self {
        Self::with_config(CircuitBreakerConfig {
            failure_threshold,
            timeout,
            ..CircuitBreakerConfig::default()
        })
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState {
                state: AtomicU8::new(STATE_CLOSED),
                consecutive_failures: AtomicUsize::new(0),
                half_open_successes: AtomicUsize::new(0),
                opened_at_millis: AtomicU64::new(0),
                half_open_calls: AtomicUsize::new(0),
                successful_calls: AtomicUsize::new(0),
                failed_calls: AtomicUsize::new(0),
                rejected_calls: AtomicUsize::new(0),
                window: Mutex::new(Window::new(config.window_size.max(1))),
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.state.load(Ordering::Acquire))
    }

    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            state: self.state(),
            successful_calls: self.state.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.state.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.state.rejected_calls.load(Ordering::Relaxed),
        }
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, BrokerError>
    where
        T: Send,
        Fut: Future<Output = Result<T, BrokerError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if !self.config.enabled {
            return operation().await;
        }

        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("circuit breaker -> half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                self.state.half_open_successes.store(0, Ordering::Release);
                                break;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => break,
                            Err(_) => unreachable!("invalid state transition"),
                        }
                    } else {
                        self.state.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        return Err(BrokerError::CircuitOpen {
                            failure_count: self.state.consecutive_failures.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(elapsed),
                        });
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        self.state.rejected_calls.fetch_add(1, Ordering::Relaxed);
                        return Err(BrokerError::CircuitOpen {
                            failure_count: self.state.consecutive_failures.load(Ordering::Acquire),
                            open_duration: Duration::from_millis(0),
                        });
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "circuit breaker: half-open probe"
                    );
                    break;
                }
                STATE_CLOSED => break,
                _ => unreachable!("invalid circuit breaker state"),
            }
        }

        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        let started = Instant::now();
        let result = operation().await;
        let elapsed = started.elapsed();

        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }

        if let Err(e) = &result {
            if e.is_cancelled() {
                // Cancellation is never recorded as a breaker failure.
                return result;
            }
        }

        let is_slow = elapsed >= self.config.slow_call_duration;
        match &result {
            Ok(_) => self.on_success(was_half_open, is_slow),
            Err(_) => self.on_failure(was_half_open),
        }

        result
    }

    fn on_success(&self, was_half_open: bool, is_slow: bool) {
        let counts_as_failure = self.record_outcome(!is_slow);

        if counts_as_failure {
            self.on_failure(was_half_open);
            return;
        }

        self.state.successful_calls.fetch_add(1, Ordering::Relaxed);
        self.state.consecutive_failures.store(0, Ordering::Release);

        if was_half_open {
            let successes = self.state.half_open_successes.fetch_add(1, Ordering::AcqRel) + 1;
            if successes >= self.config.success_threshold {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    self.state.half_open_successes.store(0, Ordering::Release);
                    self.reset_window();
                    tracing::info!("circuit breaker -> closed");
                }
            }
        }
    }

    fn on_failure(&self, was_half_open: bool) {
        self.state.failed_calls.fetch_add(1, Ordering::Relaxed);
        let consecutive = self.state.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;

        if was_half_open {
            if self
                .state
                .state
                .compare_exchange(
                    STATE_HALF_OPEN,
                    STATE_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.state
                    .opened_at_millis
                    .store(self.now_millis(), Ordering::Release);
                self.state.half_open_successes.store(0, Ordering::Release);
                tracing::warn!(consecutive, "circuit breaker: probe failed -> open");
            }
            return;
        }

        let current = self.state.state.load(Ordering::Acquire);
        if current != STATE_CLOSED {
            return;
        }

        let (total, rate) = {
            let mut window = self.state.window.lock().expect("window mutex poisoned");
            window.push(false);
            window.failure_rate()
        };
        let rate_tripped = total >= self.config.minimum_throughput
            && rate >= self.config.failure_rate_threshold;

        if consecutive >= self.config.failure_threshold || rate_tripped {
            if self
                .state
                .state
                .compare_exchange(
                    STATE_CLOSED,
                    STATE_OPEN,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                self.state
                    .opened_at_millis
                    .store(self.now_millis(), Ordering::Release);
                tracing::error!(
                    consecutive,
                    threshold = self.config.failure_threshold,
                    failure_rate = rate,
                    "circuit breaker -> open"
                );
            }
        }
    }

    /// Records a raw success/failure outcome in the rolling window. Returns
    /// `true` if this was a slow success that should now be promoted to a
    /// failure because `slow_call_threshold` slow calls have accumulated.
    fn record_outcome(&self, success: bool) -> bool {
        let mut window = self.state.window.lock().expect("window mutex poisoned");
        if success {
            window.push(true);
            return false;
        }

        // `success == false` here only ever arrives via the slow-call path;
        // genuine operation failures go through `on_failure` directly.
        window.slow_calls += 1;
        let promote = window.slow_calls >= self.config.slow_call_threshold;
        window.push(!promote);
        promote
    }

    fn reset_window(&self) {
        let mut window = self.state.window.lock().expect("window mutex poisoned");
        window.reset();
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                now: Arc::new(AtomicU64::new(0)),
            }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn fail() -> BrokerError {
        BrokerError::TransportFailure("fail".to_string())
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BrokerError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(10));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(fail())
                    }
                })
                .await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BrokerError>(42)
                }
            })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_transitions_to_half_open_after_timeout() {
        let breaker = CircuitBreakerPolicy::new(2, Duration::from_millis(100));
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        }

        let result = breaker
            .execute(|| async { Ok::<_, BrokerError>(42) })
            .await;
        assert!(result.unwrap_err().is_circuit_open());

        tokio::time::sleep(Duration::from_millis(150)).await;

        let counter_clone = counter.clone();
        let success = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BrokerError>(100)
                }
            })
            .await;

        assert_eq!(success.unwrap(), 100);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_circuit_closes_after_success_threshold_probes() {
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig {
            failure_threshold: 2,
            success_threshold: 3,
            timeout: Duration::from_millis(100),
            ..CircuitBreakerConfig::default()
        })
        .with_half_open_limit(1);

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        for _ in 0..2 {
            let result = breaker
                .execute(|| async { Ok::<_, BrokerError>(42) })
                .await;
            assert!(result.is_ok());
            assert_eq!(breaker.state(), CircuitState::HalfOpen, "not enough probes yet");
        }

        let result = breaker
            .execute(|| async { Ok::<_, BrokerError>(42) })
            .await;
        assert!(result.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_circuit_reopens_if_half_open_probe_fails() {
        let breaker = CircuitBreakerPolicy::new(2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;

        let result = breaker
            .execute(|| async { Ok::<_, BrokerError>(42) })
            .await;

        assert!(result.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn test_half_open_limits_concurrent_calls() {
        let breaker =
            CircuitBreakerPolicy::new(2, Duration::from_millis(100)).with_half_open_limit(1);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        }

        tokio::time::sleep(Duration::from_millis(150)).await;

        let mut handles = vec![];
        for _ in 0..3 {
            let breaker_clone = breaker.clone();
            let counter_clone = counter.clone();
            handles.push(tokio::spawn(async move {
                breaker_clone
                    .execute(|| {
                        let counter = counter_clone.clone();
                        async move {
                            counter.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, BrokerError>(42)
                        }
                    })
                    .await
            }));
        }

        let results: Vec<_> = futures::future::join_all(handles).await;
        let successes = results.iter().filter(|r| r.as_ref().unwrap().is_ok()).count();
        let rejections = results
            .iter()
            .filter(|r| r.as_ref().unwrap().as_ref().err().map_or(false, |e| e.is_circuit_open()))
            .count();

        assert_eq!(successes, 1, "Only 1 call should succeed in half-open");
        assert_eq!(rejections, 2, "Other 2 calls should be rejected");
    }

    #[tokio::test]
    async fn test_disabled_circuit_breaker_never_opens() {
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig::disabled());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..1000 {
            let counter_clone = counter.clone();
            let _ = breaker
                .execute(|| {
                    let counter = counter_clone.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(fail())
                    }
                })
                .await;
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1000);

        counter.store(0, Ordering::SeqCst);
        let counter_clone = counter.clone();
        let result = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BrokerError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_successes_in_closed_state_reset_consecutive_failures() {
        let breaker = CircuitBreakerPolicy::new(3, Duration::from_secs(1));

        for _ in 0..2 {
            let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        }

        let _ = breaker
            .execute(|| async { Ok::<_, BrokerError>(42) })
            .await;

        for _ in 0..2 {
            let result = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
            assert!(result.is_err());
            assert!(!result.unwrap_err().is_circuit_open());
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_custom_clock_allows_instant_recovery() {
        let clock = ManualClock::new();
        let breaker =
            CircuitBreakerPolicy::new(1, Duration::from_millis(100)).with_clock(clock.clone());

        let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;

        let open_result = breaker
            .execute(|| async { Ok::<_, BrokerError>(()) })
            .await;
        assert!(open_result.unwrap_err().is_circuit_open());

        clock.advance(150);

        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let success = breaker
            .execute(|| {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, BrokerError>(42)
                }
            })
            .await;

        assert_eq!(success.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_not_recorded_as_failure() {
        let breaker = CircuitBreakerPolicy::new(1, Duration::from_secs(10));

        let result = breaker
            .execute(|| async { Err::<(), _>(BrokerError::Cancelled) })
            .await;
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(breaker.state(), CircuitState::Closed);

        // A genuine failure afterwards should still trip the breaker normally.
        let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_failure_rate_threshold_with_high_consecutive_threshold() {
        // 100 concurrent calls, half succeed and half throw, both thresholds
        // set above 100: state remains Closed, counts land at 50/50.
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig {
            failure_threshold: 1000,
            failure_rate_threshold: 1.0,
            minimum_throughput: 1000,
            ..CircuitBreakerConfig::default()
        });

        let mut handles = vec![];
        for i in 0..100 {
            let breaker_clone = breaker.clone();
            handles.push(tokio::spawn(async move {
                breaker_clone
                    .execute(|| async move {
                        if i % 2 == 0 {
                            Ok::<_, BrokerError>(())
                        } else {
                            Err(fail())
                        }
                    })
                    .await
            }));
        }
        let _: Vec<_> = futures::future::join_all(handles).await;

        let metrics = breaker.metrics();
        assert_eq!(metrics.state, CircuitState::Closed);
        assert_eq!(metrics.successful_calls, 50);
        assert_eq!(metrics.failed_calls, 50);
    }

    #[tokio::test]
    async fn test_failure_rate_trips_before_consecutive_threshold() {
        let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig {
            failure_threshold: 1000,
            failure_rate_threshold: 0.5,
            minimum_throughput: 4,
            window_size: 4,
            ..CircuitBreakerConfig::default()
        });

        let _ = breaker
            .execute(|| async { Ok::<_, BrokerError>(()) })
            .await;
        let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;
        let _ = breaker
            .execute(|| async { Ok::<_, BrokerError>(()) })
            .await;
        let _ = breaker.execute(|| async { Err::<(), _>(fail()) }).await;

        assert_eq!(breaker.state(), CircuitState::Open);
    }
}
