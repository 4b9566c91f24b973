//! Backoff strategies for retry policies

use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between retries
    Constant { delay: Duration },
    /// Delay grows by `initial_delay * (1 + (attempt - 1) * (multiplier - 1))`, capped at `max`.
    Linear {
        initial_delay: Duration,
        multiplier: f64,
        max: Option<Duration>,
    },
    /// Delay grows by `initial_delay * multiplier^(attempt - 1)`, capped at `max`.
    Exponential {
        initial_delay: Duration,
        multiplier: f64,
        max: Option<Duration>,
    },
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Create a linear backoff strategy with the given growth multiplier.
    pub fn linear(initial_delay: Duration, multiplier: f64) -> Self {
        Backoff::Linear {
            initial_delay,
            multiplier,
            max: None,
        }
    }

    /// Create an exponential backoff strategy with the given growth multiplier.
    pub fn exponential(initial_delay: Duration, multiplier: f64) -> Self {
        Backoff::Exponential {
            initial_delay,
            multiplier,
            max: None,
        }
    }

    /// Set a maximum delay for linear or exponential backoff.
    pub fn with_max(mut self, max: Duration) -> Self {
        match &mut self {
            Backoff::Linear { max: m, .. } | Backoff::Exponential { max: m, .. } => {
                *m = Some(max);
            }
            Backoff::Constant { .. } => {}
        }
        self
    }

    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear {
                initial_delay,
                multiplier,
                max,
            } => {
                let k = attempt.saturating_sub(1) as f64;
                let factor = 1.0 + k * (multiplier - 1.0);
                cap(scale(*initial_delay, factor.max(0.0)), *max)
            }
            Backoff::Exponential {
                initial_delay,
                multiplier,
                max,
            } => {
                let k = attempt.saturating_sub(1) as u32;
                let factor = multiplier.max(0.0).powi(k as i32);
                cap(scale(*initial_delay, factor), *max)
            }
        }
    }
}

/// Scale a duration by a non-negative floating point factor, saturating on overflow.
fn scale(delay: Duration, factor: f64) -> Duration {
    if !factor.is_finite() || factor < 0.0 {
        return Duration::from_secs(0);
    }
    let millis = delay.as_secs_f64() * 1000.0 * factor;
    if !millis.is_finite() || millis >= (u64::MAX as f64) {
        return Duration::from_secs(u64::MAX / 1000);
    }
    Duration::from_millis(millis.round() as u64)
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    match max {
        Some(max) => delay.min(max),
        None => delay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_increases_by_multiplier() {
        let backoff = Backoff::linear(Duration::from_millis(100), 2.0);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
        assert_eq!(backoff.delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn linear_backoff_with_fractional_multiplier() {
        let backoff = Backoff::linear(Duration::from_millis(100), 1.5);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(150));
        assert_eq!(backoff.delay(3), Duration::from_millis(200));
    }

    #[test]
    fn exponential_backoff_multiplies_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100), 2.0);
        assert_eq!(backoff.delay(1), Duration::from_millis(100)); // 100 * 2^0
        assert_eq!(backoff.delay(2), Duration::from_millis(200)); // 100 * 2^1
        assert_eq!(backoff.delay(3), Duration::from_millis(400)); // 100 * 2^2
        assert_eq!(backoff.delay(4), Duration::from_millis(800)); // 100 * 2^3
        assert_eq!(backoff.delay(5), Duration::from_millis(1600)); // 100 * 2^4
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff =
            Backoff::exponential(Duration::from_millis(100), 2.0).with_max(Duration::from_secs(1));

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1)); // Capped
        assert_eq!(backoff.delay(10), Duration::from_secs(1)); // Still capped
    }

    #[test]
    fn exponential_backoff_with_non_doubling_multiplier() {
        let backoff = Backoff::exponential(Duration::from_millis(100), 1.5);
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(150));
        assert_eq!(backoff.delay(3), Duration::from_millis(225));
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1), 2.0);
        let delay = backoff.delay(64);
        assert!(delay > Duration::from_secs(1_000_000));
    }

    #[test]
    fn linear_backoff_handles_overflow() {
        let backoff = Backoff::linear(Duration::from_secs(u64::MAX / 2_000), 2.0);
        let delay = backoff.delay(10);
        assert!(delay >= Duration::from_secs(u64::MAX / 2_000));
    }

    #[test]
    fn with_max_only_affects_linear_and_exponential() {
        let constant =
            Backoff::constant(Duration::from_secs(5)).with_max(Duration::from_secs(1));
        assert_eq!(constant.delay(1), Duration::from_secs(5));

        let linear =
            Backoff::linear(Duration::from_secs(5), 2.0).with_max(Duration::from_secs(1));
        assert_eq!(linear.delay(2), Duration::from_secs(1));
    }
}
