//! Retry policy implementation
//!
//! Provides configurable retry with backoff and jitter, plus pluggable error
//! classification and a pluggable sleeper.

use crate::error::BrokerError;
use crate::{Backoff, Jitter, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a given error should trigger another retry attempt.
///
/// The default classifier defers to [`BrokerError::is_retriable`]; callers can
/// supply their own to retry a narrower or wider set of errors (e.g. treating
/// a particular backend's transient codes as non-retriable).
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, error: &BrokerError) -> bool;
}

/// Classifies using [`BrokerError::is_retriable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClassifier;

impl RetryClassifier for DefaultClassifier {
    fn should_retry(&self, error: &BrokerError) -> bool {
        error.is_retriable()
    }
}

impl<F> RetryClassifier for F
where
    F: Fn(&BrokerError) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &BrokerError) -> bool {
        self(error)
    }
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classifier: Arc<dyn RetryClassifier>,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("classifier", &"<classifier>")
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl RetryPolicy {
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Run `operation` up to `max_attempts` times, sleeping between attempts
    /// according to `backoff` and `jitter`.
    ///
    /// `max_attempts == 0` performs zero attempts and returns
    /// `RetryExhausted { attempts: 0, .. }` without invoking `operation`.
    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, BrokerError>
    where
        T: Send,
        Fut: Future<Output = Result<T, BrokerError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if self.max_attempts == 0 {
            return Err(BrokerError::RetryExhausted {
                attempts: 0,
                last: "no attempts permitted (max_attempts = 0)".to_string(),
            });
        }

        let mut last: Option<BrokerError> = None;

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !self.classifier.should_retry(&err) {
                        return Err(err);
                    }

                    let is_last_attempt = attempt + 1 >= self.max_attempts;
                    if is_last_attempt {
                        return Err(BrokerError::RetryExhausted {
                            attempts: self.max_attempts,
                            last: err.to_string(),
                        });
                    }

                    last = Some(err);

                    let delay = self.backoff.delay(attempt + 1);
                    let delay = self.jitter.apply(delay);
                    self.sleeper.sleep(delay).await;
                }
            }
        }

        // Unreachable: the loop above always returns on its last iteration.
        Err(BrokerError::RetryExhausted {
            attempts: self.max_attempts,
            last: last.map(|e| e.to_string()).unwrap_or_default(),
        })
    }
}

pub struct RetryPolicyBuilder {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    classifier: Arc<dyn RetryClassifier>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicyBuilder {
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1), 2.0),
            jitter: Jitter::full(),
            classifier: Arc::new(DefaultClassifier),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Set the maximum number of attempts. `0` is accepted and means "never
    /// call the operation" (see the Open Question on `max_attempts == 0`).
    pub fn max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = attempts;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn classifier<C>(mut self, classifier: C) -> Self
    where
        C: RetryClassifier + 'static,
    {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&BrokerError) -> bool + Send + Sync + 'static,
    {
        self.classifier = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            classifier: self.classifier,
            sleeper: self.sleeper,
        }
    }
}

impl Default for RetryPolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}
