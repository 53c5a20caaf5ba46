//! Jittered exponential backoff for recovering from document-database
//! write conflicts, generalized from
//! `prax_query::middleware::retry::RetryConfig`'s SQL transient-error
//! classification to this engine's write-conflict classification
//! ([`crate::error::is_conflict_message`]).

use std::time::Duration;

use rand::Rng;

use crate::error::{Error, MigrantResult};

/// Tunables for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling no computed delay exceeds.
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub multiplier: f64,
    /// Fraction of the computed delay randomized away, to avoid every
    /// retrying writer waking up at the same instant (`full jitter`).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl RetryConfig {
    /// The delay before attempt number `attempt` (1-indexed: `attempt == 1`
    /// is the delay before the *second* overall try).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let raw = (self.base_delay.as_secs_f64() * exp).min(self.max_delay.as_secs_f64());
        let jitter_span = raw * self.jitter;
        let mut rng = rand::thread_rng();
        let jittered = raw - jitter_span + rng.gen::<f64>() * 2.0 * jitter_span;
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Decides whether a given error is worth retrying at all. The default
/// predicate delegates to [`crate::error::Error::is_conflict`]; backend
/// crates can supply a wider predicate if their driver surfaces conflicts
/// under a different error shape.
pub trait RetryPredicate: Send + Sync {
    fn should_retry(&self, error: &Error) -> bool;
}

/// The default predicate: only the write-conflict family is retried.
pub struct ConflictRetryPredicate;

impl RetryPredicate for ConflictRetryPredicate {
    fn should_retry(&self, error: &Error) -> bool {
        error.is_conflict()
    }
}

/// Drives a retry loop around a fallible async operation.
pub struct RetryPolicy {
    config: RetryConfig,
    predicate: Box<dyn RetryPredicate>,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: Box::new(ConflictRetryPredicate),
        }
    }

    pub fn with_predicate(mut self, predicate: Box<dyn RetryPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    /// Run `op`, retrying on retriable failures until `max_attempts` is
    /// exhausted or `op` succeeds. `on_retry` is invoked before each
    /// sleeping retry with the 1-indexed attempt number just completed and
    /// the error that triggered it, letting callers emit progress events
    /// (spec.md §4.7's `onOperation` "retrying" phase).
    pub async fn run<F, Fut, T>(&self, mut on_retry: impl FnMut(u32, &Error), mut op: F) -> MigrantResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = MigrantResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.config.max_attempts && self.predicate.should_retry(&err) => {
                    on_retry(attempt, &err);
                    let delay = self.config.delay_for_attempt(attempt);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) if self.predicate.should_retry(&err) => {
                    return Err(Error::ConflictExhausted {
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delay_grows_exponentially_within_jitter_bounds() {
        let config = RetryConfig {
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let d1 = config.delay_for_attempt(1);
        let d2 = config.delay_for_attempt(2);
        assert!(d2 >= d1);
    }

    #[test]
    fn delay_never_exceeds_max() {
        let config = RetryConfig {
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
            ..RetryConfig::default()
        };
        let d = config.delay_for_attempt(20);
        assert!(d <= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn retries_conflicts_until_success() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        });
        let attempts = AtomicU32::new(0);
        let result = policy
            .run(
                |_, _| {},
                || {
                    let n = attempts.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if n < 2 {
                            Err(Error::driver(std::io::Error::other("WriteConflict")))
                        } else {
                            Ok(42)
                        }
                    }
                },
            )
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_and_wraps_conflict_exhausted() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryConfig::default()
        });
        let result: MigrantResult<()> = policy
            .run(
                |_, _| {},
                || async { Err(Error::driver(std::io::Error::other("conflict"))) },
            )
            .await;
        assert!(matches!(result, Err(Error::ConflictExhausted { attempts: 2, .. })));
    }

    #[tokio::test]
    async fn non_conflict_errors_are_not_retried() {
        let policy = RetryPolicy::new(RetryConfig::default());
        let attempts = AtomicU32::new(0);
        let result: MigrantResult<()> = policy
            .run(
                |_, _| {},
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::Other("boom".into())) }
                },
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
