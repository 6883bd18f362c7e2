//! Bounded retry with exponential backoff
//!
//! Every store and network call in the index goes through [`execute`]. The
//! executor retries only errors the policy classifies as retryable, sleeps
//! between attempts without blocking other tasks, and returns the last error
//! annotated with the attempt count once the budget is spent.

use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::types::{IndexError, Result};

/// Predicate deciding whether an error is worth another attempt
pub type RetryPredicate = Arc<dyn Fn(&IndexError) -> bool + Send + Sync>;

/// Retry policy, constructed per call site
#[derive(Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first call
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor applied per attempt
    pub backoff_multiplier: f64,
    /// Scale each delay by a uniform factor in [0.5, 1.0]
    pub jitter: bool,
    retryable: Option<RetryPredicate>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
            retryable: None,
        }
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("custom_predicate", &self.retryable.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// Set total attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the delay bounds
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Replace the default transient classification with a custom predicate
    pub fn retry_if<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&IndexError) -> bool + Send + Sync + 'static,
    {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    /// Retry only store throughput-exceeded errors (paged reads)
    pub fn throughput_only(self) -> Self {
        self.retry_if(IndexError::is_throttled)
    }

    /// Retry transient and throughput errors; conflicts and validation
    /// failures never reach this predicate as retryable (conditional writes)
    pub fn transient_only(self) -> Self {
        self.retry_if(|e| !e.is_validation() && e.is_transient())
    }

    pub fn is_retryable(&self, err: &IndexError) -> bool {
        match &self.retryable {
            Some(predicate) => predicate(err),
            None => err.is_transient(),
        }
    }

    /// Un-jittered delay before retry number `attempt` (0-based):
    /// `min(initial_delay * multiplier^attempt, max_delay)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_delay
        }
    }

    fn sleep_for(&self, attempt: u32) -> Duration {
        let base = self.backoff(attempt);
        if self.jitter {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.0);
            base.mul_f64(factor)
        } else {
            base
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt budget is spent.
///
/// Non-retryable errors are returned unchanged. Exhaustion returns
/// [`IndexError::RetriesExhausted`] wrapping the last error.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) if !policy.is_retryable(&err) => return Err(err),
            Err(err) if attempt >= max_attempts => {
                error!(operation, attempts = attempt, error = %err, "Retries exhausted");
                return Err(IndexError::RetriesExhausted {
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            Err(err) => {
                let delay = policy.sleep_for(attempt - 1);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_delays(Duration::from_millis(1), Duration::from_millis(4))
            .with_jitter(false)
    }

    #[tokio::test]
    async fn test_throttled_twice_then_success() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy().with_max_attempts(3);

        let result = execute(&policy, "test", || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(IndexError::Throttled("rate".into()))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy().with_max_attempts(5);

        let result: Result<()> = execute(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Database("permission denied".into()))
        })
        .await;

        assert!(matches!(result, Err(IndexError::Database(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_attempts() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy().with_max_attempts(4);

        let result: Result<()> = execute(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Transient("connection reset".into()))
        })
        .await;

        match result {
            Err(IndexError::RetriesExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, IndexError::Transient(_)));
            }
            other => panic!("expected exhaustion, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_throughput_only_skips_transient() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy().throughput_only();

        let result: Result<()> = execute(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(IndexError::Transient("socket timeout".into()))
        })
        .await;

        assert!(matches!(result, Err(IndexError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_calls_once() {
        let calls = AtomicU32::new(0);
        let policy = fast_policy().with_max_attempts(0);

        let result = execute(&policy, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, IndexError>(7)
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(100), Duration::from_millis(1000))
            .with_multiplier(2.0);

        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_millis(1000));
        assert_eq!(policy.backoff(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let policy = RetryPolicy::default()
            .with_delays(Duration::from_millis(400), Duration::from_secs(10))
            .with_jitter(true);

        for _ in 0..200 {
            let d = policy.sleep_for(0);
            assert!(d >= Duration::from_millis(200), "{:?}", d);
            assert!(d <= Duration::from_millis(400), "{:?}", d);
        }
    }

    #[test]
    fn test_transient_only_rejects_validation() {
        let policy = RetryPolicy::default().transient_only();
        assert!(policy.is_retryable(&IndexError::Throttled("x".into())));
        assert!(!policy.is_retryable(&IndexError::Validation("x".into())));
        assert!(!policy.is_retryable(&IndexError::Database("x".into())));
    }
}
