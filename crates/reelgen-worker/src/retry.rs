//! Retry policies for provider calls.
//!
//! A policy is an explicit object: attempt count, backoff schedule and a
//! predicate deciding which errors are worth another attempt.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `base * 2^n`, capped at `max`.
    Exponential { base: Duration, max: Duration },
    /// `step * (n + 1)`.
    Linear { step: Duration },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Operation name for logging.
    pub operation_name: String,
}

impl RetryPolicy {
    pub fn exponential(operation_name: impl Into<String>, max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential {
                base,
                max: Duration::from_secs(30),
            },
            operation_name: operation_name.into(),
        }
    }

    pub fn linear(operation_name: impl Into<String>, max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Linear { step },
            operation_name: operation_name.into(),
        }
    }

    /// Delay after the failed attempt `attempt` (zero-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Exponential { base, max } => {
                base.saturating_mul(2u32.saturating_pow(attempt)).min(max)
            }
            Backoff::Linear { step } => step.saturating_mul(attempt + 1),
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy runs out of attempts. The last error is returned.
pub async fn retry_async<F, Fut, T, E, P>(policy: &RetryPolicy, retryable: P, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt + 1 < policy.max_attempts && retryable(&e) => {
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    policy.operation_name,
                    attempt + 1,
                    delay,
                    e
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                warn!(
                    "{} failed after {} attempt(s): {}",
                    policy.operation_name,
                    attempt + 1,
                    e
                );
                return Err(e);
            }
        }
    }
}

/// State tracker for repeated operations that may fail intermittently.
///
/// Used by the payment sweep to stop flooding logs while the provider or
/// store is down.
#[derive(Debug, Default)]
pub struct FailureTracker {
    consecutive_failures: u32,
    max_logged_failures: u32,
    suppressed: bool,
}

impl FailureTracker {
    pub fn new(max_logged_failures: u32) -> Self {
        Self {
            consecutive_failures: 0,
            max_logged_failures,
            suppressed: false,
        }
    }

    /// Record a successful operation (resets failure count).
    pub fn record_success(&mut self) {
        if self.consecutive_failures > 0 && self.suppressed {
            debug!(
                "Operation recovered after {} consecutive failures",
                self.consecutive_failures
            );
        }
        self.consecutive_failures = 0;
        self.suppressed = false;
    }

    /// Record a failed operation.
    ///
    /// Returns `true` if this failure should be logged (not suppressed).
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;

        if self.consecutive_failures <= self.max_logged_failures {
            true
        } else if self.consecutive_failures == self.max_logged_failures + 1 {
            self.suppressed = true;
            warn!(
                "Suppressing further failure logs after {} consecutive failures",
                self.max_logged_failures
            );
            false
        } else {
            false
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_schedule() {
        let policy = RetryPolicy::exponential("script", 3, Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(20), Duration::from_secs(30));
    }

    #[test]
    fn test_linear_schedule() {
        let policy = RetryPolicy::linear("payment", 3, Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(4));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::linear("x", 0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let policy = RetryPolicy::linear("test", 3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = retry_async(&policy, |_| true, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy::exponential("test", 3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_async(&policy, |_| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("down".to_string()) }
        })
        .await;

        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_stops_immediately() {
        let policy = RetryPolicy::linear("test", 5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = retry_async(&policy, |e: &String| e != "fatal", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal".to_string()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_tracker_suppression() {
        let mut tracker = FailureTracker::new(2);
        assert!(tracker.record_failure());
        assert!(tracker.record_failure());
        assert!(!tracker.record_failure());
        assert!(!tracker.record_failure());

        tracker.record_success();
        assert_eq!(tracker.failure_count(), 0);
        assert!(tracker.record_failure());
    }
}
