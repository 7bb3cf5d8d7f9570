//! Retry policy for Firestore calls: exponential backoff with full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{info_span, warn, Instrument};

use crate::error::FirestoreResult;
use crate::metrics::record_retry;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Overrides from `FIRESTORE_MAX_RETRIES`, `FIRESTORE_RETRY_BASE_MS` and
    /// `FIRESTORE_RETRY_MAX_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let read = |key: &str| std::env::var(key).ok().and_then(|s| s.parse::<u64>().ok());

        Self {
            attempts: read("FIRESTORE_MAX_RETRIES")
                .map(|retries| retries as u32 + 1)
                .unwrap_or(defaults.attempts),
            base_delay: read("FIRESTORE_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: read("FIRESTORE_RETRY_MAX_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Wait before retry number `retry` (0-based). A server hint wins.
    /// Otherwise a random delay in `[min(base, cap), cap]` where
    /// `cap = min(base * 2^retry, max)`.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint;
        }

        let cap = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.max_delay);
        let floor = self.base_delay.min(cap);
        if cap.is_zero() {
            return cap;
        }

        let millis = rand::rng().random_range(floor.as_millis() as u64..=cap.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error or the
/// attempts run out. Network errors, 429 and 5xx are retryable.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    operation: &str,
    op: F,
) -> FirestoreResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let attempts = config.attempts.max(1);
    let mut attempt = 1;

    loop {
        let span = info_span!("firestore_attempt", operation = %operation, attempt);
        let err = match op().instrument(span).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() || attempt >= attempts {
            return Err(err);
        }

        let delay = config.backoff(attempt - 1, err.retry_after_ms().map(Duration::from_millis));
        warn!(
            operation = %operation,
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying Firestore call"
        );
        record_retry(operation);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
