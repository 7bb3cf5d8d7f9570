//! Read-modify-write loop for `updateTime` guarded updates.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::error::{FirestoreError, FirestoreResult};
use crate::metrics::record_conflict;

/// Maximum attempts for one optimistic update.
pub const MAX_OPTIMISTIC_RETRIES: u32 = 5;

/// Base delay between attempts; grows linearly.
const RETRY_BASE_DELAY_MS: u64 = 50;

/// Run `attempt` until it succeeds or fails with something other than a
/// write conflict.
///
/// A conflict is a failed `updateTime` precondition or a create that lost the
/// race to another writer. Each attempt must re-read the document.
pub async fn retry_on_conflict<T, F, Fut>(operation: &str, mut attempt: F) -> FirestoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = FirestoreResult<T>>,
{
    let mut last_error = None;

    for n in 0..MAX_OPTIMISTIC_RETRIES {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if is_conflict(&e) => {
                debug!(operation, attempt = n + 1, "Write conflict, retrying: {}", e);
                record_conflict(operation);
                last_error = Some(e);
                tokio::time::sleep(Duration::from_millis(RETRY_BASE_DELAY_MS * (n as u64 + 1))).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        FirestoreError::PreconditionFailed(format!("{}: too many conflicts", operation))
    }))
}

fn is_conflict(e: &FirestoreError) -> bool {
    e.is_precondition_failed() || matches!(e, FirestoreError::AlreadyExists(_))
}
