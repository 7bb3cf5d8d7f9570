//! Firestore request metrics.

use std::time::Duration;

use metrics::{counter, histogram};

use crate::error::FirestoreResult;

pub mod names {
    pub const REQUESTS_TOTAL: &str = "reelgen_firestore_requests_total";
    pub const RETRIES_TOTAL: &str = "reelgen_firestore_retries_total";
    pub const REQUEST_SECONDS: &str = "reelgen_firestore_request_duration_seconds";
    /// `updateTime` precondition conflicts on optimistic writes.
    pub const CONFLICTS_TOTAL: &str = "reelgen_firestore_write_conflicts_total";
}

/// `ok` or the error's kind label.
pub fn outcome<T>(result: &FirestoreResult<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind(),
    }
}

pub fn record_request(operation: &str, collection: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        names::REQUESTS_TOTAL,
        "operation" => operation.to_string(),
        "collection" => collection.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::REQUEST_SECONDS, "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_retry(operation: &str) {
    counter!(names::RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

pub fn record_conflict(operation: &str) {
    counter!(names::CONFLICTS_TOTAL, "operation" => operation.to_string()).increment(1);
}
