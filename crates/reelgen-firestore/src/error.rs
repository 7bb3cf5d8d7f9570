//! Firestore error types.

use thiserror::Error;

/// Result type for Firestore operations.
pub type FirestoreResult<T> = Result<T, FirestoreError>;

/// Errors that can occur during Firestore operations.
#[derive(Debug, Error)]
pub enum FirestoreError {
    #[error("Authentication failed: {0}")]
    AuthError(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Server error {0}: {1}")]
    ServerError(u16, String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited, retry after {0}ms")]
    RateLimited(u64),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
}

/// Default backoff when a 429 carries no usable hint.
const DEFAULT_RATE_LIMIT_MS: u64 = 1000;

impl FirestoreError {
    pub fn auth_error(msg: impl Into<String>) -> Self {
        Self::AuthError(msg.into())
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Map an HTTP status and body to an error.
    pub fn from_http_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 => Self::AuthError(message),
            403 => Self::PermissionDenied(message),
            404 => Self::NotFound(message),
            409 => Self::AlreadyExists(message),
            412 => Self::PreconditionFailed(message),
            429 => Self::RateLimited(DEFAULT_RATE_LIMIT_MS),
            500..=599 => Self::ServerError(status, message),
            _ => Self::RequestFailed(message),
        }
    }

    /// Metric label for the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            FirestoreError::AuthError(_) | FirestoreError::PermissionDenied(_) => "auth",
            FirestoreError::NotFound(_) => "not_found",
            FirestoreError::AlreadyExists(_) | FirestoreError::PreconditionFailed(_) => "conflict",
            FirestoreError::RateLimited(_) => "rate_limited",
            FirestoreError::ServerError(_, _) | FirestoreError::Network(_) => "unavailable",
            FirestoreError::RequestFailed(_)
            | FirestoreError::InvalidResponse(_)
            | FirestoreError::Json(_) => "invalid",
        }
    }

    /// Server-provided backoff hint.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            FirestoreError::RateLimited(ms) => Some(*ms),
            _ => None,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FirestoreError::Network(_)
                | FirestoreError::RateLimited(_)
                | FirestoreError::ServerError(_, _)
        )
    }

    /// True if the error was caused by a failed precondition (e.g., updateTime mismatch).
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, FirestoreError::PreconditionFailed(_))
            || matches!(
                self,
                FirestoreError::RequestFailed(msg)
                if msg.contains("FAILED_PRECONDITION")
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status() {
        assert!(matches!(
            FirestoreError::from_http_status(429, "slow down"),
            FirestoreError::RateLimited(_)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(503, "unavailable"),
            FirestoreError::ServerError(503, _)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(400, "bad"),
            FirestoreError::RequestFailed(_)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(404, "gone"),
            FirestoreError::NotFound(_)
        ));
        assert!(matches!(
            FirestoreError::from_http_status(409, "dup"),
            FirestoreError::AlreadyExists(_)
        ));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FirestoreError::from_http_status(500, "x").is_retryable());
        assert!(FirestoreError::RateLimited(10).is_retryable());
        assert!(!FirestoreError::from_http_status(400, "x").is_retryable());
        assert!(!FirestoreError::PreconditionFailed("x".into()).is_retryable());
    }

    #[test]
    fn test_metric_kind() {
        assert_eq!(FirestoreError::RateLimited(1000).kind(), "rate_limited");
        assert_eq!(FirestoreError::ServerError(502, "bad gateway".into()).kind(), "unavailable");
        assert_eq!(FirestoreError::PreconditionFailed("stale".into()).kind(), "conflict");
        assert_eq!(FirestoreError::NotFound("doc".into()).kind(), "not_found");
    }

    #[test]
    fn test_precondition_detection() {
        assert!(FirestoreError::PreconditionFailed("stale".into()).is_precondition_failed());
        assert!(FirestoreError::request_failed("FAILED_PRECONDITION: stale").is_precondition_failed());
        assert!(!FirestoreError::request_failed("other").is_precondition_failed());
    }

    #[test]
    fn test_retry_after() {
        assert_eq!(FirestoreError::RateLimited(5000).retry_after_ms(), Some(5000));
        assert_eq!(FirestoreError::ServerError(500, "e".into()).retry_after_ms(), None);
    }
}
