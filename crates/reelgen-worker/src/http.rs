//! Shared HTTP plumbing for provider clients.

use std::time::Duration;

use reqwest::{Client, Response, StatusCode};

use crate::error::{WorkerError, WorkerResult};

/// Build a client whose every request has a fixed timeout.
pub fn build_client(timeout: Duration) -> WorkerResult<Client> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .build()
        .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))
}

/// Convert a transport failure, reporting timeouts as such.
pub fn map_send_error(operation: &str, err: reqwest::Error) -> WorkerError {
    if err.is_timeout() {
        WorkerError::Timeout(operation.to_string())
    } else {
        WorkerError::Http(err)
    }
}

/// Pass successful responses through. 429 and 5xx become retryable provider
/// errors; other statuses are rejected with the body prefix.
pub async fn check_status(operation: &str, response: Response) -> WorkerResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let prefix: String = body.chars().take(200).collect();
    let message = format!("{} returned {}: {}", operation, status.as_u16(), prefix);

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(WorkerError::Provider(message))
    } else {
        Err(WorkerError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
