//! Outbound chat transport seam.

use async_trait::async_trait;
use reelgen_models::UserId;
use tracing::info;

use super::events::OutgoingMessage;
use crate::error::WorkerResult;

/// Delivers messages to users. Deliveries to one user keep their order.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, user_id: UserId, message: OutgoingMessage) -> WorkerResult<()>;

    async fn notify_admins(&self, admin_ids: &[UserId], text: &str) -> WorkerResult<()>;
}

/// Transport that only logs. Used when the worker runs headless.
#[derive(Debug, Default, Clone)]
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send(&self, user_id: UserId, message: OutgoingMessage) -> WorkerResult<()> {
        match &message {
            OutgoingMessage::Video { path, .. } => {
                info!(user_id = %user_id, path = %path.display(), "Outgoing video");
            }
            OutgoingMessage::Preview { file_name, bytes } => {
                info!(user_id = %user_id, file_name = %file_name, size = bytes.len(), "Outgoing preview");
            }
            other => {
                info!(user_id = %user_id, text = other.body().unwrap_or_default(), "Outgoing message");
            }
        }
        Ok(())
    }

    async fn notify_admins(&self, admin_ids: &[UserId], text: &str) -> WorkerResult<()> {
        info!(admins = admin_ids.len(), text, "Admin notification");
        Ok(())
    }
}
