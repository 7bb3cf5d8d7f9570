//! Bounded pool for concurrent encoder processes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{MediaError, MediaResult};

/// Limits how many FFmpeg encodes run at once across all sessions.
#[derive(Debug, Clone)]
pub struct EncoderPool {
    semaphore: Arc<Semaphore>,
    max_slots: usize,
}

/// A held encoder slot; the slot is released on drop.
#[derive(Debug)]
pub struct EncoderSlot {
    _permit: OwnedSemaphorePermit,
}

impl EncoderPool {
    pub fn new(max_slots: usize) -> Self {
        let max_slots = max_slots.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_slots)),
            max_slots,
        }
    }

    /// Wait for a free encoder slot.
    pub async fn acquire(&self) -> MediaResult<EncoderSlot> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| MediaError::ResourceLimit("encoder pool closed".to_string()))?;
        metrics::gauge!("reelgen_encoder_slots_in_use").set(self.in_use() as f64);
        Ok(EncoderSlot { _permit: permit })
    }

    pub fn in_use(&self) -> usize {
        self.max_slots - self.semaphore.available_permits()
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }
}

impl Default for EncoderPool {
    fn default() -> Self {
        Self::new(2)
    }
}
