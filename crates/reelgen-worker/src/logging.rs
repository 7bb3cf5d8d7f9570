//! Structured generation logging.
//!
//! Gives every pipeline log line the same `user_id`, `generation_id` and
//! `operation` fields.

use reelgen_models::{GenerationId, UserId};
use tracing::{error, info, warn, Span};

/// Logger bound to one generation attempt.
#[derive(Debug, Clone)]
pub struct SessionLogger {
    user_id: UserId,
    generation_id: Option<String>,
    operation: String,
}

impl SessionLogger {
    pub fn new(user_id: UserId, operation: &str) -> Self {
        Self {
            user_id,
            generation_id: None,
            operation: operation.to_string(),
        }
    }

    /// Attach the generation record once it exists.
    pub fn with_generation(mut self, id: &GenerationId) -> Self {
        self.generation_id = Some(id.to_string());
        self
    }

    fn generation(&self) -> &str {
        self.generation_id.as_deref().unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation,
            "Generation started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation,
            "Generation progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation,
            "Generation warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation,
            "Generation error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation,
            "Generation completed: {}", message
        );
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn generation_id(&self) -> Option<&str> {
        self.generation_id.as_deref()
    }

    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "generation",
            user_id = %self.user_id,
            generation_id = %self.generation(),
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_attaches_generation() {
        let logger = SessionLogger::new(UserId(5), "pipeline");
        assert_eq!(logger.generation_id(), None);

        let id = GenerationId::from_string("gen-1");
        let logger = logger.with_generation(&id);
        assert_eq!(logger.generation_id(), Some("gen-1"));
        assert_eq!(logger.user_id(), UserId(5));
    }
}
