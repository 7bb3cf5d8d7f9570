//! Generation records: one row per pipeline attempt.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::UserId;

/// Unique identifier for a generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct GenerationId(pub String);

impl GenerationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pipeline status of a generation.
///
/// Statuses only move forward. `Failed` is terminal and reachable from any
/// non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    Pending,
    Processing,
    ScriptReady,
    AudioReady,
    Completed,
    Failed,
}

impl GenerationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationStatus::Pending => "pending",
            GenerationStatus::Processing => "processing",
            GenerationStatus::ScriptReady => "script_ready",
            GenerationStatus::AudioReady => "audio_ready",
            GenerationStatus::Completed => "completed",
            GenerationStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(GenerationStatus::Pending),
            "processing" => Some(GenerationStatus::Processing),
            "script_ready" => Some(GenerationStatus::ScriptReady),
            "audio_ready" => Some(GenerationStatus::AudioReady),
            "completed" => Some(GenerationStatus::Completed),
            "failed" => Some(GenerationStatus::Failed),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            GenerationStatus::Pending => 0,
            GenerationStatus::Processing => 1,
            GenerationStatus::ScriptReady => 2,
            GenerationStatus::AudioReady => 3,
            GenerationStatus::Completed => 4,
            GenerationStatus::Failed => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GenerationStatus::Completed | GenerationStatus::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(&self, next: GenerationStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            GenerationStatus::Failed => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for GenerationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invalid status change.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid generation status transition {from} -> {to}")]
pub struct StatusTransitionError {
    pub from: GenerationStatus,
    pub to: GenerationStatus,
}

/// Durable record of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GenerationRecord {
    pub id: GenerationId,
    pub user_id: UserId,
    /// The user's idea text.
    pub prompt: String,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub audio_path: Option<String>,
    #[serde(default)]
    pub video_path: Option<String>,
    pub status: GenerationStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GenerationRecord {
    pub fn new(user_id: UserId, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: GenerationId::new(),
            user_id,
            prompt: prompt.into(),
            script: None,
            audio_path: None,
            video_path: None,
            status: GenerationStatus::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_script(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn with_status(mut self, status: GenerationStatus) -> Self {
        self.status = status;
        self
    }

    /// Apply an update, rejecting backwards status moves.
    pub fn apply(&mut self, update: &GenerationUpdate) -> Result<(), StatusTransitionError> {
        if let Some(next) = update.status {
            if next != self.status && !self.status.can_transition_to(next) {
                return Err(StatusTransitionError {
                    from: self.status,
                    to: next,
                });
            }
            self.status = next;
        }
        if let Some(script) = &update.script {
            self.script = Some(script.clone());
        }
        if let Some(path) = &update.audio_path {
            self.audio_path = Some(path.clone());
        }
        if let Some(path) = &update.video_path {
            self.video_path = Some(path.clone());
        }
        if let Some(msg) = &update.error_message {
            self.error_message = Some(msg.clone());
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update of a generation record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationUpdate {
    pub status: Option<GenerationStatus>,
    pub script: Option<String>,
    pub audio_path: Option<String>,
    pub video_path: Option<String>,
    pub error_message: Option<String>,
}

impl GenerationUpdate {
    pub fn status(status: GenerationStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(GenerationStatus::Failed),
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_audio_path(mut self, path: impl Into<String>) -> Self {
        self.audio_path = Some(path.into());
        self
    }

    pub fn with_video_path(mut self, path: impl Into<String>) -> Self {
        self.video_path = Some(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        use GenerationStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(AudioReady));
        assert!(AudioReady.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Completed));
    }

    #[test]
    fn test_backward_transitions_rejected() {
        use GenerationStatus::*;
        assert!(!AudioReady.can_transition_to(Processing));
        assert!(!Processing.can_transition_to(Pending));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use GenerationStatus::*;
        for status in [Pending, Processing, ScriptReady, AudioReady] {
            assert!(status.can_transition_to(Failed), "{} -> failed", status);
        }
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_apply_update() {
        let mut record = GenerationRecord::new(UserId(1), "idea")
            .with_status(GenerationStatus::Processing);
        let update = GenerationUpdate::status(GenerationStatus::AudioReady).with_audio_path("/tmp/a.mp3");
        record.apply(&update).unwrap();
        assert_eq!(record.status, GenerationStatus::AudioReady);
        assert_eq!(record.audio_path.as_deref(), Some("/tmp/a.mp3"));

        let back = GenerationUpdate::status(GenerationStatus::Processing);
        assert!(record.apply(&back).is_err());
    }

    #[test]
    fn test_status_string_round_trip() {
        for s in ["pending", "processing", "script_ready", "audio_ready", "completed", "failed"] {
            assert_eq!(GenerationStatus::from_str(s).map(|st| st.as_str()), Some(s));
        }
        assert_eq!(GenerationStatus::from_str("queued"), None);
    }
}
