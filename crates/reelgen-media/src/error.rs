//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Background asset not found: {0}")]
    AssetNotFound(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid media file: {0}")]
    InvalidMedia(String),

    #[error("Resource limit exceeded: {0}")]
    ResourceLimit(String),

    #[error("Composition failed during {stage}: {source}")]
    CompositionFailed {
        stage: &'static str,
        #[source]
        source: Box<MediaError>,
    },
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn asset_not_found(name: impl Into<String>) -> Self {
        Self::AssetNotFound(name.into())
    }

    pub fn invalid_media(message: impl Into<String>) -> Self {
        Self::InvalidMedia(message.into())
    }

    /// Wrap a stage failure into a single composition failure.
    pub fn composition(stage: &'static str, source: MediaError) -> Self {
        match source {
            already @ MediaError::CompositionFailed { .. } => already,
            other => Self::CompositionFailed {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The underlying cause, unwrapping a composition failure.
    pub fn root_cause(&self) -> &MediaError {
        match self {
            MediaError::CompositionFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// True if the root cause is a missing background asset.
    pub fn is_asset_not_found(&self) -> bool {
        matches!(self.root_cause(), MediaError::AssetNotFound(_))
    }
}
