//! Composition seam used by the session pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reelgen_media::{BackgroundAsset, CompositionEngine};
use reelgen_models::{BackgroundSelector, VideoStyle};

use crate::error::{WorkerError, WorkerResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoComposer: Send + Sync {
    /// Backgrounds of `style` present in the library, default first.
    fn backgrounds(&self, style: &VideoStyle) -> Vec<BackgroundAsset>;

    fn has_background(&self, file_name: &str) -> bool;

    /// Clip bytes for a background preview.
    async fn preview(&self, file_name: &str) -> WorkerResult<Vec<u8>>;

    /// Render the final video, returning its path.
    async fn compose(
        &self,
        script: &str,
        audio_path: &Path,
        output_path: &Path,
        background: &BackgroundSelector,
    ) -> WorkerResult<PathBuf>;
}

#[async_trait]
impl VideoComposer for CompositionEngine {
    fn backgrounds(&self, style: &VideoStyle) -> Vec<BackgroundAsset> {
        self.library().available(style.backgrounds.iter().copied())
    }

    fn has_background(&self, file_name: &str) -> bool {
        self.library().exists(file_name)
    }

    async fn preview(&self, file_name: &str) -> WorkerResult<Vec<u8>> {
        self.library()
            .read_bytes(file_name)
            .await
            .map_err(WorkerError::from_composition)
    }

    async fn compose(
        &self,
        script: &str,
        audio_path: &Path,
        output_path: &Path,
        background: &BackgroundSelector,
    ) -> WorkerResult<PathBuf> {
        CompositionEngine::compose(self, script, audio_path, output_path, background)
            .await
            .map(|video| video.path)
            .map_err(WorkerError::from_composition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgen_media::{CompositionConfig, EncoderPool};
    use reelgen_models::find_style;
    use tempfile::TempDir;

    fn engine(root: &Path) -> CompositionEngine {
        CompositionEngine::new(
            reelgen_media::BackgroundLibrary::new(root),
            EncoderPool::new(1),
            CompositionConfig::new(root.join("work")),
        )
    }

    #[tokio::test]
    async fn test_backgrounds_limited_to_library() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("firelight.mp4"), b"clip").unwrap();
        let engine = engine(dir.path());

        let style = find_style("deep").unwrap();
        let available = VideoComposer::backgrounds(&engine, style);
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].display_name, "Firelight");
        assert!(engine.has_background("firelight.mp4"));
        assert!(!engine.has_background("dark_forest.mp4"));

        let bytes = engine.preview("firelight.mp4").await.unwrap();
        assert_eq!(bytes, b"clip");
    }

    #[tokio::test]
    async fn test_missing_preview_is_asset_not_found() {
        let dir = TempDir::new().unwrap();
        let err = engine(dir.path()).preview("night_glow.mp4").await.unwrap_err();
        assert!(matches!(err, WorkerError::AssetNotFound(name) if name == "night_glow.mp4"));
    }
}
