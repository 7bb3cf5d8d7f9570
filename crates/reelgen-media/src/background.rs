//! Background clip library and placeholder synthesis.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use reelgen_models::{background_display_name, EncodingConfig};
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::get_duration;

/// Extra seconds the placeholder runs past the narration.
pub const PLACEHOLDER_PADDING_SECS: f64 = 1.0;

/// An entry in the background library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundAsset {
    pub file_name: String,
    pub display_name: String,
    pub path: PathBuf,
}

/// Named background clips stored in one directory.
#[derive(Debug, Clone)]
pub struct BackgroundLibrary {
    root: PathBuf,
}

impl BackgroundLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a file name to a path inside the library.
    ///
    /// Names containing path separators or `..` are rejected.
    pub fn resolve(&self, file_name: &str) -> MediaResult<PathBuf> {
        let is_plain = !file_name.is_empty()
            && Path::new(file_name).file_name() == Some(OsStr::new(file_name))
            && file_name != ".."
            && file_name != ".";
        if !is_plain {
            return Err(MediaError::asset_not_found(file_name));
        }

        let path = self.root.join(file_name);
        if !path.is_file() {
            return Err(MediaError::asset_not_found(file_name));
        }
        Ok(path)
    }

    pub fn exists(&self, file_name: &str) -> bool {
        self.resolve(file_name).is_ok()
    }

    /// Duration of a background clip in seconds.
    pub async fn duration(&self, file_name: &str) -> MediaResult<f64> {
        let path = self.resolve(file_name)?;
        get_duration(path).await
    }

    /// Raw bytes of a clip, for sending a preview.
    pub async fn read_bytes(&self, file_name: &str) -> MediaResult<Vec<u8>> {
        let path = self.resolve(file_name)?;
        Ok(tokio::fs::read(path).await?)
    }

    /// Clips from `names` that are present on disk, in the given order.
    pub fn available<'a, I>(&self, names: I) -> Vec<BackgroundAsset>
    where
        I: IntoIterator<Item = &'a str>,
    {
        names
            .into_iter()
            .filter_map(|name| {
                self.resolve(name).ok().map(|path| BackgroundAsset {
                    file_name: name.to_string(),
                    display_name: background_display_name(name),
                    path,
                })
            })
            .collect()
    }
}

/// Render a black portrait clip with a silent stereo track.
pub async fn synthesize_placeholder(
    runner: &FfmpegRunner,
    encoding: &EncodingConfig,
    audio_duration: f64,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let duration = audio_duration.max(0.0) + PLACEHOLDER_PADDING_SECS;
    let output = output.as_ref();
    debug!(duration, "Synthesizing placeholder background: {}", output.display());

    let cmd = FfmpegCommand::new(output)
        .lavfi_input(format!(
            "color=c=black:s={}x{}:r={}",
            encoding.width, encoding.height, encoding.fps
        ))
        .lavfi_input("anullsrc=r=44100:cl=stereo")
        .duration(duration)
        .video_codec("libx264")
        .output_args(["-preset", "ultrafast", "-pix_fmt", "yuv420p"])
        .audio_codec("aac")
        .output_arg("-shortest");

    runner.run(&cmd).await
}
