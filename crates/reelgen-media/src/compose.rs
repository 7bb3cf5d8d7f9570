//! Video composition: narration, background and burned-in subtitles.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use reelgen_models::{BackgroundSelector, EncodingConfig};
use tempfile::TempDir;
use tracing::{info, warn};

use crate::audio::normalize_loudness;
use crate::background::{synthesize_placeholder, BackgroundLibrary};
use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::render_graph;
use crate::fs_utils::move_file;
use crate::pool::EncoderPool;
use crate::probe::{get_duration, probe_media};
use crate::subtitles::{build_cues, write_srt};

/// Default per-command encoder timeout.
pub const DEFAULT_ENCODE_TIMEOUT: Duration = Duration::from_secs(300);

/// Composition engine settings.
#[derive(Debug, Clone)]
pub struct CompositionConfig {
    /// Parent directory for per-invocation scratch directories.
    pub work_dir: PathBuf,
    pub encode_timeout: Duration,
    pub encoding: EncodingConfig,
}

impl CompositionConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            encode_timeout: DEFAULT_ENCODE_TIMEOUT,
            encoding: EncodingConfig::default(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.encode_timeout = timeout;
        self
    }
}

/// Result of a successful composition.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedVideo {
    pub path: PathBuf,
    /// Narration duration the video was trimmed to.
    pub duration: f64,
    pub cue_count: usize,
}

/// How many times to play a background of `bg` seconds to cover `audio`
/// seconds. Returns 1 when no looping is needed.
pub fn loop_count(audio: f64, bg: f64) -> u32 {
    if bg <= 0.0 || bg >= audio {
        return 1;
    }
    (audio / bg).ceil() as u32 + 1
}

/// Composes final videos, one scratch directory per call.
#[derive(Debug, Clone)]
pub struct CompositionEngine {
    library: BackgroundLibrary,
    pool: EncoderPool,
    runner: FfmpegRunner,
    config: CompositionConfig,
}

impl CompositionEngine {
    pub fn new(library: BackgroundLibrary, pool: EncoderPool, config: CompositionConfig) -> Self {
        let runner = FfmpegRunner::new().with_timeout(config.encode_timeout);
        Self {
            library,
            pool,
            runner,
            config,
        }
    }

    pub fn library(&self) -> &BackgroundLibrary {
        &self.library
    }

    /// Compose `script` narrated by `audio_path` over `background` into
    /// `output_path`.
    ///
    /// Any stage failure is reported as a single `CompositionFailed`. Nothing
    /// is written at `output_path` unless the whole render succeeded, and all
    /// intermediates are removed on every exit path.
    pub async fn compose(
        &self,
        script: &str,
        audio_path: &Path,
        output_path: &Path,
        background: &BackgroundSelector,
    ) -> MediaResult<ComposedVideo> {
        let started = Instant::now();
        let result = self
            .compose_inner(script, audio_path, output_path, background)
            .await;

        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(video) => {
                metrics::counter!("reelgen_compositions_total", "status" => "success").increment(1);
                metrics::histogram!("reelgen_composition_duration_seconds").record(elapsed);
                info!(
                    output = %video.path.display(),
                    duration = video.duration,
                    cues = video.cue_count,
                    elapsed_secs = elapsed,
                    "Composition complete"
                );
            }
            Err(e) => {
                metrics::counter!("reelgen_compositions_total", "status" => "failure").increment(1);
                warn!(error = %e, elapsed_secs = elapsed, "Composition failed");
            }
        }
        result
    }

    async fn compose_inner(
        &self,
        script: &str,
        audio_path: &Path,
        output_path: &Path,
        background: &BackgroundSelector,
    ) -> MediaResult<ComposedVideo> {
        if !audio_path.is_file() {
            return Err(MediaError::composition(
                "audio",
                MediaError::FileNotFound(audio_path.to_path_buf()),
            ));
        }

        let asset_path = match background {
            BackgroundSelector::Asset(name) => Some(
                self.library
                    .resolve(name)
                    .map_err(|e| MediaError::composition("background", e))?,
            ),
            BackgroundSelector::None => None,
        };

        // Every FFmpeg stage below runs under this one slot.
        let _slot = self
            .pool
            .acquire()
            .await
            .map_err(|e| MediaError::composition("encode", e))?;

        tokio::fs::create_dir_all(&self.config.work_dir)
            .await
            .map_err(|e| MediaError::composition("workspace", e.into()))?;
        let scratch = TempDir::with_prefix_in("compose_", &self.config.work_dir)
            .map_err(|e| MediaError::composition("workspace", e.into()))?;
        let work = scratch.path();

        let narration = work.join("narration.mp3");
        normalize_loudness(&self.runner, audio_path, &narration)
            .await
            .map_err(|e| MediaError::composition("normalize", e))?;

        let audio_duration = get_duration(&narration)
            .await
            .map_err(|e| MediaError::composition("probe", e))?;

        let background_path = match asset_path {
            Some(path) => path,
            None => {
                let placeholder = work.join("placeholder.mp4");
                synthesize_placeholder(
                    &self.runner,
                    &self.config.encoding,
                    audio_duration,
                    &placeholder,
                )
                .await
                .map_err(|e| MediaError::composition("placeholder", e))?;
                placeholder
            }
        };

        let bg_info = probe_media(&background_path)
            .await
            .map_err(|e| MediaError::composition("probe", e))?;
        if !bg_info.has_video {
            return Err(MediaError::composition(
                "probe",
                MediaError::invalid_media("background has no video stream"),
            ));
        }

        let plays = loop_count(audio_duration, bg_info.duration);
        let background_path = if plays > 1 {
            let looped = work.join("looped.mp4");
            let cmd = FfmpegCommand::new(&looped)
                .stream_loop(plays - 1)
                .input(&background_path)
                .duration(audio_duration)
                .output_args(["-c", "copy"]);
            self.runner
                .run(&cmd)
                .await
                .map_err(|e| MediaError::composition("loop", e))?;
            looped
        } else {
            background_path
        };

        let cues = build_cues(script, audio_duration);
        let srt_path = if cues.is_empty() {
            None
        } else {
            let path = work.join("subtitles.srt");
            write_srt(&path, &cues)
                .await
                .map_err(|e| MediaError::composition("subtitles", e))?;
            Some(path)
        };

        let rendered = work.join("render.mp4");
        let graph = render_graph(&self.config.encoding, srt_path.as_deref(), bg_info.has_audio);
        let cmd = FfmpegCommand::new(&rendered)
            .input(&background_path)
            .input(&narration)
            .filter_complex(graph)
            .map("[v]")
            .map("[a]")
            .output_args(self.config.encoding.to_ffmpeg_args())
            .duration(audio_duration);

        self.runner
            .run(&cmd)
            .await
            .map_err(|e| MediaError::composition("encode", e))?;

        move_file(&rendered, output_path)
            .await
            .map_err(|e| MediaError::composition("finalize", e))?;

        Ok(ComposedVideo {
            path: output_path.to_path_buf(),
            duration: audio_duration,
            cue_count: cues.len(),
        })
    }
}
