#![deny(unreachable_patterns)]
//! FFmpeg CLI wrapper and video composition engine.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeouts
//! - FFprobe duration and stream probing
//! - Audio format sniffing and narration gain
//! - Subtitle cue building from narration scripts
//! - A background clip library with a synthesized black placeholder
//! - A bounded encoder pool and the composition pipeline

pub mod audio;
pub mod background;
pub mod command;
pub mod compose;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod pool;
pub mod probe;
pub mod subtitles;

pub use audio::{detect_format, normalize_loudness, validate_audio_file, AudioFormat};
pub use background::{synthesize_placeholder, BackgroundAsset, BackgroundLibrary};
pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use compose::{loop_count, ComposedVideo, CompositionConfig, CompositionEngine};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{move_file, remove_files, unique_path};
pub use pool::{EncoderPool, EncoderSlot};
pub use probe::{get_duration, probe_media, MediaInfo};
pub use subtitles::{build_cues, SubtitleCue};
