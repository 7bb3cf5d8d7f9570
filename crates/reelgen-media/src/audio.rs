//! Audio format detection and narration loudness normalization.

use std::path::Path;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Fixed gain applied to the narration working copy.
pub const NARRATION_GAIN: f32 = 1.5;

/// Audio container recognized from leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Mp3,
    Wav,
    Ogg,
    Flac,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
        }
    }
}

/// Detect the audio format from the first bytes of a file.
pub fn detect_format(bytes: &[u8]) -> Option<AudioFormat> {
    match bytes {
        [b'I', b'D', b'3', ..] => Some(AudioFormat::Mp3),
        // MPEG frame sync: 11 set bits
        [0xFF, second, ..] if second & 0xE0 == 0xE0 => Some(AudioFormat::Mp3),
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some(AudioFormat::Wav),
        [b'O', b'g', b'g', b'S', ..] => Some(AudioFormat::Ogg),
        [b'f', b'L', b'a', b'C', ..] => Some(AudioFormat::Flac),
        _ => None,
    }
}

/// Check that a synthesized audio file is non-empty and looks like audio.
pub async fn validate_audio_file(path: impl AsRef<Path>) -> MediaResult<AudioFormat> {
    let path = path.as_ref();
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::FileNotFound(path.to_path_buf())
        } else {
            MediaError::Io(e)
        }
    })?;

    if bytes.is_empty() {
        return Err(MediaError::invalid_media(format!(
            "audio file is empty: {}",
            path.display()
        )));
    }

    detect_format(&bytes).ok_or_else(|| {
        MediaError::invalid_media(format!("unrecognized audio format: {}", path.display()))
    })
}

/// Write a gain-adjusted copy of the narration to `output`.
pub async fn normalize_loudness(
    runner: &FfmpegRunner,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> MediaResult<()> {
    let input = input.as_ref();
    if !input.exists() {
        return Err(MediaError::FileNotFound(input.to_path_buf()));
    }

    let cmd = FfmpegCommand::new(output.as_ref())
        .input(input)
        .audio_filter(format!("volume={}", NARRATION_GAIN))
        .output_args(["-vn", "-c:a", "libmp3lame", "-q:a", "2"]);

    runner.run(&cmd).await
}
