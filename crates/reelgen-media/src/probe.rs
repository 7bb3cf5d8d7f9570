//! FFprobe media information.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Media file information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    /// Duration in seconds
    pub duration: f64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Width in pixels, 0 without a video stream
    pub width: u32,
    /// Height in pixels, 0 without a video stream
    pub height: u32,
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

/// Probe a media file for duration and stream layout.
pub async fn probe_media(path: impl AsRef<Path>) -> MediaResult<MediaInfo> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let child = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(PROBE_TIMEOUT, child)
        .await
        .map_err(|_| MediaError::Timeout(PROBE_TIMEOUT.as_secs()))??;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe failed for {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let video = probe.streams.iter().find(|s| s.codec_type == "video");
    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    // Container duration first, then the longest stream duration
    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .or_else(|| {
            probe
                .streams
                .iter()
                .filter_map(|s| s.duration.as_deref().and_then(|d| d.parse::<f64>().ok()))
                .reduce(f64::max)
        })
        .unwrap_or(0.0);

    if video.is_none() && !has_audio {
        return Err(MediaError::invalid_media("no audio or video stream"));
    }

    Ok(MediaInfo {
        duration,
        has_video: video.is_some(),
        has_audio,
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
    })
}

/// Get media duration in seconds.
pub async fn get_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let info = probe_media(path).await?;
    if info.duration <= 0.0 {
        return Err(MediaError::invalid_media("media has zero duration"));
    }
    Ok(info.duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_video_with_audio() {
        let json = br#"{
            "format": {"duration": "5.005"},
            "streams": [
                {"codec_type": "video", "width": 1920, "height": 1080},
                {"codec_type": "audio"}
            ]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(info.has_video && info.has_audio);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert!((info.duration - 5.005).abs() < 1e-9);
    }

    #[test]
    fn test_parse_audio_only_falls_back_to_stream_duration() {
        let json = br#"{
            "format": {},
            "streams": [{"codec_type": "audio", "duration": "12.0"}]
        }"#;
        let info = parse_probe_output(json).unwrap();
        assert!(!info.has_video);
        assert_eq!(info.width, 0);
        assert_eq!(info.duration, 12.0);
    }

    #[test]
    fn test_parse_no_streams_is_invalid() {
        let json = br#"{"format": {"duration": "1.0"}, "streams": []}"#;
        assert!(matches!(
            parse_probe_output(json),
            Err(MediaError::InvalidMedia(_))
        ));
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let err = probe_media("/nonexistent/voice.mp3").await.unwrap_err();
        assert!(matches!(err, MediaError::FileNotFound(_)));
    }
}
