//! Output encoding for composed videos: portrait H.264/AAC.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Portrait output frame.
pub const OUTPUT_WIDTH: u32 = 1080;
pub const OUTPUT_HEIGHT: u32 = 1920;
pub const OUTPUT_FPS: u32 = 30;

/// Encoder settings. Missing fields deserialize to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EncodingConfig {
    pub codec: String,
    pub preset: String,
    /// Constant rate factor, 0-51, lower is better quality.
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            preset: "fast".into(),
            crf: 23,
            audio_codec: "aac".into(),
            audio_bitrate: "128k".into(),
            width: OUTPUT_WIDTH,
            height: OUTPUT_HEIGHT,
            fps: OUTPUT_FPS,
        }
    }
}

impl EncodingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crf(mut self, crf: u8) -> Self {
        self.crf = crf;
        self
    }

    /// Codec, rate and container flags for the final encode.
    pub fn to_ffmpeg_args(&self) -> Vec<String> {
        let crf = self.crf.to_string();
        let fps = self.fps.to_string();
        [
            ("-c:v", self.codec.as_str()),
            ("-preset", self.preset.as_str()),
            ("-crf", crf.as_str()),
            ("-pix_fmt", "yuv420p"),
            ("-r", fps.as_str()),
            ("-c:a", self.audio_codec.as_str()),
            ("-b:a", self.audio_bitrate.as_str()),
            ("-movflags", "+faststart"),
        ]
        .iter()
        .flat_map(|(flag, value)| [flag.to_string(), value.to_string()])
        .collect()
    }

    /// Scale to cover the frame, then crop the center.
    pub fn cover_filter(&self) -> String {
        let (w, h) = (self.width, self.height);
        format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_portrait_h264_defaults() {
        let config = EncodingConfig::default();
        assert_eq!(config.codec, "libx264");
        assert_eq!(config.audio_codec, "aac");
        assert_eq!((config.width, config.height, config.fps), (1080, 1920, 30));
    }

    #[test]
    fn test_ffmpeg_args_pair_flags_with_values() {
        let args = EncodingConfig::new().with_crf(20).to_ffmpeg_args();
        let joined = args.join(" ");
        assert!(joined.starts_with("-c:v libx264 -preset fast -crf 20"));
        assert!(joined.ends_with("-movflags +faststart"));
        assert_eq!(args.len(), 16);
    }

    #[test]
    fn test_cover_filter() {
        assert_eq!(
            EncodingConfig::default().cover_filter(),
            "scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920"
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EncodingConfig = serde_json::from_str(r#"{"crf": 28}"#).unwrap();
        assert_eq!(config, EncodingConfig::default().with_crf(28));
    }
}
