//! FFmpeg filter graph construction for the final render.

use std::path::Path;

use reelgen_models::EncodingConfig;

/// Gain of the background track when mixed under the narration.
pub const BACKGROUND_GAIN: f32 = 0.15;

/// Burned-in subtitle style: white Arial with a black outline, middle center.
pub const SUBTITLE_FORCE_STYLE: &str =
    "FontName=Arial,FontSize=24,PrimaryColour=&H00FFFFFF,OutlineColour=&H00000000,BorderStyle=1,Outline=2,Shadow=0,Alignment=5";

/// Escape a path for use inside a filter argument.
///
/// Backslashes become forward slashes. Colons, quotes and graph separators
/// are escaped; the caller wraps the value in single quotes.
pub fn escape_filter_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push('/'),
            ':' => out.push_str("\\:"),
            '\'' => out.push_str("'\\''"),
            ',' | '[' | ']' | ';' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// `subtitles=` filter with the fixed style.
pub fn subtitles_filter(srt_path: &Path) -> String {
    format!(
        "subtitles='{}':force_style='{}'",
        escape_filter_path(srt_path),
        SUBTITLE_FORCE_STYLE
    )
}

/// Video chain: cover-scale and crop to the output frame, then optional subtitles.
pub fn video_chain(encoding: &EncodingConfig, srt_path: Option<&Path>) -> String {
    let mut chain = format!("{},setsar=1", encoding.cover_filter());
    if let Some(srt) = srt_path {
        chain.push(',');
        chain.push_str(&subtitles_filter(srt));
    }
    chain
}

/// Full filter graph for background input 0 and narration input 1.
///
/// Produces `[v]` and `[a]` labels. When the background has its own audio it
/// is mixed in at [`BACKGROUND_GAIN`]; otherwise only the narration is used.
pub fn render_graph(
    encoding: &EncodingConfig,
    srt_path: Option<&Path>,
    background_has_audio: bool,
) -> String {
    let video = format!("[0:v]{}[v]", video_chain(encoding, srt_path));
    let audio = if background_has_audio {
        format!(
            "[0:a]volume={}[bg];[1:a]volume=1.0[vo];[bg][vo]amix=inputs=2:duration=longest:dropout_transition=0:normalize=0[a]",
            BACKGROUND_GAIN
        )
    } else {
        "[1:a]anull[a]".to_string()
    };
    format!("{};{}", video, audio)
}
