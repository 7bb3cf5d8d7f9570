//! Subtitle cue building and SRT output.
//!
//! Cues are derived from the narration script alone: caption-marked lines are
//! preferred, bracketed stage directions are dropped, the text is split on
//! sentence terminators and every cue gets an equal share of the audio.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::MediaResult;

/// Cues with more words than this are wrapped onto two lines.
pub const MAX_WORDS_PER_LINE: usize = 8;

const CAPTION_PREFIX: &str = "caption:";

/// One timed subtitle.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleCue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

fn stage_direction_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\]]*\]").ok()).as_ref()
}

fn sentence_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^.!?…]+[.!?…]*").ok()).as_ref()
}

/// Text that should appear on screen.
///
/// Lines starting with `Caption:` win when any exist; otherwise the whole
/// script is used.
pub fn caption_text(script: &str) -> String {
    let captions: Vec<&str> = script
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let head = line.get(..CAPTION_PREFIX.len())?;
            head.eq_ignore_ascii_case(CAPTION_PREFIX)
                .then(|| line[CAPTION_PREFIX.len()..].trim())
        })
        .filter(|text| !text.is_empty())
        .collect();

    let text = if captions.is_empty() {
        script.to_string()
    } else {
        captions.join(" ")
    };

    let stripped = match stage_direction_re() {
        Some(re) => re.replace_all(&text, " ").into_owned(),
        None => text,
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences, keeping terminators attached.
pub fn split_sentences(text: &str) -> Vec<String> {
    let Some(re) = sentence_re() else {
        return vec![text.trim().to_string()];
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect()
}

/// Break a cue longer than [`MAX_WORDS_PER_LINE`] words into two lines.
pub fn wrap_cue(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= MAX_WORDS_PER_LINE {
        return words.join(" ");
    }
    let mid = words.len().div_ceil(2);
    format!("{}\n{}", words[..mid].join(" "), words[mid..].join(" "))
}

/// Build cues spread evenly across `duration` seconds.
///
/// A script without terminators yields a single cue covering the whole
/// duration. An empty script yields no cues.
pub fn build_cues(script: &str, duration: f64) -> Vec<SubtitleCue> {
    let text = caption_text(script);
    let mut sentences = split_sentences(&text);
    if sentences.is_empty() && !text.is_empty() {
        sentences.push(text);
    }
    if sentences.is_empty() || duration <= 0.0 {
        return Vec::new();
    }

    let slice = duration / sentences.len() as f64;
    let last = sentences.len() - 1;
    sentences
        .into_iter()
        .enumerate()
        .map(|(i, sentence)| SubtitleCue {
            start: slice * i as f64,
            // Pin the last cue to the exact end to avoid float drift
            end: if i == last { duration } else { slice * (i + 1) as f64 },
            text: wrap_cue(&sentence),
        })
        .collect()
}

/// Format seconds as an SRT timestamp `HH:MM:SS,mmm`.
pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_sec / 3600,
        (total_sec / 60) % 60,
        total_sec % 60,
        ms
    )
}

/// Render cues as an SRT document.
pub fn render_srt(cues: &[SubtitleCue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_srt_time(cue.start),
            format_srt_time(cue.end)
        );
        let _ = writeln!(out, "{}", cue.text);
        let _ = writeln!(out);
    }
    out
}

pub async fn write_srt(path: impl AsRef<Path>, cues: &[SubtitleCue]) -> MediaResult<()> {
    tokio::fs::write(path, render_srt(cues)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_terminators_single_cue() {
        let cues = build_cues("just keep going no matter what", 12.0);
        assert_eq!(cues.len(), 1);
        assert_eq!(cues[0].start, 0.0);
        assert_eq!(cues[0].end, 12.0);
    }

    #[test]
    fn test_equal_slices() {
        let cues = build_cues("One. Two! Three? Four…", 8.0);
        assert_eq!(cues.len(), 4);
        assert_eq!(cues[1].start, 2.0);
        assert_eq!(cues[1].end, 4.0);
        assert_eq!(cues[2].text, "Three?");
        assert_eq!(cues[3].end, 8.0);
    }

    #[test]
    fn test_caption_lines_preferred() {
        let script = "Scene: a sunrise over hills\nCAPTION: Wake up early.\nNarrator speaks softly\ncaption: Chase the light!";
        assert_eq!(caption_text(script), "Wake up early. Chase the light!");
        let cues = build_cues(script, 4.0);
        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].text, "Wake up early.");
    }

    #[test]
    fn test_stage_directions_removed() {
        assert_eq!(
            caption_text("[pause] Breathe in. [music swells] Let it go."),
            "Breathe in. Let it go."
        );
        assert!(build_cues("[silence]", 3.0).is_empty());
    }

    #[test]
    fn test_long_cue_wraps_to_two_lines() {
        let wrapped = wrap_cue("one two three four five six seven eight nine ten");
        assert_eq!(wrapped, "one two three four five\nsix seven eight nine ten");
        assert_eq!(wrap_cue("short cue here"), "short cue here");
        assert_eq!(wrap_cue("a b c d e f g h").lines().count(), 1);
    }

    #[test]
    fn test_empty_script_no_cues() {
        assert!(build_cues("   ", 10.0).is_empty());
        assert!(build_cues("Hello.", 0.0).is_empty());
    }

    #[test]
    fn test_srt_format() {
        assert_eq!(format_srt_time(3725.5), "01:02:05,500");
        let srt = render_srt(&build_cues("Hi there. Bye.", 3.0));
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,500\nHi there.\n\n2\n"));
    }
}
