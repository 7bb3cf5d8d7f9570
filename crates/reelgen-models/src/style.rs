//! Video styles, background choices and voice selection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A video style with its curated background clips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoStyle {
    pub id: &'static str,
    pub name: &'static str,
    /// Background file names; the first one is the style default.
    pub backgrounds: &'static [&'static str],
}

impl VideoStyle {
    pub fn default_background(&self) -> &'static str {
        self.backgrounds[0]
    }

    pub fn has_background(&self, file_name: &str) -> bool {
        self.backgrounds.contains(&file_name)
    }
}

pub const VIDEO_STYLES: [VideoStyle; 4] = [
    VideoStyle {
        id: "inspire",
        name: "Inspiring",
        backgrounds: &[
            "city_sunlight.mp4",
            "studio_white.mp4",
            "sunset_nature.mp4",
            "warm_abstract.mp4",
        ],
    },
    VideoStyle {
        id: "deep",
        name: "Deep",
        backgrounds: &[
            "dark_forest.mp4",
            "firelight.mp4",
            "deep_abstract.mp4",
            "night_glow.mp4",
        ],
    },
    VideoStyle {
        id: "light",
        name: "Light",
        backgrounds: &[
            "cloud_sky.mp4",
            "color_flow.mp4",
            "watercolor_pastel.mp4",
            "light_shapes.mp4",
        ],
    },
    VideoStyle {
        id: "podcast",
        name: "Podcast",
        backgrounds: &[
            "podcast_mic.mp4",
            "studio_light.mp4",
            "studio_dark.mp4",
            "visual_wave.mp4",
        ],
    },
];

pub fn find_style(id: &str) -> Option<&'static VideoStyle> {
    VIDEO_STYLES.iter().find(|s| s.id == id)
}

/// Every background across all styles, in catalog order.
pub fn all_backgrounds() -> impl Iterator<Item = &'static str> {
    VIDEO_STYLES.iter().flat_map(|s| s.backgrounds.iter().copied())
}

/// Display name for a background file: `city_sunlight.mp4` -> `City sunlight`.
pub fn background_display_name(file_name: &str) -> String {
    let stem = file_name.split('.').next().unwrap_or(file_name);
    let spaced = stem.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Which background to compose the video over.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "file", rename_all = "snake_case")]
pub enum BackgroundSelector {
    /// Synthesized black clip with silent audio.
    None,
    /// Named clip from the background asset library.
    Asset(String),
}

impl BackgroundSelector {
    pub fn asset(name: impl Into<String>) -> Self {
        Self::Asset(name.into())
    }

    pub fn display_name(&self) -> String {
        match self {
            BackgroundSelector::None => "Black".to_string(),
            BackgroundSelector::Asset(name) => background_display_name(name),
        }
    }
}

/// Narrator voice gender preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VoiceGender {
    Male,
    Female,
}

impl VoiceGender {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoiceGender::Male => "male",
            VoiceGender::Female => "female",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "male" => Some(VoiceGender::Male),
            "female" => Some(VoiceGender::Female),
            _ => None,
        }
    }
}

/// How the narrator voice is chosen. Resolution order is explicit id, then
/// gendered preset, then the tier default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VoiceSelector {
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub gender: Option<VoiceGender>,
}

impl VoiceSelector {
    pub fn explicit(voice_id: impl Into<String>) -> Self {
        Self {
            voice_id: Some(voice_id.into()),
            gender: None,
        }
    }

    pub fn gendered(gender: VoiceGender) -> Self {
        Self {
            voice_id: None,
            gender: Some(gender),
        }
    }
}
