//! Content profile and the questionnaire that fills it.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::UserId;

/// Maximum length of a single profile answer.
pub const MAX_PROFILE_ANSWER_LEN: u64 = 500;

/// Profile fields in questionnaire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    Niche,
    ContentStyle,
    Goals,
    ToneOfVoice,
    TargetAudience,
}

impl ProfileField {
    pub const ALL: [ProfileField; 5] = [
        ProfileField::Niche,
        ProfileField::ContentStyle,
        ProfileField::Goals,
        ProfileField::ToneOfVoice,
        ProfileField::TargetAudience,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileField::Niche => "niche",
            ProfileField::ContentStyle => "content_style",
            ProfileField::Goals => "goals",
            ProfileField::ToneOfVoice => "tone_of_voice",
            ProfileField::TargetAudience => "target_audience",
        }
    }

    /// Label used when the field is rendered into prompt context.
    pub fn label(&self) -> &'static str {
        match self {
            ProfileField::Niche => "Niche",
            ProfileField::ContentStyle => "Content style",
            ProfileField::Goals => "Goals",
            ProfileField::ToneOfVoice => "Tone of voice",
            ProfileField::TargetAudience => "Target audience",
        }
    }

    /// Question shown to the user for this field.
    pub fn question(&self) -> &'static str {
        match self {
            ProfileField::Niche => "What is your niche? (e.g. fitness, finance, psychology)",
            ProfileField::ContentStyle => {
                "What style is your content? (e.g. expert, entertaining, motivational)"
            }
            ProfileField::Goals => "What are your goals? (e.g. grow followers, sell a course)",
            ProfileField::ToneOfVoice => "What tone of voice fits you? (e.g. friendly, bold, calm)",
            ProfileField::TargetAudience => "Who is your target audience?",
        }
    }

    /// Next field in questionnaire order.
    pub fn next(&self) -> Option<ProfileField> {
        let idx = Self::ALL.iter().position(|f| f == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    pub fn first() -> ProfileField {
        ProfileField::Niche
    }
}

/// User content profile. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct ContentProfile {
    #[validate(length(max = 500))]
    #[serde(default)]
    pub niche: Option<String>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub content_style: Option<String>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub goals: Option<String>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub tone_of_voice: Option<String>,
    #[validate(length(max = 500))]
    #[serde(default)]
    pub target_audience: Option<String>,
}

impl ContentProfile {
    pub fn get(&self, field: ProfileField) -> Option<&str> {
        let value = match field {
            ProfileField::Niche => &self.niche,
            ProfileField::ContentStyle => &self.content_style,
            ProfileField::Goals => &self.goals,
            ProfileField::ToneOfVoice => &self.tone_of_voice,
            ProfileField::TargetAudience => &self.target_audience,
        };
        value.as_deref()
    }

    /// Store a questionnaire answer. Blank answers and `-` clear the field.
    pub fn set_answer(&mut self, field: ProfileField, answer: &str) {
        let trimmed = answer.trim();
        let value = if trimmed.is_empty() || trimmed == "-" {
            None
        } else {
            Some(trimmed.to_string())
        };
        match field {
            ProfileField::Niche => self.niche = value,
            ProfileField::ContentStyle => self.content_style = value,
            ProfileField::Goals => self.goals = value,
            ProfileField::ToneOfVoice => self.tone_of_voice = value,
            ProfileField::TargetAudience => self.target_audience = value,
        }
    }

    /// Prompt context lines for every non-empty field, in questionnaire order.
    pub fn prompt_context(&self) -> String {
        ProfileField::ALL
            .iter()
            .filter_map(|field| {
                self.get(*field)
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| format!("{}: {}", field.label(), v))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        ProfileField::ALL.iter().all(|f| self.get(*f).is_none())
    }
}

/// Stored profile with ownership and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StoredProfile {
    pub user_id: UserId,
    pub profile: ContentProfile,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_questionnaire_order() {
        let mut field = ProfileField::first();
        let mut seen = vec![field];
        while let Some(next) = field.next() {
            seen.push(next);
            field = next;
        }
        assert_eq!(seen, ProfileField::ALL.to_vec());
    }

    #[test]
    fn test_prompt_context_skips_empty_fields() {
        let profile = ContentProfile {
            niche: Some("fitness".into()),
            content_style: Some("   ".into()),
            goals: None,
            tone_of_voice: Some("bold".into()),
            target_audience: None,
        };
        assert_eq!(profile.prompt_context(), "Niche: fitness\nTone of voice: bold");
    }

    #[test]
    fn test_prompt_context_empty_profile() {
        assert_eq!(ContentProfile::default().prompt_context(), "");
        assert!(ContentProfile::default().is_empty());
    }

    #[test]
    fn test_set_answer_trims_and_skips() {
        let mut profile = ContentProfile::default();
        profile.set_answer(ProfileField::Goals, "  sell a course ");
        profile.set_answer(ProfileField::Niche, "-");
        assert_eq!(profile.goals.as_deref(), Some("sell a course"));
        assert_eq!(profile.niche, None);
    }

    #[test]
    fn test_validation_rejects_long_answers() {
        let profile = ContentProfile {
            niche: Some("x".repeat(MAX_PROFILE_ANSWER_LEN as usize + 1)),
            ..Default::default()
        };
        assert!(profile.validate().is_err());
        assert!(ContentProfile::default().validate().is_ok());
    }
}
