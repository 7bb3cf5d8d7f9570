//! Per-user session states. Each step carries exactly the fields valid at it.

use reelgen_models::{BackgroundSelector, ContentProfile, ProfileField, VideoStyle, VoiceSelector};

/// Everything chosen before the script is approved.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub idea: String,
    pub style: &'static VideoStyle,
    pub voice: VoiceSelector,
    pub background: BackgroundSelector,
    pub profile: ContentProfile,
    pub script: String,
}

/// Selections made before a script exists.
#[derive(Debug, Clone, PartialEq)]
pub struct Selections {
    pub idea: String,
    pub style: &'static VideoStyle,
    pub voice: VoiceSelector,
    pub background: BackgroundSelector,
    pub profile: ContentProfile,
}

impl Selections {
    pub fn with_script(self, script: String) -> Draft {
        Draft {
            idea: self.idea,
            style: self.style,
            voice: self.voice,
            background: self.background,
            profile: self.profile,
            script,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    /// Questionnaire in progress. `then_generate` continues into a generation
    /// once the profile is saved.
    Profiling {
        field: ProfileField,
        answers: ContentProfile,
        then_generate: bool,
    },
    AwaitingIdea {
        profile: ContentProfile,
    },
    AwaitingStyle {
        idea: String,
        profile: ContentProfile,
    },
    AwaitingVoice {
        idea: String,
        style: &'static VideoStyle,
        profile: ContentProfile,
    },
    AwaitingBackground {
        idea: String,
        style: &'static VideoStyle,
        voice: VoiceSelector,
        profile: ContentProfile,
    },
    /// First script request in flight.
    WritingScript(Selections),
    PreviewingScript(Draft),
    /// Waiting for the user's revision notes.
    EditingScript(Draft),
    /// Regenerate or revise request in flight. Holds the draft to fall back to.
    Regenerating(Draft),
    Synthesizing,
    Delivering,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Profiling { .. } => "profiling",
            SessionState::AwaitingIdea { .. } => "awaiting_idea",
            SessionState::AwaitingStyle { .. } => "awaiting_style",
            SessionState::AwaitingVoice { .. } => "awaiting_voice",
            SessionState::AwaitingBackground { .. } => "awaiting_background",
            SessionState::WritingScript(_) => "writing_script",
            SessionState::PreviewingScript(_) => "previewing_script",
            SessionState::EditingScript(_) => "editing_script",
            SessionState::Regenerating(_) => "regenerating",
            SessionState::Synthesizing => "synthesizing",
            SessionState::Delivering => "delivering",
        }
    }

    /// States where an adapter call is running for this session.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionState::WritingScript(_)
                | SessionState::Regenerating(_)
                | SessionState::Synthesizing
                | SessionState::Delivering
        )
    }

    /// Cancel is refused once the entitlement has been spent.
    pub fn is_cancellable(&self) -> bool {
        !matches!(self, SessionState::Synthesizing | SessionState::Delivering)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelgen_models::find_style;

    #[test]
    fn test_cancel_refused_after_approval() {
        assert!(SessionState::Idle.is_cancellable());
        assert!(!SessionState::Synthesizing.is_cancellable());
        assert!(!SessionState::Delivering.is_cancellable());
    }

    #[test]
    fn test_selections_become_draft() {
        let selections = Selections {
            idea: "sleep better".into(),
            style: find_style("light").unwrap(),
            voice: VoiceSelector::default(),
            background: BackgroundSelector::None,
            profile: ContentProfile::default(),
        };
        let state = SessionState::WritingScript(selections.clone());
        assert!(state.is_busy());

        let draft = selections.with_script("Sleep is a skill.".into());
        assert_eq!(draft.style.id, "light");
        assert_eq!(draft.script, "Sleep is a skill.");
        assert_eq!(SessionState::PreviewingScript(draft).name(), "previewing_script");
    }
}
