//! Transport-facing events and messages.

use std::path::PathBuf;

use reelgen_models::{PurchaseKind, UserIdentity, VoiceGender};

/// A user action delivered by the chat transport.
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    /// First contact or `/start`.
    Start(UserIdentity),
    /// Start a new generation, discarding any session in progress.
    Generate,
    /// Fill in the content profile questionnaire.
    EditProfile,
    Status,
    /// Show the purchase catalog.
    Buy,
    Cancel,
    Text(String),
    /// A photo, sticker, voice note or anything else without text.
    NonText,
    Select(Choice),
}

/// A selectable option, as carried in button callback data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Choice {
    Style(String),
    Voice(VoiceGender),
    DefaultVoice,
    PreviewBackground(String),
    Background(String),
    DefaultBackground,
    NoBackground,
    Approve,
    Edit,
    Regenerate,
    Purchase(PurchaseKind),
    CheckPayment(String),
}

impl Choice {
    /// Callback data for this option.
    pub fn data(&self) -> String {
        match self {
            Choice::Style(id) => format!("style:{}", id),
            Choice::Voice(gender) => format!("voice:{}", gender.as_str()),
            Choice::DefaultVoice => "voice:default".to_string(),
            Choice::PreviewBackground(name) => format!("bg_preview:{}", name),
            Choice::Background(name) => format!("bg:{}", name),
            Choice::DefaultBackground => "bg:default".to_string(),
            Choice::NoBackground => "bg:none".to_string(),
            Choice::Approve => "script:approve".to_string(),
            Choice::Edit => "script:edit".to_string(),
            Choice::Regenerate => "script:regenerate".to_string(),
            Choice::Purchase(kind) => format!("buy:{}:{}", kind.kind_str(), kind.item_id()),
            Choice::CheckPayment(id) => format!("pay_check:{}", id),
        }
    }

    /// Parse callback data produced by [`Choice::data`].
    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, rest) = data.split_once(':')?;
        let choice = match (prefix, rest) {
            ("style", id) if !id.is_empty() => Choice::Style(id.to_string()),
            ("voice", "default") => Choice::DefaultVoice,
            ("voice", gender) => Choice::Voice(VoiceGender::from_str(gender)?),
            ("bg_preview", name) if !name.is_empty() => Choice::PreviewBackground(name.to_string()),
            ("bg", "default") => Choice::DefaultBackground,
            ("bg", "none") => Choice::NoBackground,
            ("bg", name) if !name.is_empty() => Choice::Background(name.to_string()),
            ("script", "approve") => Choice::Approve,
            ("script", "edit") => Choice::Edit,
            ("script", "regenerate") => Choice::Regenerate,
            ("buy", rest) => {
                let (kind, id) = rest.split_once(':')?;
                Choice::Purchase(PurchaseKind::from_parts(kind, id)?)
            }
            ("pay_check", id) if !id.is_empty() => Choice::CheckPayment(id.to_string()),
            _ => return None,
        };
        Some(choice)
    }
}

/// One button in an options message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuOption {
    pub label: String,
    pub choice: Choice,
}

impl MenuOption {
    pub fn new(label: impl Into<String>, choice: Choice) -> Self {
        Self {
            label: label.into(),
            choice,
        }
    }
}

/// Something to show the user.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    Text(String),
    Options {
        text: String,
        options: Vec<MenuOption>,
    },
    /// A finished video file.
    Video { path: PathBuf, caption: String },
    /// A background clip preview.
    Preview { file_name: String, bytes: Vec<u8> },
    /// An external payment link.
    Link {
        text: String,
        url: String,
        options: Vec<MenuOption>,
    },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn options(text: impl Into<String>, options: Vec<MenuOption>) -> Self {
        Self::Options {
            text: text.into(),
            options,
        }
    }

    /// Text content, if the message has any.
    pub fn body(&self) -> Option<&str> {
        match self {
            OutgoingMessage::Text(text)
            | OutgoingMessage::Options { text, .. }
            | OutgoingMessage::Link { text, .. } => Some(text),
            OutgoingMessage::Video { caption, .. } => Some(caption),
            OutgoingMessage::Preview { .. } => None,
        }
    }
}
