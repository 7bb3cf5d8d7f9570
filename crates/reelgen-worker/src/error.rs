//! Worker error types.

use reelgen_models::{PlanTier, StatusTransitionError};
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Generation limit reached for {tier} tier")]
    LimitExceeded { tier: PlanTier },

    #[error("Background asset not found: {0}")]
    AssetNotFound(String),

    #[error("Script generation failed: {0}")]
    GenerationFailed(String),

    #[error("Speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("Composition failed: {0}")]
    CompositionFailed(String),

    #[error("Invoice intent not found: {0}")]
    IntentNotFound(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    #[error("Payment provider unavailable: {0}")]
    PaymentUnavailable(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Firestore error: {0}")]
    Firestore(#[from] reelgen_firestore::FirestoreError),

    #[error("Media error: {0}")]
    Media(#[from] reelgen_media::MediaError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Status transition rejected: {0}")]
    Transition(#[from] StatusTransitionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn generation_failed(msg: impl Into<String>) -> Self {
        Self::GenerationFailed(msg.into())
    }

    pub fn synthesis_failed(msg: impl Into<String>) -> Self {
        Self::SynthesisFailed(msg.into())
    }

    pub fn composition_failed(msg: impl Into<String>) -> Self {
        Self::CompositionFailed(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Map a composition failure, keeping a missing background distinct.
    pub fn from_composition(err: reelgen_media::MediaError) -> Self {
        if let reelgen_media::MediaError::AssetNotFound(name) = err.root_cause() {
            return Self::AssetNotFound(name.clone());
        }
        Self::CompositionFailed(err.to_string())
    }

    /// Transient failures worth another attempt inside an adapter.
    ///
    /// A timeout counts as a provider error.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Provider(_) | WorkerError::Timeout(_) => true,
            WorkerError::Http(e) => !e.is_builder(),
            WorkerError::Firestore(e) => e.is_retryable(),
            WorkerError::Io(_) => true,
            _ => false,
        }
    }

    pub fn is_limit_exceeded(&self) -> bool {
        matches!(self, WorkerError::LimitExceeded { .. })
    }

    /// Short apology plus a corrective action, shown to the user.
    pub fn user_message(&self) -> String {
        match self {
            WorkerError::LimitExceeded { .. } => {
                "You have reached your generation limit. Buy a video pack or upgrade your plan with /buy.".to_string()
            }
            WorkerError::GenerationFailed(_) => {
                "Sorry, we could not write a script right now. Please try again with /generate.".to_string()
            }
            WorkerError::SynthesisFailed(_) => {
                "Sorry, voice generation failed. Please try again with /generate.".to_string()
            }
            WorkerError::CompositionFailed(_) | WorkerError::AssetNotFound(_) => {
                "Sorry, the video could not be assembled. Please try again with /generate.".to_string()
            }
            WorkerError::DeliveryFailed(_) => {
                "Sorry, we could not send your video. Our team has been notified.".to_string()
            }
            WorkerError::PaymentUnavailable(_) => {
                "Payments are temporarily unavailable. Please try again later.".to_string()
            }
            WorkerError::IntentNotFound(_) => {
                "We could not find this invoice. Start a new purchase with /buy.".to_string()
            }
            WorkerError::InvalidInput(msg) => msg.clone(),
            _ => "Sorry, something went wrong. Please try again later.".to_string(),
        }
    }
}
