//! Shared data models for the ReelGen pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Subscription tiers and their generation limits
//! - User accounts and content profiles
//! - Generation records and their status lifecycle
//! - Invoice intents and the purchase catalog
//! - Video styles, background and voice selection
//! - Encoding configuration

pub mod account;
pub mod catalog;
pub mod encoding;
pub mod generation;
pub mod invoice;
pub mod plan;
pub mod profile;
pub mod style;

pub use account::{UserAccount, UserId, UserIdentity};
pub use catalog::{
    find_pack, find_plan, Entitlement, PurchaseKind, SubscriptionPlan, VideoPack, SUBSCRIPTION_PLANS,
    VIDEO_PACKS,
};
pub use encoding::EncodingConfig;
pub use generation::{
    GenerationId, GenerationRecord, GenerationStatus, GenerationUpdate, StatusTransitionError,
};
pub use invoice::{quote_amount, InvoiceIntent, InvoiceStatus, ProviderInvoiceStatus};
pub use plan::{LimitTable, PlanTier, TierLimits};
pub use profile::{ContentProfile, ProfileField, StoredProfile};
pub use style::{
    all_backgrounds, background_display_name, find_style, BackgroundSelector, VideoStyle,
    VoiceGender, VoiceSelector, VIDEO_STYLES,
};
