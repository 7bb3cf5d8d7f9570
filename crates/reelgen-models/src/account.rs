//! User accounts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::PlanTier;

/// Opaque user identifier assigned by the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Document key used by the store.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identity fields supplied on first contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct UserIdentity {
    pub user_id: UserId,
    pub display_name: String,
    pub username: Option<String>,
}

impl UserIdentity {
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            username: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }
}

/// Persisted user account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct UserAccount {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tier: PlanTier,
    #[serde(default)]
    pub subscription_expires_at: Option<DateTime<Utc>>,
    /// One-time video credits. Never negative.
    #[serde(default)]
    pub credits: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// New free account with no credits.
    pub fn new(identity: &UserIdentity) -> Self {
        let now = Utc::now();
        Self {
            user_id: identity.user_id,
            display_name: identity.display_name.clone(),
            username: identity.username.clone(),
            tier: PlanTier::Free,
            subscription_expires_at: None,
            credits: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Placeholder account for users first seen through a payment.
    pub fn placeholder(user_id: UserId) -> Self {
        Self::new(&UserIdentity::new(user_id, user_id.to_string()))
    }

    /// True if a paid tier has lapsed at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.tier.is_paid()
            && self
                .subscription_expires_at
                .map(|exp| exp <= now)
                .unwrap_or(true)
    }

    /// Tier after applying expiry coercion.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> PlanTier {
        if self.is_expired(now) {
            PlanTier::Free
        } else {
            self.tier
        }
    }

    /// Whole days left on the subscription (0 when none or expired).
    pub fn days_left(&self, now: DateTime<Utc>) -> i64 {
        match self.subscription_expires_at {
            Some(exp) if exp > now => (exp - now).num_days(),
            _ => 0,
        }
    }
}
