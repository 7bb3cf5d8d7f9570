//! Subscription tiers and generation limits.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default daily generation limits per tier.
pub const FREE_DAILY_LIMIT: u32 = 1;
pub const LITE_DAILY_LIMIT: u32 = 3;
pub const PREMIUM_DAILY_LIMIT: u32 = 10;

/// Default monthly generation limits per tier.
pub const FREE_MONTHLY_LIMIT: u32 = 10;
pub const LITE_MONTHLY_LIMIT: u32 = 60;
pub const PREMIUM_MONTHLY_LIMIT: u32 = 200;

/// Subscription tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    #[default]
    Free,
    Lite,
    Premium,
}

impl PlanTier {
    /// Parse from string (case-insensitive). Unknown values fall back to free.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "lite" => PlanTier::Lite,
            "premium" => PlanTier::Premium,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Lite => "lite",
            PlanTier::Premium => "premium",
        }
    }

    /// Human-facing label used in status messages.
    pub fn label(&self) -> &'static str {
        match self {
            PlanTier::Free => "Free",
            PlanTier::Lite => "Lite",
            PlanTier::Premium => "Premium",
        }
    }

    /// True for tiers that carry an expiry.
    pub fn is_paid(&self) -> bool {
        !matches!(self, PlanTier::Free)
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Daily and monthly generation allowance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TierLimits {
    pub daily: u32,
    pub monthly: u32,
}

impl TierLimits {
    pub const fn new(daily: u32, monthly: u32) -> Self {
        Self { daily, monthly }
    }

    /// Whether another generation fits under both limits.
    pub fn allows(&self, daily_count: u32, monthly_count: u32) -> bool {
        daily_count < self.daily && monthly_count < self.monthly
    }

    pub fn daily_remaining(&self, daily_count: u32) -> u32 {
        self.daily.saturating_sub(daily_count)
    }

    pub fn monthly_remaining(&self, monthly_count: u32) -> u32 {
        self.monthly.saturating_sub(monthly_count)
    }
}

/// Lookup table of limits keyed by tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LimitTable {
    pub free: TierLimits,
    pub lite: TierLimits,
    pub premium: TierLimits,
}

impl Default for LimitTable {
    fn default() -> Self {
        Self {
            free: TierLimits::new(FREE_DAILY_LIMIT, FREE_MONTHLY_LIMIT),
            lite: TierLimits::new(LITE_DAILY_LIMIT, LITE_MONTHLY_LIMIT),
            premium: TierLimits::new(PREMIUM_DAILY_LIMIT, PREMIUM_MONTHLY_LIMIT),
        }
    }
}

impl LimitTable {
    pub fn for_tier(&self, tier: PlanTier) -> TierLimits {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Lite => self.lite,
            PlanTier::Premium => self.premium,
        }
    }
}
