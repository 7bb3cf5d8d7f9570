//! Purchasable subscription plans and one-time video packs.

use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{PlanTier, UserAccount};

/// A subscription plan offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubscriptionPlan {
    pub id: &'static str,
    pub tier: PlanTier,
    pub duration_days: u32,
    /// Price in the fiat quote currency.
    pub price: u32,
    pub title: &'static str,
}

/// A one-time pack of video credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VideoPack {
    pub id: &'static str,
    pub credits: u32,
    pub price: u32,
    pub title: &'static str,
}

pub const SUBSCRIPTION_PLANS: [SubscriptionPlan; 3] = [
    SubscriptionPlan {
        id: "lite_30",
        tier: PlanTier::Lite,
        duration_days: 30,
        price: 149,
        title: "Lite for 30 days",
    },
    SubscriptionPlan {
        id: "premium_30",
        tier: PlanTier::Premium,
        duration_days: 30,
        price: 299,
        title: "Premium for 30 days",
    },
    SubscriptionPlan {
        id: "premium_90",
        tier: PlanTier::Premium,
        duration_days: 90,
        price: 799,
        title: "Premium for 90 days",
    },
];

pub const VIDEO_PACKS: [VideoPack; 4] = [
    VideoPack {
        id: "single",
        credits: 1,
        price: 99,
        title: "1 video",
    },
    VideoPack {
        id: "pack5",
        credits: 5,
        price: 449,
        title: "5 videos",
    },
    VideoPack {
        id: "pack10",
        credits: 10,
        price: 849,
        title: "10 videos",
    },
    VideoPack {
        id: "pack20",
        credits: 20,
        price: 1599,
        title: "20 videos",
    },
];

pub fn find_plan(id: &str) -> Option<&'static SubscriptionPlan> {
    SUBSCRIPTION_PLANS.iter().find(|p| p.id == id)
}

pub fn find_pack(id: &str) -> Option<&'static VideoPack> {
    VIDEO_PACKS.iter().find(|p| p.id == id)
}

/// What an invoice buys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum PurchaseKind {
    Subscription(String),
    Pack(String),
}

impl PurchaseKind {
    pub fn subscription(plan_id: impl Into<String>) -> Self {
        Self::Subscription(plan_id.into())
    }

    pub fn pack(pack_id: impl Into<String>) -> Self {
        Self::Pack(pack_id.into())
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            PurchaseKind::Subscription(_) => "subscription",
            PurchaseKind::Pack(_) => "pack",
        }
    }

    pub fn item_id(&self) -> &str {
        match self {
            PurchaseKind::Subscription(id) | PurchaseKind::Pack(id) => id,
        }
    }

    /// Rebuild from the stored `(kind, id)` pair.
    pub fn from_parts(kind: &str, id: &str) -> Option<Self> {
        match kind {
            "subscription" => Some(Self::Subscription(id.to_string())),
            "pack" => Some(Self::Pack(id.to_string())),
            _ => None,
        }
    }

    /// Catalog price in the fiat quote currency.
    pub fn price(&self) -> Option<u32> {
        match self {
            PurchaseKind::Subscription(id) => find_plan(id).map(|p| p.price),
            PurchaseKind::Pack(id) => find_pack(id).map(|p| p.price),
        }
    }

    pub fn title(&self) -> Option<&'static str> {
        match self {
            PurchaseKind::Subscription(id) => find_plan(id).map(|p| p.title),
            PurchaseKind::Pack(id) => find_pack(id).map(|p| p.title),
        }
    }

    /// Account change this purchase grants, if the item is still in the catalog.
    pub fn entitlement(&self) -> Option<Entitlement> {
        match self {
            PurchaseKind::Subscription(id) => find_plan(id).map(|plan| Entitlement::Subscription {
                tier: plan.tier,
                days: plan.duration_days,
            }),
            PurchaseKind::Pack(id) => find_pack(id).map(|pack| Entitlement::Credits(pack.credits)),
        }
    }
}

/// An account mutation bought with an invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entitlement {
    Credits(u32),
    /// Replaces tier and expiry with `now + days`.
    Subscription { tier: PlanTier, days: u32 },
}

impl Entitlement {
    /// Zero credits or a zero-day plan grants nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Entitlement::Credits(n) => *n == 0,
            Entitlement::Subscription { days, .. } => *days == 0,
        }
    }

    pub fn apply_to(&self, account: &mut UserAccount, now: DateTime<Utc>) {
        match *self {
            Entitlement::Credits(n) => account.credits = account.credits.saturating_add(n),
            Entitlement::Subscription { tier, days } => {
                account.tier = tier;
                account.subscription_expires_at = Some(now + Duration::days(i64::from(days)));
            }
        }
        account.updated_at = now;
    }

    /// Account fields `apply_to` writes.
    pub fn touched_fields(&self) -> &'static [&'static str] {
        match self {
            Entitlement::Credits(_) => &["credits", "updated_at"],
            Entitlement::Subscription { .. } => &["tier", "subscription_expires_at", "updated_at"],
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Entitlement::Credits(n) => format!("{} video credit(s) added to your balance.", n),
            Entitlement::Subscription { tier, days } => {
                format!("{} plan active for {} days.", tier.label(), days)
            }
        }
    }
}
