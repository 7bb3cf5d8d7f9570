//! Invoice intents created when a purchase flow starts.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{PurchaseKind, UserId};

/// Local settlement status of an invoice intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    #[default]
    Created,
    Paid,
    Completed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Created => "created",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Completed => "completed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "created" => Some(InvoiceStatus::Created),
            "paid" => Some(InvoiceStatus::Paid),
            "completed" => Some(InvoiceStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Completed)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Invoice status as reported by the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderInvoiceStatus {
    Active,
    Paid,
    Expired,
}

impl ProviderInvoiceStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProviderInvoiceStatus::Active),
            "paid" => Some(ProviderInvoiceStatus::Paid),
            "expired" => Some(ProviderInvoiceStatus::Expired),
            _ => None,
        }
    }
}

/// A purchase awaiting settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvoiceIntent {
    /// Provider-assigned invoice id.
    pub id: String,
    pub user_id: UserId,
    pub kind: PurchaseKind,
    /// Quoted amount in the provider asset.
    pub amount: f64,
    pub asset: String,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub pay_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceIntent {
    pub fn new(
        id: impl Into<String>,
        user_id: UserId,
        kind: PurchaseKind,
        amount: f64,
        asset: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id,
            kind,
            amount,
            asset: asset.into(),
            status: InvoiceStatus::Created,
            pay_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_pay_url(mut self, url: impl Into<String>) -> Self {
        self.pay_url = Some(url.into());
        self
    }
}

/// Convert a fiat price to the provider asset amount, rounded up to cents.
pub fn quote_amount(price: u32, rate: f64) -> Option<f64> {
    if !(rate.is_finite() && rate > 0.0) {
        return None;
    }
    Some((price as f64 * 100.0 / rate).ceil() / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_amount_rounds_up() {
        assert_eq!(quote_amount(299, 100.0), Some(2.99));
        assert_eq!(quote_amount(100, 3.0), Some(33.34));
    }

    #[test]
    fn test_quote_amount_rejects_bad_rate() {
        assert_eq!(quote_amount(100, 0.0), None);
        assert_eq!(quote_amount(100, f64::NAN), None);
        assert_eq!(quote_amount(100, -1.0), None);
    }

    #[test]
    fn test_new_intent_is_created() {
        let intent = InvoiceIntent::new("42", UserId(1), PurchaseKind::pack("pack5"), 4.5, "USDT");
        assert_eq!(intent.status, InvoiceStatus::Created);
        assert!(!intent.status.is_terminal());
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(InvoiceStatus::from_str("paid"), Some(InvoiceStatus::Paid));
        assert_eq!(ProviderInvoiceStatus::from_str("expired"), Some(ProviderInvoiceStatus::Expired));
        assert_eq!(ProviderInvoiceStatus::from_str("weird"), None);
    }
}
