//! Entitlement ledger: tiers, expiry, rolling usage windows and credits.
//!
//! Usage counts are derived from generation records on every call. Windows
//! are UTC calendar day and month. The credit decrement is atomic in the
//! store; tier-limit checks are advisory and a race can let one extra
//! generation through.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use reelgen_models::{Entitlement, LimitTable, PlanTier, UserAccount, UserId};
use tracing::{debug, info};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics::record_consumption;
use crate::store::Store;

/// Why a user may or may not generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    /// A positive credit balance.
    Credits { balance: u32 },
    WithinLimits,
    LimitExceeded,
    /// No account has been created for this user yet.
    NoAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub allowed: bool,
    pub reason: EligibilityReason,
    pub tier: PlanTier,
}

/// Which entitlement paid for a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionSource {
    Credit { remaining: u32 },
    TierAllowance,
}

impl ConsumptionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsumptionSource::Credit { .. } => "credit",
            ConsumptionSource::TierAllowance => "tier_allowance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    pub source: ConsumptionSource,
    pub tier: PlanTier,
}

/// Snapshot of a user's entitlements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSummary {
    pub tier: PlanTier,
    pub days_left: i64,
    pub daily_used: u32,
    pub daily_limit: u32,
    pub monthly_used: u32,
    pub monthly_limit: u32,
    pub credits: u32,
    pub total_generations: u32,
    /// Time until the daily window resets at midnight UTC.
    pub resets_in: Duration,
}

impl StatusSummary {
    pub fn render(&self) -> String {
        let mut lines = vec![format!("Plan: {}", self.tier.label())];
        if self.tier.is_paid() {
            lines.push(format!("Days left: {}", self.days_left));
        }
        lines.push(format!("Today: {}/{}", self.daily_used, self.daily_limit));
        lines.push(format!("This month: {}/{}", self.monthly_used, self.monthly_limit));
        lines.push(format!("Video credits: {}", self.credits));
        lines.push(format!("Videos created: {}", self.total_generations));
        let minutes = self.resets_in.num_minutes().max(0);
        lines.push(format!(
            "Daily limit resets in {}h {}m",
            minutes / 60,
            minutes % 60
        ));
        lines.join("\n")
    }

    /// One line on what the user can still generate.
    pub fn remaining_line(&self) -> String {
        if self.credits > 0 {
            return format!("You have {} video credit(s) left.", self.credits);
        }
        let left = self
            .daily_limit
            .saturating_sub(self.daily_used)
            .min(self.monthly_limit.saturating_sub(self.monthly_used));
        format!("You can create {} more video(s) today on the {} plan.", left, self.tier.label())
    }
}

/// Start of the UTC day containing `now`.
pub fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

/// Start of the UTC month containing `now`.
pub fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = NaiveDate::from_ymd_opt(now.year(), now.month(), 1).unwrap_or(now.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

pub struct EntitlementLedger {
    store: Arc<dyn Store>,
    limits: LimitTable,
}

impl EntitlementLedger {
    pub fn new(store: Arc<dyn Store>, limits: LimitTable) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &LimitTable {
        &self.limits
    }

    /// Load the account, persisting the downgrade if the subscription lapsed.
    async fn load_account(&self, user_id: UserId, now: DateTime<Utc>) -> WorkerResult<Option<UserAccount>> {
        let Some(account) = self.store.get_account(user_id).await? else {
            return Ok(None);
        };
        if account.is_expired(now) {
            info!(user_id = %user_id, tier = %account.tier, "Subscription expired, reverting to free");
            // The store re-checks expiry, so a renewal since our read survives.
            return self.store.expire_subscription(user_id, now).await;
        }
        Ok(Some(account))
    }

    async fn usage(&self, user_id: UserId, now: DateTime<Utc>) -> WorkerResult<(u32, u32)> {
        let daily = self
            .store
            .count_generations_since(user_id, day_start(now))
            .await?;
        let monthly = self
            .store
            .count_generations_since(user_id, month_start(now))
            .await?;
        Ok((daily, monthly))
    }

    pub async fn can_generate(&self, user_id: UserId) -> WorkerResult<Eligibility> {
        self.can_generate_at(user_id, Utc::now()).await
    }

    pub async fn can_generate_at(&self, user_id: UserId, now: DateTime<Utc>) -> WorkerResult<Eligibility> {
        let Some(account) = self.load_account(user_id, now).await? else {
            return Ok(Eligibility {
                allowed: false,
                reason: EligibilityReason::NoAccount,
                tier: PlanTier::Free,
            });
        };
        let tier = account.tier;

        if account.credits > 0 {
            return Ok(Eligibility {
                allowed: true,
                reason: EligibilityReason::Credits {
                    balance: account.credits,
                },
                tier,
            });
        }

        let (daily, monthly) = self.usage(user_id, now).await?;
        let allowed = self.limits.for_tier(tier).allows(daily, monthly);
        debug!(user_id = %user_id, tier = %tier, daily, monthly, allowed, "Checked tier limits");
        Ok(Eligibility {
            allowed,
            reason: if allowed {
                EligibilityReason::WithinLimits
            } else {
                EligibilityReason::LimitExceeded
            },
            tier,
        })
    }

    /// Spend one entitlement. Credits go first, then tier allowance.
    pub async fn consume(&self, user_id: UserId) -> WorkerResult<Consumption> {
        self.consume_at(user_id, Utc::now()).await
    }

    pub async fn consume_at(&self, user_id: UserId, now: DateTime<Utc>) -> WorkerResult<Consumption> {
        let account = self
            .load_account(user_id, now)
            .await?
            .ok_or_else(|| WorkerError::invalid_input("Please send /start first."))?;
        let tier = account.tier;

        if account.credits > 0 {
            // Another session may have spent the last credit since the read.
            if let Some(remaining) = self.store.try_debit_credit(user_id).await? {
                let source = ConsumptionSource::Credit { remaining };
                record_consumption(source.as_str());
                info!(user_id = %user_id, remaining, "Used credit");
                return Ok(Consumption { source, tier });
            }
        }

        let (daily, monthly) = self.usage(user_id, now).await?;
        if self.limits.for_tier(tier).allows(daily, monthly) {
            let source = ConsumptionSource::TierAllowance;
            record_consumption(source.as_str());
            info!(user_id = %user_id, tier = %tier, daily, monthly, "Used tier allowance");
            return Ok(Consumption { source, tier });
        }

        Err(WorkerError::LimitExceeded { tier })
    }

    /// Add credits, creating the account if absent. Returns the new balance.
    pub async fn grant_credits(&self, user_id: UserId, amount: u32) -> WorkerResult<u32> {
        if amount == 0 {
            return Err(WorkerError::invalid_input("credit grant must be positive"));
        }
        self.store.add_credits(user_id, amount).await
    }

    /// Set the tier with expiry `now + duration_days`.
    pub async fn apply_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        duration_days: u32,
    ) -> WorkerResult<UserAccount> {
        if duration_days == 0 {
            return Err(WorkerError::invalid_input("subscription duration must be positive"));
        }
        let expires_at = Utc::now() + Duration::days(i64::from(duration_days));
        let account = self
            .store
            .set_subscription(user_id, tier, Some(expires_at))
            .await?;
        info!(user_id = %user_id, tier = %tier, expires_at = %expires_at, "Applied subscription");
        Ok(account)
    }

    /// Grant a purchase and complete its invoice atomically.
    ///
    /// Returns `None` when the invoice was already settled.
    pub async fn settle_invoice(
        &self,
        invoice_id: &str,
        entitlement: Entitlement,
    ) -> WorkerResult<Option<UserAccount>> {
        if entitlement.is_empty() {
            return Err(WorkerError::invalid_input("purchase grants nothing"));
        }
        let account = self
            .store
            .settle_invoice(invoice_id, entitlement, Utc::now())
            .await?;
        if let Some(account) = &account {
            info!(
                user_id = %account.user_id,
                invoice_id,
                ?entitlement,
                "Applied purchase"
            );
        }
        Ok(account)
    }

    pub async fn status(&self, user_id: UserId) -> WorkerResult<StatusSummary> {
        self.status_at(user_id, Utc::now()).await
    }

    pub async fn status_at(&self, user_id: UserId, now: DateTime<Utc>) -> WorkerResult<StatusSummary> {
        let account = self
            .load_account(user_id, now)
            .await?
            .unwrap_or_else(|| UserAccount::placeholder(user_id));
        let limits = self.limits.for_tier(account.tier);
        let (daily_used, monthly_used) = self.usage(user_id, now).await?;
        let total_generations = self.store.count_generations(user_id).await?;

        Ok(StatusSummary {
            tier: account.tier,
            days_left: account.days_left(now),
            daily_used,
            daily_limit: limits.daily,
            monthly_used,
            monthly_limit: limits.monthly,
            credits: account.credits,
            total_generations,
            resets_in: day_start(now) + Duration::days(1) - now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::store::testing::InterceptStore;
    use reelgen_models::{GenerationRecord, GenerationStatus, GenerationUpdate, UserIdentity};

    async fn ledger_with_user(user: i64) -> (Arc<MemoryStore>, EntitlementLedger) {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_account(&UserIdentity::new(user, "tester"))
            .await
            .unwrap();
        let ledger = EntitlementLedger::new(store.clone(), LimitTable::default());
        (store, ledger)
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    async fn add_generation(store: &MemoryStore, user: i64, created_at: DateTime<Utc>) {
        let mut record = GenerationRecord::new(UserId(user), "idea");
        record.created_at = created_at;
        store.insert_generation(&record).await.unwrap();
    }

    #[test]
    fn test_windows() {
        let now = at("2026-03-15T17:45:00Z");
        assert_eq!(day_start(now), at("2026-03-15T00:00:00Z"));
        assert_eq!(month_start(now), at("2026-03-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_free_user_at_daily_limit_is_refused() {
        let (store, ledger) = ledger_with_user(1).await;
        let now = Utc::now();
        add_generation(&store, 1, now).await;

        let eligibility = ledger.can_generate_at(UserId(1), now).await.unwrap();
        assert!(!eligibility.allowed);
        assert_eq!(eligibility.reason, EligibilityReason::LimitExceeded);

        let err = ledger.consume_at(UserId(1), now).await.unwrap_err();
        assert!(err.is_limit_exceeded());
    }

    #[tokio::test]
    async fn test_daily_count_ignores_yesterday() {
        let (store, ledger) = ledger_with_user(1).await;
        let now = at("2026-03-15T09:00:00Z");
        add_generation(&store, 1, at("2026-03-14T23:59:00Z")).await;

        let eligibility = ledger.can_generate_at(UserId(1), now).await.unwrap();
        assert_eq!(eligibility.reason, EligibilityReason::WithinLimits);

        let summary = ledger.status_at(UserId(1), now).await.unwrap();
        assert_eq!(summary.daily_used, 0);
        assert_eq!(summary.monthly_used, 1);
        assert_eq!(summary.resets_in, Duration::hours(15));
    }

    #[tokio::test]
    async fn test_credit_used_before_allowance() {
        let (store, ledger) = ledger_with_user(1).await;
        ledger.grant_credits(UserId(1), 2).await.unwrap();
        add_generation(&store, 1, Utc::now()).await;

        let eligibility = ledger.can_generate(UserId(1)).await.unwrap();
        assert_eq!(eligibility.reason, EligibilityReason::Credits { balance: 2 });

        let consumption = ledger.consume(UserId(1)).await.unwrap();
        assert_eq!(consumption.source, ConsumptionSource::Credit { remaining: 1 });
    }

    #[tokio::test]
    async fn test_allowance_when_no_credits() {
        let (_store, ledger) = ledger_with_user(1).await;
        let consumption = ledger.consume(UserId(1)).await.unwrap();
        assert_eq!(consumption.source, ConsumptionSource::TierAllowance);
        assert_eq!(consumption.tier, PlanTier::Free);
    }

    #[tokio::test]
    async fn test_concurrent_consume_never_overdraws() {
        let (store, ledger) = ledger_with_user(1).await;
        // Exhaust the free allowance so only credits can pay.
        add_generation(&store, 1, Utc::now()).await;
        ledger.grant_credits(UserId(1), 3).await.unwrap();
        let ledger = Arc::new(ledger);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move { ledger.consume(UserId(1)).await })
            })
            .collect();
        let mut ok = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(c) => {
                    assert!(matches!(c.source, ConsumptionSource::Credit { .. }));
                    ok += 1;
                }
                Err(e) => assert!(e.is_limit_exceeded()),
            }
        }

        assert_eq!(ok, 3);
        let account = store.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
    }

    #[tokio::test]
    async fn test_expired_subscription_coerced_and_persisted() {
        let (store, ledger) = ledger_with_user(1).await;
        let now = Utc::now();
        store
            .set_subscription(UserId(1), PlanTier::Premium, Some(now - Duration::days(1)))
            .await
            .unwrap();

        let eligibility = ledger.can_generate_at(UserId(1), now).await.unwrap();
        assert_eq!(eligibility.tier, PlanTier::Free);

        let account = store.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Free);
        assert!(account.subscription_expires_at.is_none());
    }

    #[tokio::test]
    async fn test_expiry_downgrade_keeps_renewal_made_after_read() {
        let store = Arc::new(InterceptStore::new().renew_after_account_read());
        let now = Utc::now();
        store
            .inner
            .set_subscription(UserId(1), PlanTier::Lite, Some(now - Duration::days(1)))
            .await
            .unwrap();
        let ledger = EntitlementLedger::new(store.clone(), LimitTable::default());

        let eligibility = ledger.can_generate_at(UserId(1), now).await.unwrap();
        assert_eq!(eligibility.tier, PlanTier::Premium);

        let account = store.inner.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Premium);
        assert!(account.subscription_expires_at.is_some_and(|exp| exp > now));
    }

    #[tokio::test]
    async fn test_failed_generation_still_counts_today() {
        let (store, ledger) = ledger_with_user(1).await;
        let now = Utc::now();
        let record = GenerationRecord::new(UserId(1), "idea");
        store.insert_generation(&record).await.unwrap();
        store
            .update_generation(&record.id, &GenerationUpdate::failed("encoder crashed"))
            .await
            .unwrap();
        assert_eq!(
            store.get_generation(&record.id).await.unwrap().unwrap().status,
            GenerationStatus::Failed
        );

        let eligibility = ledger.can_generate_at(UserId(1), now).await.unwrap();
        assert!(!eligibility.allowed);
        assert_eq!(eligibility.reason, EligibilityReason::LimitExceeded);
        let summary = ledger.status_at(UserId(1), now).await.unwrap();
        assert_eq!(summary.daily_used, 1);
    }

    #[tokio::test]
    async fn test_apply_subscription() {
        let (_store, ledger) = ledger_with_user(1).await;
        let account = ledger
            .apply_subscription(UserId(1), PlanTier::Lite, 30)
            .await
            .unwrap();
        assert_eq!(account.tier, PlanTier::Lite);
        assert_eq!(account.days_left(Utc::now()), 29);

        let summary = ledger.status(UserId(1)).await.unwrap();
        assert_eq!(summary.daily_limit, 3);
        assert!(summary.render().contains("Plan: Lite"));
        assert!(summary.render().contains("Days left: 29"));
    }

    #[tokio::test]
    async fn test_rejects_empty_grants() {
        let (_store, ledger) = ledger_with_user(1).await;
        assert!(ledger.grant_credits(UserId(1), 0).await.is_err());
        assert!(ledger
            .apply_subscription(UserId(1), PlanTier::Premium, 0)
            .await
            .is_err());
        assert!(ledger
            .settle_invoice("inv-0", Entitlement::Credits(0))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = Arc::new(MemoryStore::new());
        let ledger = EntitlementLedger::new(store, LimitTable::default());
        let eligibility = ledger.can_generate(UserId(99)).await.unwrap();
        assert!(!eligibility.allowed);
        assert_eq!(eligibility.reason, EligibilityReason::NoAccount);
    }
}
