//! Store wrapper that injects races and outages around a [`MemoryStore`].

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reelgen_models::{
    ContentProfile, Entitlement, GenerationId, GenerationRecord, GenerationUpdate, InvoiceIntent,
    PlanTier, StoredProfile, UserAccount, UserId, UserIdentity,
};

use super::{MemoryStore, Store};
use crate::error::{WorkerError, WorkerResult};

#[derive(Default)]
pub struct InterceptStore {
    pub inner: MemoryStore,
    renew_after_read: AtomicBool,
    failing_settles: AtomicU32,
}

impl InterceptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a fresh 30-day premium plan right after every account read, as
    /// a payment settling between a caller's read and write would.
    pub fn renew_after_account_read(self) -> Self {
        self.renew_after_read.store(true, Ordering::SeqCst);
        self
    }

    /// Fail the next `n` settlements with a store error.
    pub fn fail_settlements(self, n: u32) -> Self {
        self.failing_settles.store(n, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl Store for InterceptStore {
    async fn upsert_account(&self, identity: &UserIdentity) -> WorkerResult<UserAccount> {
        self.inner.upsert_account(identity).await
    }

    async fn get_account(&self, user_id: UserId) -> WorkerResult<Option<UserAccount>> {
        let seen = self.inner.get_account(user_id).await?;
        if self.renew_after_read.load(Ordering::SeqCst) {
            self.inner
                .set_subscription(user_id, PlanTier::Premium, Some(Utc::now() + Duration::days(30)))
                .await?;
        }
        Ok(seen)
    }

    async fn set_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> WorkerResult<UserAccount> {
        self.inner.set_subscription(user_id, tier, expires_at).await
    }

    async fn expire_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        self.inner.expire_subscription(user_id, now).await
    }

    async fn try_debit_credit(&self, user_id: UserId) -> WorkerResult<Option<u32>> {
        self.inner.try_debit_credit(user_id).await
    }

    async fn add_credits(&self, user_id: UserId, amount: u32) -> WorkerResult<u32> {
        self.inner.add_credits(user_id, amount).await
    }

    async fn get_profile(&self, user_id: UserId) -> WorkerResult<Option<StoredProfile>> {
        self.inner.get_profile(user_id).await
    }

    async fn save_profile(
        &self,
        user_id: UserId,
        profile: &ContentProfile,
    ) -> WorkerResult<StoredProfile> {
        self.inner.save_profile(user_id, profile).await
    }

    async fn insert_generation(&self, record: &GenerationRecord) -> WorkerResult<()> {
        self.inner.insert_generation(record).await
    }

    async fn update_generation(
        &self,
        id: &GenerationId,
        update: &GenerationUpdate,
    ) -> WorkerResult<GenerationRecord> {
        self.inner.update_generation(id, update).await
    }

    async fn get_generation(&self, id: &GenerationId) -> WorkerResult<Option<GenerationRecord>> {
        self.inner.get_generation(id).await
    }

    async fn count_generations_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> WorkerResult<u32> {
        self.inner.count_generations_since(user_id, since).await
    }

    async fn count_generations(&self, user_id: UserId) -> WorkerResult<u32> {
        self.inner.count_generations(user_id).await
    }

    async fn save_invoice(&self, intent: &InvoiceIntent) -> WorkerResult<()> {
        self.inner.save_invoice(intent).await
    }

    async fn get_invoice(&self, id: &str) -> WorkerResult<Option<InvoiceIntent>> {
        self.inner.get_invoice(id).await
    }

    async fn list_open_invoices(&self) -> WorkerResult<Vec<InvoiceIntent>> {
        self.inner.list_open_invoices().await
    }

    async fn mark_invoice_paid(&self, id: &str) -> WorkerResult<()> {
        self.inner.mark_invoice_paid(id).await
    }

    async fn settle_invoice(
        &self,
        id: &str,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        let failing = self
            .failing_settles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WorkerError::store("unavailable"));
        }
        self.inner.settle_invoice(id, entitlement, now).await
    }
}
