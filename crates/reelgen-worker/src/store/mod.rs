//! Persistence seam for accounts, profiles, generations and invoices.
//!
//! Every mutation that other components race on is atomic at this layer:
//! credit debits, expiry downgrades, generation status changes and invoice
//! settlement.

mod firestore;
mod memory;
#[cfg(test)]
pub(crate) mod testing;

pub use firestore::FirestoreStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelgen_models::{
    ContentProfile, Entitlement, GenerationId, GenerationRecord, GenerationUpdate, InvoiceIntent, PlanTier,
    StoredProfile, UserAccount, UserId, UserIdentity,
};

use crate::error::WorkerResult;

#[async_trait]
pub trait Store: Send + Sync {
    /// Create the account on first contact, refresh identity fields otherwise.
    async fn upsert_account(&self, identity: &UserIdentity) -> WorkerResult<UserAccount>;

    async fn get_account(&self, user_id: UserId) -> WorkerResult<Option<UserAccount>>;

    async fn set_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> WorkerResult<UserAccount>;

    /// Revert a lapsed subscription to free, re-checking expiry at write time
    /// so a subscription applied after the caller's read is left alone.
    /// Returns the account as stored afterwards, `None` if there is none.
    async fn expire_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>>;

    /// Atomically decrement credits if positive. `None` when the balance was zero.
    async fn try_debit_credit(&self, user_id: UserId) -> WorkerResult<Option<u32>>;

    /// Atomically add credits. Returns the new balance.
    async fn add_credits(&self, user_id: UserId, amount: u32) -> WorkerResult<u32>;

    async fn get_profile(&self, user_id: UserId) -> WorkerResult<Option<StoredProfile>>;

    async fn save_profile(
        &self,
        user_id: UserId,
        profile: &ContentProfile,
    ) -> WorkerResult<StoredProfile>;

    async fn insert_generation(&self, record: &GenerationRecord) -> WorkerResult<()>;

    /// Apply a partial update. Backwards status moves are rejected.
    async fn update_generation(
        &self,
        id: &GenerationId,
        update: &GenerationUpdate,
    ) -> WorkerResult<GenerationRecord>;

    async fn get_generation(&self, id: &GenerationId) -> WorkerResult<Option<GenerationRecord>>;

    /// Generations created by `user_id` at or after `since`.
    async fn count_generations_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> WorkerResult<u32>;

    async fn count_generations(&self, user_id: UserId) -> WorkerResult<u32>;

    async fn save_invoice(&self, intent: &InvoiceIntent) -> WorkerResult<()>;

    async fn get_invoice(&self, id: &str) -> WorkerResult<Option<InvoiceIntent>>;

    /// Invoices in `created` or `paid`, oldest first.
    async fn list_open_invoices(&self) -> WorkerResult<Vec<InvoiceIntent>>;

    /// `created` becomes `paid`; any other status is left alone.
    async fn mark_invoice_paid(&self, id: &str) -> WorkerResult<()>;

    /// Apply `entitlement` to the invoice owner's account and mark the invoice
    /// `completed` in one atomic write. Returns the updated account, or `None`
    /// if the invoice was already completed. Either both changes land or
    /// neither does.
    async fn settle_invoice(
        &self,
        id: &str,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>>;
}
