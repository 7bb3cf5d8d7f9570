use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelgen_firestore::{
    AccountRepository, FirestoreClient, GenerationRepository, InvoiceRepository,
    ProfileRepository,
};
use reelgen_models::{
    ContentProfile, Entitlement, GenerationId, GenerationRecord, GenerationUpdate, InvoiceIntent, PlanTier,
    StoredProfile, UserAccount, UserId, UserIdentity,
};

use super::Store;
use crate::error::WorkerResult;

/// Store backed by the Firestore repositories.
pub struct FirestoreStore {
    accounts: AccountRepository,
    profiles: ProfileRepository,
    generations: GenerationRepository,
    invoices: InvoiceRepository,
}

impl FirestoreStore {
    pub fn new(client: FirestoreClient) -> Self {
        Self {
            accounts: AccountRepository::new(client.clone()),
            profiles: ProfileRepository::new(client.clone()),
            generations: GenerationRepository::new(client.clone()),
            invoices: InvoiceRepository::new(client),
        }
    }

    pub async fn from_env() -> WorkerResult<Self> {
        let client = FirestoreClient::from_env().await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Store for FirestoreStore {
    async fn upsert_account(&self, identity: &UserIdentity) -> WorkerResult<UserAccount> {
        Ok(self.accounts.upsert(identity).await?)
    }

    async fn get_account(&self, user_id: UserId) -> WorkerResult<Option<UserAccount>> {
        Ok(self.accounts.get(user_id).await?)
    }

    async fn set_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> WorkerResult<UserAccount> {
        Ok(self
            .accounts
            .set_subscription(user_id, tier, expires_at)
            .await?)
    }

    async fn expire_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        Ok(self.accounts.expire_subscription(user_id, now).await?)
    }

    async fn try_debit_credit(&self, user_id: UserId) -> WorkerResult<Option<u32>> {
        Ok(self.accounts.try_debit_credit(user_id).await?)
    }

    async fn add_credits(&self, user_id: UserId, amount: u32) -> WorkerResult<u32> {
        Ok(self.accounts.add_credits(user_id, amount).await?)
    }

    async fn get_profile(&self, user_id: UserId) -> WorkerResult<Option<StoredProfile>> {
        Ok(self.profiles.get(user_id).await?)
    }

    async fn save_profile(
        &self,
        user_id: UserId,
        profile: &ContentProfile,
    ) -> WorkerResult<StoredProfile> {
        Ok(self.profiles.save(user_id, profile).await?)
    }

    async fn insert_generation(&self, record: &GenerationRecord) -> WorkerResult<()> {
        Ok(self.generations.insert(record).await?)
    }

    async fn update_generation(
        &self,
        id: &GenerationId,
        update: &GenerationUpdate,
    ) -> WorkerResult<GenerationRecord> {
        Ok(self.generations.update(id, update).await?)
    }

    async fn get_generation(&self, id: &GenerationId) -> WorkerResult<Option<GenerationRecord>> {
        Ok(self.generations.get(id).await?)
    }

    async fn count_generations_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> WorkerResult<u32> {
        Ok(self.generations.count_since(user_id, since).await?)
    }

    async fn count_generations(&self, user_id: UserId) -> WorkerResult<u32> {
        Ok(self.generations.count_total(user_id).await?)
    }

    async fn save_invoice(&self, intent: &InvoiceIntent) -> WorkerResult<()> {
        Ok(self.invoices.save(intent).await?)
    }

    async fn get_invoice(&self, id: &str) -> WorkerResult<Option<InvoiceIntent>> {
        Ok(self.invoices.get(id).await?)
    }

    async fn list_open_invoices(&self) -> WorkerResult<Vec<InvoiceIntent>> {
        Ok(self.invoices.list_open().await?)
    }

    async fn mark_invoice_paid(&self, id: &str) -> WorkerResult<()> {
        Ok(self.invoices.mark_paid(id).await?)
    }

    async fn settle_invoice(
        &self,
        id: &str,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        Ok(self.invoices.settle(id, entitlement, now).await?)
    }
}
