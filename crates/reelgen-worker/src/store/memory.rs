use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelgen_models::{
    ContentProfile, Entitlement, GenerationId, GenerationRecord, GenerationUpdate, InvoiceIntent,
    InvoiceStatus, PlanTier, StoredProfile, UserAccount, UserId, UserIdentity,
};
use tokio::sync::Mutex;

use super::Store;
use crate::error::{WorkerError, WorkerResult};

#[derive(Default)]
struct Tables {
    accounts: HashMap<UserId, UserAccount>,
    profiles: HashMap<UserId, StoredProfile>,
    generations: HashMap<GenerationId, GenerationRecord>,
    invoices: HashMap<String, InvoiceIntent>,
}

/// Process-local store. Each operation holds one lock, so every mutation is
/// atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn account_entry(tables: &mut Tables, user_id: UserId) -> &mut UserAccount {
        tables
            .accounts
            .entry(user_id)
            .or_insert_with(|| UserAccount::placeholder(user_id))
    }

    async fn set_invoice_status<F>(&self, id: &str, next: F) -> WorkerResult<bool>
    where
        F: FnOnce(InvoiceStatus) -> Option<InvoiceStatus> + Send,
    {
        let mut tables = self.tables.lock().await;
        let intent = tables
            .invoices
            .get_mut(id)
            .ok_or_else(|| WorkerError::IntentNotFound(id.to_string()))?;
        match next(intent.status) {
            Some(status) => {
                intent.status = status;
                intent.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_account(&self, identity: &UserIdentity) -> WorkerResult<UserAccount> {
        let mut tables = self.tables.lock().await;
        let account = tables
            .accounts
            .entry(identity.user_id)
            .and_modify(|account| {
                if account.display_name != identity.display_name
                    || account.username != identity.username
                {
                    account.display_name = identity.display_name.clone();
                    account.username = identity.username.clone();
                    account.updated_at = Utc::now();
                }
            })
            .or_insert_with(|| UserAccount::new(identity));
        Ok(account.clone())
    }

    async fn get_account(&self, user_id: UserId) -> WorkerResult<Option<UserAccount>> {
        Ok(self.tables.lock().await.accounts.get(&user_id).cloned())
    }

    async fn set_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> WorkerResult<UserAccount> {
        let mut tables = self.tables.lock().await;
        let account = Self::account_entry(&mut tables, user_id);
        account.tier = tier;
        account.subscription_expires_at = expires_at;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn expire_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        let mut tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        if account.is_expired(now) {
            account.tier = PlanTier::Free;
            account.subscription_expires_at = None;
            account.updated_at = now;
        }
        Ok(Some(account.clone()))
    }

    async fn try_debit_credit(&self, user_id: UserId) -> WorkerResult<Option<u32>> {
        let mut tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get_mut(&user_id) else {
            return Ok(None);
        };
        if account.credits == 0 {
            return Ok(None);
        }
        account.credits -= 1;
        account.updated_at = Utc::now();
        Ok(Some(account.credits))
    }

    async fn add_credits(&self, user_id: UserId, amount: u32) -> WorkerResult<u32> {
        let mut tables = self.tables.lock().await;
        let account = Self::account_entry(&mut tables, user_id);
        account.credits = account.credits.saturating_add(amount);
        account.updated_at = Utc::now();
        Ok(account.credits)
    }

    async fn get_profile(&self, user_id: UserId) -> WorkerResult<Option<StoredProfile>> {
        Ok(self.tables.lock().await.profiles.get(&user_id).cloned())
    }

    async fn save_profile(
        &self,
        user_id: UserId,
        profile: &ContentProfile,
    ) -> WorkerResult<StoredProfile> {
        let stored = StoredProfile {
            user_id,
            profile: profile.clone(),
            updated_at: Utc::now(),
        };
        self.tables
            .lock()
            .await
            .profiles
            .insert(user_id, stored.clone());
        Ok(stored)
    }

    async fn insert_generation(&self, record: &GenerationRecord) -> WorkerResult<()> {
        self.tables
            .lock()
            .await
            .generations
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update_generation(
        &self,
        id: &GenerationId,
        update: &GenerationUpdate,
    ) -> WorkerResult<GenerationRecord> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .generations
            .get_mut(id)
            .ok_or_else(|| WorkerError::store(format!("generation {} not found", id)))?;
        record.apply(update)?;
        Ok(record.clone())
    }

    async fn get_generation(&self, id: &GenerationId) -> WorkerResult<Option<GenerationRecord>> {
        Ok(self.tables.lock().await.generations.get(id).cloned())
    }

    async fn count_generations_since(
        &self,
        user_id: UserId,
        since: DateTime<Utc>,
    ) -> WorkerResult<u32> {
        let tables = self.tables.lock().await;
        let count = tables
            .generations
            .values()
            .filter(|r| r.user_id == user_id && r.created_at >= since)
            .count();
        Ok(count as u32)
    }

    async fn count_generations(&self, user_id: UserId) -> WorkerResult<u32> {
        let tables = self.tables.lock().await;
        Ok(tables
            .generations
            .values()
            .filter(|r| r.user_id == user_id)
            .count() as u32)
    }

    async fn save_invoice(&self, intent: &InvoiceIntent) -> WorkerResult<()> {
        self.tables
            .lock()
            .await
            .invoices
            .insert(intent.id.clone(), intent.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: &str) -> WorkerResult<Option<InvoiceIntent>> {
        Ok(self.tables.lock().await.invoices.get(id).cloned())
    }

    async fn list_open_invoices(&self) -> WorkerResult<Vec<InvoiceIntent>> {
        let tables = self.tables.lock().await;
        let mut open: Vec<InvoiceIntent> = tables
            .invoices
            .values()
            .filter(|i| !i.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|i| i.created_at);
        Ok(open)
    }

    async fn mark_invoice_paid(&self, id: &str) -> WorkerResult<()> {
        self.set_invoice_status(id, |status| {
            (status == InvoiceStatus::Created).then_some(InvoiceStatus::Paid)
        })
        .await
        .map(|_| ())
    }

    async fn settle_invoice(
        &self,
        id: &str,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> WorkerResult<Option<UserAccount>> {
        let mut tables = self.tables.lock().await;
        let intent = tables
            .invoices
            .get_mut(id)
            .ok_or_else(|| WorkerError::IntentNotFound(id.to_string()))?;
        if intent.status == InvoiceStatus::Completed {
            return Ok(None);
        }
        intent.status = InvoiceStatus::Completed;
        intent.updated_at = now;
        let user_id = intent.user_id;

        let account = Self::account_entry(&mut tables, user_id);
        entitlement.apply_to(account, now);
        Ok(Some(account.clone()))
    }
}

#[cfg(test)]
impl MemoryStore {
    /// All generation records of a user, oldest first.
    pub async fn generations_of(&self, user_id: UserId) -> Vec<GenerationRecord> {
        let tables = self.tables.lock().await;
        let mut records: Vec<_> = tables
            .generations
            .values()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reelgen_models::{GenerationStatus, PurchaseKind};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_upsert_keeps_balance() {
        let store = MemoryStore::new();
        store
            .upsert_account(&UserIdentity::new(1, "Ann"))
            .await
            .unwrap();
        store.add_credits(UserId(1), 3).await.unwrap();

        let account = store
            .upsert_account(&UserIdentity::new(1, "Ann B").with_username("annb"))
            .await
            .unwrap();
        assert_eq!(account.credits, 3);
        assert_eq!(account.display_name, "Ann B");
        assert_eq!(account.username.as_deref(), Some("annb"));
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let store = Arc::new(MemoryStore::new());
        store.add_credits(UserId(7), 3).await.unwrap();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.try_debit_credit(UserId(7)).await.unwrap() })
            })
            .collect();
        let mut debited = 0;
        for task in tasks {
            if task.await.unwrap().is_some() {
                debited += 1;
            }
        }

        assert_eq!(debited, 3);
        let account = store.get_account(UserId(7)).await.unwrap().unwrap();
        assert_eq!(account.credits, 0);
    }

    #[tokio::test]
    async fn test_debit_unknown_user() {
        let store = MemoryStore::new();
        assert_eq!(store.try_debit_credit(UserId(404)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_generation_update_rejects_backwards_move() {
        let store = MemoryStore::new();
        let record = GenerationRecord::new(UserId(1), "idea").with_status(GenerationStatus::AudioReady);
        store.insert_generation(&record).await.unwrap();

        let err = store
            .update_generation(&record.id, &GenerationUpdate::status(GenerationStatus::Processing))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Transition(_)));

        let updated = store
            .update_generation(&record.id, &GenerationUpdate::failed("encoder crashed"))
            .await
            .unwrap();
        assert_eq!(updated.status, GenerationStatus::Failed);
        assert_eq!(updated.error_message.as_deref(), Some("encoder crashed"));
    }

    #[tokio::test]
    async fn test_count_since() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut old = GenerationRecord::new(UserId(1), "old");
        old.created_at = now - Duration::days(2);
        store.insert_generation(&old).await.unwrap();
        store
            .insert_generation(&GenerationRecord::new(UserId(1), "new"))
            .await
            .unwrap();
        store
            .insert_generation(&GenerationRecord::new(UserId(2), "other"))
            .await
            .unwrap();

        let since = now - Duration::hours(1);
        assert_eq!(store.count_generations_since(UserId(1), since).await.unwrap(), 1);
        assert_eq!(store.count_generations(UserId(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_settle_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let intent = InvoiceIntent::new("inv-1", UserId(1), PurchaseKind::pack("pack5"), 4.49, "USDT");
        store.save_invoice(&intent).await.unwrap();
        store.mark_invoice_paid("inv-1").await.unwrap();

        let now = Utc::now();
        let (a, b) = tokio::join!(
            store.settle_invoice("inv-1", Entitlement::Credits(5), now),
            store.settle_invoice("inv-1", Entitlement::Credits(5), now)
        );
        assert!(a.unwrap().is_some() ^ b.unwrap().is_some());
        assert!(store.list_open_invoices().await.unwrap().is_empty());

        let account = store.get_account(UserId(1)).await.unwrap().unwrap();
        assert_eq!(account.credits, 5);
        let intent = store.get_invoice("inv-1").await.unwrap().unwrap();
        assert_eq!(intent.status, InvoiceStatus::Completed);
    }

    #[tokio::test]
    async fn test_expire_rechecks_under_lock() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .set_subscription(UserId(3), PlanTier::Lite, Some(now - Duration::days(1)))
            .await
            .unwrap();
        let account = store.expire_subscription(UserId(3), now).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Free);
        assert_eq!(account.subscription_expires_at, None);

        store
            .set_subscription(UserId(3), PlanTier::Premium, Some(now + Duration::days(30)))
            .await
            .unwrap();
        let account = store.expire_subscription(UserId(3), now).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Premium);

        assert!(store.expire_subscription(UserId(404), now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_invoice() {
        let store = MemoryStore::new();
        let err = store
            .settle_invoice("nope", Entitlement::Credits(1), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::IntentNotFound(_)));
    }
}
