//! Account repository: tiers, subscription expiry and credit balances.
//!
//! Balance changes use optimistic locking on the document `updateTime`, so
//! concurrent debits never drive the balance below zero or lose an increment.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reelgen_models::{PlanTier, UserAccount, UserId, UserIdentity};
use tracing::info;

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::optimistic::retry_on_conflict;
use crate::types::{Document, ToFirestoreValue, Value};

pub const ACCOUNTS_COLLECTION: &str = "accounts";

/// Repository for user accounts.
#[derive(Clone)]
pub struct AccountRepository {
    client: FirestoreClient,
}

impl AccountRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    /// Fetch an account with its document `updateTime`.
    pub(crate) async fn fetch(&self, user_id: UserId) -> FirestoreResult<Option<(UserAccount, Option<String>)>> {
        let key = user_id.key();
        let key = key.as_str();
        let client = &self.client;
        let doc = client
            .with_retry("get_account", move || client.get_document(ACCOUNTS_COLLECTION, key))
            .await?;
        doc.map(|d| {
            let account = account_from_document(&d)?;
            Ok((account, d.update_time))
        })
        .transpose()
    }

    pub async fn get(&self, user_id: UserId) -> FirestoreResult<Option<UserAccount>> {
        Ok(self.fetch(user_id).await?.map(|(account, _)| account))
    }

    /// Create the account if absent, refreshing names if they changed.
    pub async fn upsert(&self, identity: &UserIdentity) -> FirestoreResult<UserAccount> {
        retry_on_conflict("upsert_account", move || async move {
            match self.fetch(identity.user_id).await? {
                None => {
                    let account = UserAccount::new(identity);
                    self.client
                        .create_document(
                            ACCOUNTS_COLLECTION,
                            &identity.user_id.key(),
                            account_fields(&account),
                        )
                        .await?;
                    info!(user_id = %identity.user_id, "Created account");
                    Ok(account)
                }
                Some((mut account, update_time)) => {
                    if account.display_name == identity.display_name
                        && account.username == identity.username
                    {
                        return Ok(account);
                    }
                    account.display_name = identity.display_name.clone();
                    account.username = identity.username.clone();
                    account.updated_at = Utc::now();
                    self.write_masked(
                        &account,
                        &["display_name", "username", "updated_at"],
                        update_time.as_deref(),
                    )
                    .await?;
                    Ok(account)
                }
            }
        })
        .await
    }

    /// Set tier and expiry, creating a placeholder account if needed.
    pub async fn set_subscription(
        &self,
        user_id: UserId,
        tier: PlanTier,
        expires_at: Option<DateTime<Utc>>,
    ) -> FirestoreResult<UserAccount> {
        self.modify("set_subscription", user_id, |account| {
            account.tier = tier;
            account.subscription_expires_at = expires_at;
            Some(&["tier", "subscription_expires_at", "updated_at"][..])
        })
        .await
        .map(|(account, _)| account)
    }

    /// Revert a lapsed paid tier to free.
    ///
    /// Expiry is re-checked on every read of the guarded loop, so a
    /// subscription written after the caller's own read is never erased.
    pub async fn expire_subscription(
        &self,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> FirestoreResult<Option<UserAccount>> {
        retry_on_conflict("expire_subscription", move || async move {
            let Some((mut account, update_time)) = self.fetch(user_id).await? else {
                return Ok(None);
            };
            if !account.is_expired(now) {
                return Ok(Some(account));
            }
            account.tier = PlanTier::Free;
            account.subscription_expires_at = None;
            account.updated_at = now;
            self.write_masked(
                &account,
                &["tier", "subscription_expires_at", "updated_at"],
                update_time.as_deref(),
            )
            .await?;
            info!(user_id = %user_id, "Subscription expired, reverted to free");
            Ok(Some(account))
        })
        .await
    }

    /// Decrement the balance by one if positive.
    ///
    /// Returns the remaining balance, or `None` when there was nothing to
    /// debit.
    pub async fn try_debit_credit(&self, user_id: UserId) -> FirestoreResult<Option<u32>> {
        let (account, changed) = self
            .modify("debit_credit", user_id, |account| {
                if account.credits == 0 {
                    return None;
                }
                account.credits -= 1;
                Some(&["credits", "updated_at"][..])
            })
            .await?;
        Ok(changed.then_some(account.credits))
    }

    /// Add credits, creating the account if absent. Returns the new balance.
    pub async fn add_credits(&self, user_id: UserId, amount: u32) -> FirestoreResult<u32> {
        let (account, _) = self
            .modify("add_credits", user_id, |account| {
                account.credits = account.credits.saturating_add(amount);
                Some(&["credits", "updated_at"][..])
            })
            .await?;
        info!(user_id = %user_id, amount, balance = account.credits, "Added credits");
        Ok(account.credits)
    }

    /// Guarded read-modify-write. `change` returns the masked fields it
    /// touched, or `None` to leave the document as is.
    async fn modify<F>(
        &self,
        operation: &str,
        user_id: UserId,
        change: F,
    ) -> FirestoreResult<(UserAccount, bool)>
    where
        F: Fn(&mut UserAccount) -> Option<&'static [&'static str]>,
    {
        let change = &change;
        retry_on_conflict(operation, move || async move {
            match self.fetch(user_id).await? {
                Some((mut account, update_time)) => match change(&mut account) {
                    None => Ok((account, false)),
                    Some(mask) => {
                        account.updated_at = Utc::now();
                        self.write_masked(&account, mask, update_time.as_deref())
                            .await?;
                        Ok((account, true))
                    }
                },
                None => {
                    let mut account = UserAccount::placeholder(user_id);
                    let changed = change(&mut account).is_some();
                    self.client
                        .create_document(
                            ACCOUNTS_COLLECTION,
                            &user_id.key(),
                            account_fields(&account),
                        )
                        .await?;
                    Ok((account, changed))
                }
            }
        })
        .await
    }

    async fn write_masked(
        &self,
        account: &UserAccount,
        mask: &[&str],
        update_time: Option<&str>,
    ) -> FirestoreResult<Document> {
        let fields = masked(account_fields(account), mask);
        self.client
            .update_document_with_precondition(
                ACCOUNTS_COLLECTION,
                &account.user_id.key(),
                fields,
                Some(mask.iter().map(|s| s.to_string()).collect()),
                update_time,
            )
            .await
    }
}

/// Keep only the fields named in `mask`.
pub(crate) fn masked(mut all: HashMap<String, Value>, mask: &[&str]) -> HashMap<String, Value> {
    all.retain(|k, _| mask.contains(&k.as_str()));
    all
}

pub(crate) fn account_fields(account: &UserAccount) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), account.user_id.as_i64().to_firestore_value());
    fields.insert("display_name".to_string(), account.display_name.to_firestore_value());
    fields.insert("username".to_string(), account.username.to_firestore_value());
    fields.insert("tier".to_string(), account.tier.as_str().to_firestore_value());
    fields.insert(
        "subscription_expires_at".to_string(),
        account.subscription_expires_at.to_firestore_value(),
    );
    fields.insert("credits".to_string(), account.credits.to_firestore_value());
    fields.insert("created_at".to_string(), account.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), account.updated_at.to_firestore_value());
    fields
}

fn account_from_document(doc: &Document) -> FirestoreResult<UserAccount> {
    let user_id = doc
        .get::<i64>("user_id")
        .or_else(|| doc.doc_id().and_then(|id| id.parse().ok()))
        .ok_or_else(|| FirestoreError::invalid_response("account without user_id"))?;
    let now = Utc::now();

    Ok(UserAccount {
        user_id: UserId(user_id),
        display_name: doc.get("display_name").unwrap_or_default(),
        username: doc.get("username"),
        tier: PlanTier::from_str(&doc.get::<String>("tier").unwrap_or_default()),
        subscription_expires_at: doc.get("subscription_expires_at"),
        credits: doc.get("credits").unwrap_or(0),
        created_at: doc.get("created_at").unwrap_or(now),
        updated_at: doc.get("updated_at").unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ACCOUNT_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/accounts/42";

    fn account_json(credits: u32, update_time: &str) -> serde_json::Value {
        json!({
            "name": "projects/test-project/databases/(default)/documents/accounts/42",
            "fields": {
                "user_id": {"integerValue": "42"},
                "display_name": {"stringValue": "Ann"},
                "username": {"nullValue": null},
                "tier": {"stringValue": "free"},
                "subscription_expires_at": {"nullValue": null},
                "credits": {"integerValue": credits.to_string()},
                "created_at": {"timestampValue": "2026-01-01T00:00:00Z"},
                "updated_at": {"timestampValue": "2026-01-01T00:00:00Z"}
            },
            "updateTime": update_time
        })
    }

    #[test]
    fn test_document_roundtrip_fields() {
        let account = UserAccount::new(&UserIdentity::new(UserId(7), "Bo").with_username("bo"));
        let doc = Document::new(account_fields(&account));
        let parsed = account_from_document(&doc).unwrap();
        assert_eq!(parsed.user_id, UserId(7));
        assert_eq!(parsed.username.as_deref(), Some("bo"));
        assert_eq!(parsed.tier, PlanTier::Free);
    }

    #[tokio::test]
    async fn test_debit_with_zero_balance_writes_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json(0, "t1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let repo = AccountRepository::new(test_client(&server.uri()));
        assert_eq!(repo.try_debit_credit(UserId(42)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_debit_retries_after_conflict() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json(3, "t1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json(2, "t2")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(ACCOUNT_PATH))
            .and(query_param("currentDocument.updateTime", "t1"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(ACCOUNT_PATH))
            .and(query_param("currentDocument.updateTime", "t2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json(1, "t3")))
            .expect(1)
            .mount(&server)
            .await;

        let repo = AccountRepository::new(test_client(&server.uri()));
        assert_eq!(repo.try_debit_credit(UserId(42)).await.unwrap(), Some(1));
    }

    fn lapsed_lite_json(update_time: &str) -> serde_json::Value {
        let mut doc = account_json(0, update_time);
        doc["fields"]["tier"] = json!({"stringValue": "lite"});
        doc["fields"]["subscription_expires_at"] = json!({"timestampValue": "2026-01-01T00:00:00Z"});
        doc
    }

    #[tokio::test]
    async fn test_expire_skips_subscription_renewed_after_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(lapsed_lite_json("t1")))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        let mut renewed = account_json(0, "t2");
        renewed["fields"]["tier"] = json!({"stringValue": "premium"});
        renewed["fields"]["subscription_expires_at"] = json!({"timestampValue": "2099-01-01T00:00:00Z"});
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(renewed))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(ACCOUNT_PATH))
            .and(query_param("currentDocument.updateTime", "t1"))
            .respond_with(ResponseTemplate::new(412))
            .expect(1)
            .mount(&server)
            .await;

        let repo = AccountRepository::new(test_client(&server.uri()));
        let now = DateTime::parse_from_rfc3339("2026-02-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let account = repo.expire_subscription(UserId(42), now).await.unwrap().unwrap();
        assert_eq!(account.tier, PlanTier::Premium);
        assert!(account.subscription_expires_at.is_some());
    }

    #[tokio::test]
    async fn test_add_credits_creates_missing_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/databases/(default)/documents/accounts"))
            .and(query_param("documentId", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(account_json(5, "t1")))
            .expect(1)
            .mount(&server)
            .await;

        let repo = AccountRepository::new(test_client(&server.uri()));
        assert_eq!(repo.add_credits(UserId(42), 5).await.unwrap(), 5);
    }
}
