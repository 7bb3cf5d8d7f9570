//! Invoice intent repository.
//!
//! Settlement writes the account grant and the `completed` status in one
//! commit, each guarded by the `updateTime` it was read at. Exactly one
//! caller's commit lands, and a failed commit leaves both documents as they
//! were.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reelgen_models::{Entitlement, InvoiceIntent, InvoiceStatus, PurchaseKind, UserAccount, UserId};
use tracing::{debug, info};

use crate::accounts::{account_fields, masked, AccountRepository, ACCOUNTS_COLLECTION};
use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::optimistic::retry_on_conflict;
use crate::types::{
    Document, FieldOp, Filter, StructuredQuery, ToFirestoreValue, Value, Write,
};

pub const INVOICES_COLLECTION: &str = "invoices";

/// Upper bound on open invoices read by one sweep.
const OPEN_INVOICE_LIMIT: i32 = 500;

#[derive(Clone)]
pub struct InvoiceRepository {
    client: FirestoreClient,
}

impl InvoiceRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn save(&self, intent: &InvoiceIntent) -> FirestoreResult<()> {
        self.client
            .update_document(INVOICES_COLLECTION, &intent.id, invoice_fields(intent), None)
            .await?;
        debug!(invoice_id = %intent.id, user_id = %intent.user_id, "Saved invoice intent");
        Ok(())
    }

    async fn fetch(&self, id: &str) -> FirestoreResult<Option<(InvoiceIntent, Option<String>)>> {
        let client = &self.client;
        let doc = client
            .with_retry("get_invoice", move || client.get_document(INVOICES_COLLECTION, id))
            .await?;
        doc.map(|d| {
            let intent = invoice_from_document(&d)?;
            Ok((intent, d.update_time))
        })
        .transpose()
    }

    pub async fn get(&self, id: &str) -> FirestoreResult<Option<InvoiceIntent>> {
        Ok(self.fetch(id).await?.map(|(intent, _)| intent))
    }

    /// Intents not yet settled, oldest first.
    pub async fn list_open(&self) -> FirestoreResult<Vec<InvoiceIntent>> {
        let open: Vec<&str> = vec![InvoiceStatus::Created.as_str(), InvoiceStatus::Paid.as_str()];
        let query = StructuredQuery::collection(INVOICES_COLLECTION)
            .filter_all(vec![Filter::field("status", FieldOp::In, open.to_firestore_value())])
            .limit(OPEN_INVOICE_LIMIT);
        let client = &self.client;
        let query = &query;
        let docs = client
            .with_retry("list_open_invoices", move || client.run_query("", query.clone()))
            .await?;

        let mut intents: Vec<InvoiceIntent> = docs
            .iter()
            .filter_map(|d| invoice_from_document(d).ok())
            .collect();
        intents.sort_by_key(|i| i.created_at);
        Ok(intents)
    }

    /// Record that the provider reports the invoice as paid.
    pub async fn mark_paid(&self, id: &str) -> FirestoreResult<()> {
        self.transition(id, "mark_invoice_paid", |status| {
            (status == InvoiceStatus::Created).then_some(InvoiceStatus::Paid)
        })
        .await
        .map(|_| ())
    }

    /// Grant `entitlement` to the invoice owner and complete the invoice.
    ///
    /// Returns the updated account, or `None` if the invoice was already
    /// completed.
    pub async fn settle(
        &self,
        id: &str,
        entitlement: Entitlement,
        now: DateTime<Utc>,
    ) -> FirestoreResult<Option<UserAccount>> {
        let accounts = AccountRepository::new(self.client.clone());
        let accounts = &accounts;

        let settled = retry_on_conflict("settle_invoice", move || async move {
            let (intent, invoice_time) = self
                .fetch(id)
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("invoices/{}", id)))?;
            if intent.status == InvoiceStatus::Completed {
                return Ok(None);
            }

            let stored = accounts.fetch(intent.user_id).await?;
            let exists = stored.is_some();
            let (mut account, account_time) = stored
                .unwrap_or_else(|| (UserAccount::placeholder(intent.user_id), None));
            entitlement.apply_to(&mut account, now);

            let name = self.client.document_name(ACCOUNTS_COLLECTION, &account.user_id.key());
            let account_write = if exists {
                let mask = entitlement.touched_fields();
                let write = Write::update(name, masked(account_fields(&account), mask)).mask(mask);
                match account_time.as_deref() {
                    Some(ts) => write.guard(Some(ts)),
                    None => write.must_exist(),
                }
            } else {
                Write::update(name, account_fields(&account)).guard(None)
            };

            let status_fields = HashMap::from([
                ("status".to_string(), InvoiceStatus::Completed.as_str().to_firestore_value()),
                ("updated_at".to_string(), now.to_firestore_value()),
            ]);
            let invoice_write = Write::update(
                self.client.document_name(INVOICES_COLLECTION, id),
                status_fields,
            )
            .mask(&["status", "updated_at"]);
            let invoice_write = match invoice_time.as_deref() {
                Some(ts) => invoice_write.guard(Some(ts)),
                None => invoice_write.must_exist(),
            };

            self.client.commit(vec![invoice_write, account_write]).await?;
            Ok(Some(account))
        })
        .await?;

        if settled.is_some() {
            info!(invoice_id = id, "Settled invoice");
        }
        Ok(settled)
    }

    async fn transition<F>(&self, id: &str, operation: &str, next: F) -> FirestoreResult<bool>
    where
        F: Fn(InvoiceStatus) -> Option<InvoiceStatus>,
    {
        let next = &next;
        retry_on_conflict(operation, move || async move {
            let (intent, update_time) = self
                .fetch(id)
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("invoices/{}", id)))?;
            let Some(status) = next(intent.status) else {
                return Ok(false);
            };

            let fields = HashMap::from([
                ("status".to_string(), status.as_str().to_firestore_value()),
                ("updated_at".to_string(), Utc::now().to_firestore_value()),
            ]);
            self.client
                .update_document_with_precondition(
                    INVOICES_COLLECTION,
                    id,
                    fields,
                    Some(vec!["status".to_string(), "updated_at".to_string()]),
                    update_time.as_deref(),
                )
                .await?;
            Ok(true)
        })
        .await
    }
}

fn invoice_fields(intent: &InvoiceIntent) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), intent.user_id.as_i64().to_firestore_value());
    fields.insert("kind".to_string(), intent.kind.kind_str().to_firestore_value());
    fields.insert("item_id".to_string(), intent.kind.item_id().to_firestore_value());
    fields.insert("amount".to_string(), intent.amount.to_firestore_value());
    fields.insert("asset".to_string(), intent.asset.to_firestore_value());
    fields.insert("status".to_string(), intent.status.as_str().to_firestore_value());
    fields.insert("pay_url".to_string(), intent.pay_url.to_firestore_value());
    fields.insert("created_at".to_string(), intent.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), intent.updated_at.to_firestore_value());
    fields
}

fn invoice_from_document(doc: &Document) -> FirestoreResult<InvoiceIntent> {
    let id = doc
        .doc_id()
        .ok_or_else(|| FirestoreError::invalid_response("invoice without name"))?;
    let user_id = doc
        .get::<i64>("user_id")
        .ok_or_else(|| FirestoreError::invalid_response(format!("invoice {} without user_id", id)))?;
    let kind = PurchaseKind::from_parts(
        &doc.get::<String>("kind").unwrap_or_default(),
        &doc.get::<String>("item_id").unwrap_or_default(),
    )
    .ok_or_else(|| FirestoreError::invalid_response(format!("invoice {} has unknown kind", id)))?;
    let status = doc
        .get::<String>("status")
        .and_then(|s| InvoiceStatus::from_str(&s))
        .ok_or_else(|| FirestoreError::invalid_response(format!("invoice {} has no status", id)))?;
    let now = Utc::now();

    Ok(InvoiceIntent {
        id: id.to_string(),
        user_id: UserId(user_id),
        kind,
        amount: doc.get("amount").unwrap_or(0.0),
        asset: doc.get("asset").unwrap_or_default(),
        status,
        pay_url: doc.get("pay_url"),
        created_at: doc.get("created_at").unwrap_or(now),
        updated_at: doc.get("updated_at").unwrap_or(now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::test_client;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const DOC_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/invoices/77";

    fn invoice_json(status: &str, update_time: &str) -> serde_json::Value {
        json!({
            "name": "projects/test-project/databases/(default)/documents/invoices/77",
            "fields": {
                "user_id": {"integerValue": "12"},
                "kind": {"stringValue": "pack"},
                "item_id": {"stringValue": "pack5"},
                "amount": {"doubleValue": 4.49},
                "asset": {"stringValue": "USDT"},
                "status": {"stringValue": status},
                "created_at": {"timestampValue": "2026-04-01T12:00:00Z"},
                "updated_at": {"timestampValue": "2026-04-01T12:00:00Z"}
            },
            "updateTime": update_time
        })
    }

    #[test]
    fn test_document_fields() {
        let intent = InvoiceIntent::new("9", UserId(2), PurchaseKind::subscription("lite_30"), 1.49, "TON");
        let mut doc = Document::new(invoice_fields(&intent));
        doc.name = Some("projects/p/databases/(default)/documents/invoices/9".into());
        let parsed = invoice_from_document(&doc).unwrap();
        assert_eq!(parsed.kind, PurchaseKind::subscription("lite_30"));
        assert_eq!(parsed.status, InvoiceStatus::Created);
        assert_eq!(parsed.asset, "TON");
    }

    const ACCOUNT_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/accounts/12";
    const COMMIT_PATH: &str = "/v1/projects/test-project/databases/(default)/documents:commit";

    #[tokio::test]
    async fn test_settle_commits_grant_and_status_together() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(invoice_json("paid", "t1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "projects/test-project/databases/(default)/documents/accounts/12",
                "fields": {
                    "user_id": {"integerValue": "12"},
                    "display_name": {"stringValue": "Cy"},
                    "tier": {"stringValue": "free"},
                    "credits": {"integerValue": "2"}
                },
                "updateTime": "a1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMMIT_PATH))
            .and(body_partial_json(json!({"writes": [
                {
                    "update": {"fields": {"status": {"stringValue": "completed"}}},
                    "currentDocument": {"updateTime": "t1"}
                },
                {
                    "update": {"fields": {"credits": {"integerValue": "7"}}},
                    "updateMask": {"fieldPaths": ["credits", "updated_at"]},
                    "currentDocument": {"updateTime": "a1"}
                }
            ]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "writeResults": [{"updateTime": "t2"}, {"updateTime": "a2"}],
                "commitTime": "t2"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let repo = InvoiceRepository::new(test_client(&server.uri()));
        let account = repo
            .settle("77", Entitlement::Credits(5), Utc::now())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(account.credits, 7);
    }

    #[tokio::test]
    async fn test_settle_completed_invoice_is_noop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(invoice_json("completed", "t1")))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMMIT_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let repo = InvoiceRepository::new(test_client(&server.uri()));
        assert!(repo
            .settle("77", Entitlement::Credits(5), Utc::now())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_invoice_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(invoice_json("paid", "t1")))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(ACCOUNT_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(COMMIT_PATH))
            .and(body_partial_json(json!({"writes": [
                {"currentDocument": {"updateTime": "t1"}},
                {"currentDocument": {"exists": false}}
            ]})))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let repo = InvoiceRepository::new(test_client(&server.uri()));
        let err = repo
            .settle("77", Entitlement::Credits(5), Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_settle_missing_invoice() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let repo = InvoiceRepository::new(test_client(&server.uri()));
        let result = repo.settle("77", Entitlement::Credits(1), Utc::now()).await;
        assert!(matches!(result, Err(FirestoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_open_skips_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/databases/(default)/documents:runQuery"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": invoice_json("created", "t1")},
                {"document": {"name": "projects/test-project/databases/(default)/documents/invoices/bad", "fields": {}}}
            ])))
            .mount(&server)
            .await;

        let repo = InvoiceRepository::new(test_client(&server.uri()));
        let open = repo.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, "77");
    }
}
