//! Generation record repository.
//!
//! Records are append-only per attempt; status changes go through
//! [`GenerationRecord::apply`] so a stale writer can never move a record
//! backwards.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use reelgen_models::{
    GenerationId, GenerationRecord, GenerationStatus, GenerationUpdate, UserId,
};
use tracing::debug;

use crate::client::FirestoreClient;
use crate::error::{FirestoreError, FirestoreResult};
use crate::optimistic::retry_on_conflict;
use crate::types::{Document, FieldOp, Filter, StructuredQuery, ToFirestoreValue, Value};

pub const GENERATIONS_COLLECTION: &str = "generations";

#[derive(Clone)]
pub struct GenerationRepository {
    client: FirestoreClient,
}

impl GenerationRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn insert(&self, record: &GenerationRecord) -> FirestoreResult<()> {
        self.client
            .create_document(
                GENERATIONS_COLLECTION,
                record.id.as_str(),
                generation_fields(record),
            )
            .await?;
        debug!(generation_id = %record.id, user_id = %record.user_id, "Inserted generation");
        Ok(())
    }

    async fn fetch(
        &self,
        id: &GenerationId,
    ) -> FirestoreResult<Option<(GenerationRecord, Option<String>)>> {
        let client = &self.client;
        let key = id.as_str();
        let doc = client
            .with_retry("get_generation", move || {
                client.get_document(GENERATIONS_COLLECTION, key)
            })
            .await?;
        doc.map(|d| {
            let record = generation_from_document(&d)?;
            Ok((record, d.update_time))
        })
        .transpose()
    }

    pub async fn get(&self, id: &GenerationId) -> FirestoreResult<Option<GenerationRecord>> {
        Ok(self.fetch(id).await?.map(|(record, _)| record))
    }

    /// Apply a partial update guarded by the document `updateTime`.
    pub async fn update(
        &self,
        id: &GenerationId,
        update: &GenerationUpdate,
    ) -> FirestoreResult<GenerationRecord> {
        retry_on_conflict("update_generation", move || async move {
            let (mut record, update_time) = self
                .fetch(id)
                .await?
                .ok_or_else(|| FirestoreError::not_found(format!("generations/{}", id)))?;
            record
                .apply(update)
                .map_err(|e| FirestoreError::request_failed(e.to_string()))?;

            let mask = update_mask(update);
            let all = generation_fields(&record);
            let fields: HashMap<String, Value> = mask
                .iter()
                .filter_map(|k| all.get(*k).map(|v| (k.to_string(), v.clone())))
                .collect();
            self.client
                .update_document_with_precondition(
                    GENERATIONS_COLLECTION,
                    id.as_str(),
                    fields,
                    Some(mask.iter().map(|s| s.to_string()).collect()),
                    update_time.as_deref(),
                )
                .await?;
            Ok(record)
        })
        .await
    }

    /// Records created by `user_id` at or after `since`.
    pub async fn count_since(&self, user_id: UserId, since: DateTime<Utc>) -> FirestoreResult<u32> {
        self.count(vec![
            Filter::field("user_id", FieldOp::Equal, user_id.as_i64().to_firestore_value()),
            Filter::field("created_at", FieldOp::GreaterThanOrEqual, since.to_firestore_value()),
        ])
        .await
    }

    pub async fn count_total(&self, user_id: UserId) -> FirestoreResult<u32> {
        self.count(vec![Filter::field(
            "user_id",
            FieldOp::Equal,
            user_id.as_i64().to_firestore_value(),
        )])
        .await
    }

    async fn count(&self, filters: Vec<Filter>) -> FirestoreResult<u32> {
        let query = StructuredQuery::collection(GENERATIONS_COLLECTION)
            .filter_all(filters)
            .keys_only();
        let client = &self.client;
        let query = &query;
        let docs = client
            .with_retry("count_generations", move || client.run_query("", query.clone()))
            .await?;
        Ok(u32::try_from(docs.len()).unwrap_or(u32::MAX))
    }
}

fn update_mask(update: &GenerationUpdate) -> Vec<&'static str> {
    let mut mask = vec!["updated_at"];
    if update.status.is_some() {
        mask.push("status");
    }
    if update.script.is_some() {
        mask.push("script");
    }
    if update.audio_path.is_some() {
        mask.push("audio_path");
    }
    if update.video_path.is_some() {
        mask.push("video_path");
    }
    if update.error_message.is_some() {
        mask.push("error_message");
    }
    mask
}

fn generation_fields(record: &GenerationRecord) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_id".to_string(), record.user_id.as_i64().to_firestore_value());
    fields.insert("prompt".to_string(), record.prompt.to_firestore_value());
    fields.insert("script".to_string(), record.script.to_firestore_value());
    fields.insert("audio_path".to_string(), record.audio_path.to_firestore_value());
    fields.insert("video_path".to_string(), record.video_path.to_firestore_value());
    fields.insert("status".to_string(), record.status.as_str().to_firestore_value());
    fields.insert("error_message".to_string(), record.error_message.to_firestore_value());
    fields.insert("created_at".to_string(), record.created_at.to_firestore_value());
    fields.insert("updated_at".to_string(), record.updated_at.to_firestore_value());
    fields
}

fn generation_from_document(doc: &Document) -> FirestoreResult<GenerationRecord> {
    let id = doc
        .doc_id()
        .ok_or_else(|| FirestoreError::invalid_response("generation without name"))?;
    let user_id = doc
        .get::<i64>("user_id")
        .ok_or_else(|| FirestoreError::invalid_response(format!("generation {} without user_id", id)))?;
    let status = doc
        .get::<String>("status")
        .and_then(|s| GenerationStatus::from_str(&s))
        .unwrap_or(GenerationStatus::Failed);
    let now = Utc::now();

    Ok(GenerationRecord {
        id: GenerationId::from_string(id),
        user_id: UserId(user_id),
        prompt: doc.get("prompt").unwrap_or_default(),
        script: doc.get("script"),
        audio_path: doc.get("audio_path"),
        video_path: doc.get("video_path"),
        status,
        error_message: doc.get("error_message"),
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

    const DOC_PATH: &str = "/v1/projects/test-project/databases/(default)/documents/generations/g1";

    fn generation_json(status: &str, update_time: &str) -> serde_json::Value {
        json!({
            "name": "projects/test-project/databases/(default)/documents/generations/g1",
            "fields": {
                "user_id": {"integerValue": "5"},
                "prompt": {"stringValue": "morning routines"},
                "script": {"nullValue": null},
                "status": {"stringValue": status},
                "created_at": {"timestampValue": "2026-03-01T08:00:00Z"},
                "updated_at": {"timestampValue": "2026-03-01T08:00:00Z"}
            },
            "updateTime": update_time
        })
    }

    #[test]
    fn test_update_mask_tracks_set_fields() {
        let update = GenerationUpdate::status(GenerationStatus::AudioReady).with_audio_path("/tmp/a.mp3");
        assert_eq!(update_mask(&update), vec!["updated_at", "status", "audio_path"]);
    }

    #[test]
    fn test_document_without_status_reads_as_failed() {
        let mut doc = Document::new(HashMap::from([(
            "user_id".to_string(),
            Value::IntegerValue("1".into()),
        )]));
        doc.name = Some("projects/p/databases/(default)/documents/generations/x".into());
        let record = generation_from_document(&doc).unwrap();
        assert_eq!(record.id.as_str(), "x");
        assert_eq!(record.status, GenerationStatus::Failed);
    }

    #[tokio::test]
    async fn test_update_sends_masked_fields() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_json("processing", "t1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path(DOC_PATH))
            .and(query_param("currentDocument.updateTime", "t1"))
            .and(body_partial_json(json!({
                "fields": {"status": {"stringValue": "script_ready"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_json("script_ready", "t2")))
            .expect(1)
            .mount(&server)
            .await;

        let repo = GenerationRepository::new(test_client(&server.uri()));
        let update = GenerationUpdate {
            status: Some(GenerationStatus::ScriptReady),
            script: Some("Hook. Body.".into()),
            ..Default::default()
        };
        let record = repo.update(&GenerationId::from_string("g1"), &update).await.unwrap();
        assert_eq!(record.status, GenerationStatus::ScriptReady);
        assert_eq!(record.script.as_deref(), Some("Hook. Body."));
    }

    #[tokio::test]
    async fn test_update_rejects_backward_move() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(DOC_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(generation_json("completed", "t1")))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let repo = GenerationRepository::new(test_client(&server.uri()));
        let result = repo
            .update(
                &GenerationId::from_string("g1"),
                &GenerationUpdate::status(GenerationStatus::Processing),
            )
            .await;
        assert!(matches!(result, Err(FirestoreError::RequestFailed(_))));
    }

    #[tokio::test]
    async fn test_count_since_counts_documents() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/test-project/databases/(default)/documents:runQuery"))
            .and(body_partial_json(json!({
                "structuredQuery": {"from": [{"collectionId": "generations"}]}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"document": {"name": "projects/test-project/databases/(default)/documents/generations/a"}, "readTime": "2026-03-01T00:00:00Z"},
                {"document": {"name": "projects/test-project/databases/(default)/documents/generations/b"}, "readTime": "2026-03-01T00:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let repo = GenerationRepository::new(test_client(&server.uri()));
        let since = "2026-03-01T00:00:00Z".parse().unwrap();
        assert_eq!(repo.count_since(UserId(5), since).await.unwrap(), 2);
    }
}
