//! Content profile repository.

use std::collections::HashMap;

use chrono::Utc;
use reelgen_models::{ContentProfile, ProfileField, StoredProfile, UserId};

use crate::client::FirestoreClient;
use crate::error::FirestoreResult;
use crate::types::{Document, ToFirestoreValue, Value};

pub const PROFILES_COLLECTION: &str = "profiles";

#[derive(Clone)]
pub struct ProfileRepository {
    client: FirestoreClient,
}

impl ProfileRepository {
    pub fn new(client: FirestoreClient) -> Self {
        Self { client }
    }

    pub async fn get(&self, user_id: UserId) -> FirestoreResult<Option<StoredProfile>> {
        let key = user_id.key();
        let key = key.as_str();
        let client = &self.client;
        let doc = client
            .with_retry("get_profile", move || client.get_document(PROFILES_COLLECTION, key))
            .await?;
        Ok(doc.map(|d| profile_from_document(user_id, &d)))
    }

    /// Replace the stored profile wholesale.
    pub async fn save(&self, user_id: UserId, profile: &ContentProfile) -> FirestoreResult<StoredProfile> {
        let stored = StoredProfile {
            user_id,
            profile: profile.clone(),
            updated_at: Utc::now(),
        };
        // No update mask: fields absent from the body are removed
        self.client
            .update_document(PROFILES_COLLECTION, &user_id.key(), profile_fields(&stored), None)
            .await?;
        Ok(stored)
    }
}

fn profile_fields(stored: &StoredProfile) -> HashMap<String, Value> {
    let mut fields: HashMap<String, Value> = ProfileField::ALL
        .iter()
        .filter_map(|field| {
            stored
                .profile
                .get(*field)
                .map(|answer| (field.as_str().to_string(), answer.to_firestore_value()))
        })
        .collect();
    fields.insert("user_id".to_string(), stored.user_id.as_i64().to_firestore_value());
    fields.insert("updated_at".to_string(), stored.updated_at.to_firestore_value());
    fields
}

fn profile_from_document(user_id: UserId, doc: &Document) -> StoredProfile {
    let mut profile = ContentProfile::default();
    for field in ProfileField::ALL {
        if let Some(answer) = doc.get::<String>(field.as_str()) {
            profile.set_answer(field, &answer);
        }
    }
    StoredProfile {
        user_id,
        profile,
        updated_at: doc.get("updated_at").unwrap_or_else(Utc::now),
    }
}
