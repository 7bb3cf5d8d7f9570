//! Firestore REST API types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Option<HashMap<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Create a new document with the given fields.
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Last path segment of the resource name.
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }

    /// Typed field lookup.
    pub fn get<T: FromFirestoreValue>(&self, field: &str) -> Option<T> {
        self.fields
            .as_ref()
            .and_then(|f| f.get(field))
            .and_then(T::from_firestore_value)
    }
}

// ============================================================================
// Commit types (atomic multi-document writes)
// ============================================================================

/// One write inside a commit.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Write {
    /// Document to upsert; `name` must be the full resource name.
    pub update: Document,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_mask: Option<DocumentMask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_document: Option<Precondition>,
}

impl Write {
    pub fn update(name: String, fields: HashMap<String, Value>) -> Self {
        let mut document = Document::new(fields);
        document.name = Some(name);
        Self {
            update: document,
            update_mask: None,
            current_document: None,
        }
    }

    pub fn mask(mut self, fields: &[&str]) -> Self {
        self.update_mask = Some(DocumentMask {
            field_paths: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn must_exist(mut self) -> Self {
        self.current_document = Some(Precondition {
            exists: Some(true),
            update_time: None,
        });
        self
    }

    /// Guard on the document `updateTime` when known, else require absence.
    pub fn guard(mut self, update_time: Option<&str>) -> Self {
        self.current_document = Some(match update_time {
            Some(ts) => Precondition {
                exists: None,
                update_time: Some(ts.to_string()),
            },
            None => Precondition {
                exists: Some(false),
                update_time: None,
            },
        });
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMask {
    pub field_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Precondition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

/// `documents:commit` request body. All writes apply or none do.
#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    pub writes: Vec<Write>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    #[serde(default)]
    pub write_results: Vec<WriteResult>,
    pub commit_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub update_time: Option<String>,
}

// ============================================================================
// Structured query types
// ============================================================================

/// `documents:runQuery` request body.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

/// One element of the `runQuery` response stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
    pub read_time: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Projection>,
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<Order>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

impl StructuredQuery {
    pub fn collection(collection_id: impl Into<String>) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.into(),
            }],
            ..Default::default()
        }
    }

    /// Filter on all of `filters`. A single filter is sent unwrapped.
    pub fn filter_all(mut self, mut filters: Vec<Filter>) -> Self {
        self.filter = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::Composite(CompositeFilter {
                op: "AND".to_string(),
                filters,
            })),
        };
        self
    }

    /// Only return document names.
    pub fn keys_only(mut self) -> Self {
        self.select = Some(Projection {
            fields: vec![FieldReference::new("__name__")],
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by.push(Order {
            field: FieldReference::new(field),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: i32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Projection {
    pub fields: Vec<FieldReference>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

impl FieldReference {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            field_path: path.into(),
        }
    }
}

/// Query filter, serialized as `{"fieldFilter": ...}` or `{"compositeFilter": ...}`.
#[derive(Debug, Clone, Serialize)]
pub enum Filter {
    #[serde(rename = "fieldFilter")]
    Field(FieldFilter),
    #[serde(rename = "compositeFilter")]
    Composite(CompositeFilter),
}

impl Filter {
    pub fn field(path: &str, op: FieldOp, value: Value) -> Self {
        Filter::Field(FieldFilter {
            field: FieldReference::new(path),
            op,
            value,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CompositeFilter {
    pub op: String,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: FieldOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldOp {
    Equal,
    NotEqual,
    LessThan,
    GreaterThanOrEqual,
    In,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub field: FieldReference,
    pub direction: Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Ascending,
    Descending,
}

// ============================================================================
// Value conversions
// ============================================================================

/// Convert a Rust value to Firestore Value.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u32 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for f64 {
    fn to_firestore_value(&self) -> Value {
        Value::DoubleValue(*self)
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Vec<T> {
    fn to_firestore_value(&self) -> Value {
        Value::ArrayValue(ArrayValue {
            values: Some(self.iter().map(|v| v.to_firestore_value()).collect()),
        })
    }
}

/// Convert Firestore Value to Rust type.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) => Some(*f as i64),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u32 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(f) if *f >= 0.0 => Some(*f as u32),
            _ => None,
        }
    }
}

impl FromFirestoreValue for f64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::DoubleValue(f) => Some(*f),
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for bool {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.into()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_wire_format() {
        let v = serde_json::to_value(42i64.to_firestore_value()).unwrap();
        assert_eq!(v, json!({"integerValue": "42"}));
        let v = serde_json::to_value(None::<String>.to_firestore_value()).unwrap();
        assert_eq!(v, json!({"nullValue": null}));
    }

    #[test]
    fn test_document_accessors() {
        let doc: Document = serde_json::from_value(json!({
            "name": "projects/p/databases/(default)/documents/accounts/42",
            "fields": {"credits": {"integerValue": "3"}, "tier": {"stringValue": "lite"}},
            "updateTime": "2026-01-01T00:00:00.000001Z"
        }))
        .unwrap();
        assert_eq!(doc.doc_id(), Some("42"));
        assert_eq!(doc.get::<u32>("credits"), Some(3));
        assert_eq!(doc.get::<String>("tier").as_deref(), Some("lite"));
        assert_eq!(doc.get::<u32>("missing"), None);
    }

    #[test]
    fn test_commit_write_wire_format() {
        let write = Write::update(
            "projects/p/databases/(default)/documents/invoices/9".into(),
            HashMap::from([("status".to_string(), "completed".to_firestore_value())]),
        )
        .mask(&["status"])
        .guard(Some("2026-01-01T00:00:00Z"));
        let created = Write::update("projects/p/databases/(default)/documents/accounts/1".into(), HashMap::new())
            .guard(None);

        let body = serde_json::to_value(CommitRequest {
            writes: vec![write, created],
        })
        .unwrap();
        assert_eq!(body["writes"][0]["updateMask"], json!({"fieldPaths": ["status"]}));
        assert_eq!(
            body["writes"][0]["currentDocument"],
            json!({"updateTime": "2026-01-01T00:00:00Z"})
        );
        assert_eq!(body["writes"][1]["currentDocument"], json!({"exists": false}));
        assert!(body["writes"][1].get("updateMask").is_none());
    }

    #[test]
    fn test_structured_query_wire_format() {
        let query = StructuredQuery::collection("generations")
            .filter_all(vec![
                Filter::field("user_id", FieldOp::Equal, 7i64.to_firestore_value()),
                Filter::field(
                    "created_at",
                    FieldOp::GreaterThanOrEqual,
                    Value::TimestampValue("2026-01-01T00:00:00+00:00".into()),
                ),
            ])
            .keys_only();
        let body = serde_json::to_value(RunQueryRequest {
            structured_query: query,
        })
        .unwrap();

        assert_eq!(
            body["structuredQuery"]["from"],
            json!([{"collectionId": "generations"}])
        );
        assert_eq!(body["structuredQuery"]["where"]["compositeFilter"]["op"], "AND");
        assert_eq!(
            body["structuredQuery"]["where"]["compositeFilter"]["filters"][1]["fieldFilter"]["op"],
            "GREATER_THAN_OR_EQUAL"
        );
        assert_eq!(
            body["structuredQuery"]["select"]["fields"][0]["fieldPath"],
            "__name__"
        );
        assert!(body["structuredQuery"].get("orderBy").is_none());
    }

    #[test]
    fn test_single_filter_unwrapped() {
        let query = StructuredQuery::collection("invoices").filter_all(vec![Filter::field(
            "status",
            FieldOp::Equal,
            "paid".to_firestore_value(),
        )]);
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(body["where"]["fieldFilter"]["field"]["fieldPath"], "status");
    }
}
