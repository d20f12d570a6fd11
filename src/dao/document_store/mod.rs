/// CouchDB backend.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Process-local backend.
pub mod memory;

use std::{
    error::Error,
    time::{SystemTime, UNIX_EPOCH},
};

use futures::{future::BoxFuture, stream::BoxStream};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::dao::storage::{StorageError, StorageResult};

/// Materialized body of a document.
pub type Document = Map<String, Value>;

/// Shallow set of top-level fields to write, in write order.
pub type Fields = IndexMap<String, FieldValue>;

/// Error returned by a transaction body to cancel the write.
pub type TransactionAbort = Box<dyn Error + Send + Sync>;

/// Transaction body. The store may invoke it several times, once per attempt,
/// always with the latest committed document.
pub type TransactFn = Box<dyn Fn(&Document) -> Result<Fields, TransactionAbort> + Send + Sync>;

/// Value written into a single top-level field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Literal JSON value.
    Value(Value),
    /// Sentinel replaced by the store's own clock when the write commits.
    ServerTimestamp,
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

/// Full copy of a document as seen at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    /// Store-assigned identifier.
    pub id: String,
    /// Opaque revision token; changes on every committed write.
    pub revision: String,
    /// Document body.
    pub data: Document,
}

impl DocumentSnapshot {
    /// Deserialize the document body into a typed model.
    pub fn decode<T>(&self) -> StorageResult<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_value(Value::Object(self.data.clone())).map_err(|source| {
            StorageError::Decode {
                id: self.id.clone(),
                source,
            }
        })
    }
}

/// Item delivered by a document subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentEvent {
    /// The document exists; carries its latest materialized state.
    Snapshot(DocumentSnapshot),
    /// The document does not exist (never created or deleted).
    Deleted,
}

/// Key-addressed document collections with transactions and push subscriptions.
///
/// Subscriptions are cancelled by dropping the returned stream. A stream that
/// yields an error or ends has lost its connection and must be re-opened.
pub trait DocumentStore: Send + Sync {
    /// Insert a new document; returns its store-assigned id.
    fn create(&self, collection: &str, fields: Fields) -> BoxFuture<'static, StorageResult<String>>;
    /// Current state of a document, `None` when it does not exist.
    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<DocumentSnapshot>>>;
    /// Push feed of a document, starting with its current state.
    fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxStream<'static, StorageResult<DocumentEvent>>;
    /// Append `element` to the array at `field` unless an element with the same
    /// `key` value is already present.
    fn merge_array_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        key: &str,
        element: Value,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Shallow overwrite of top-level fields.
    fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Optimistic read-modify-write retried internally until the store's
    /// attempt budget is spent. Returns the committed snapshot.
    fn transact(
        &self,
        collection: &str,
        id: &str,
        body: TransactFn,
    ) -> BoxFuture<'static, StorageResult<DocumentSnapshot>>;
    /// Cheap connectivity probe.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
}

/// Encode a timestamp the way every backend persists it: milliseconds since the epoch.
pub fn timestamp_value(time: SystemTime) -> Value {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default();
    Value::from(millis)
}

/// Write `fields` into `document`, resolving server timestamps to `now`.
pub fn apply_fields(document: &mut Document, fields: Fields, now: SystemTime) {
    for (name, value) in fields {
        let value = match value {
            FieldValue::Value(value) => value,
            FieldValue::ServerTimestamp => timestamp_value(now),
        };
        document.insert(name, value);
    }
}

/// Identity-keyed array union. Returns `true` when the document changed.
///
/// A missing or non-array field is replaced by a one-element array.
pub fn merge_keyed(document: &mut Document, field: &str, key: &str, element: Value) -> bool {
    let identity = element.get(key).cloned();
    match document.get_mut(field) {
        Some(Value::Array(items)) => {
            let present = identity.is_some()
                && items
                    .iter()
                    .any(|item| item.get(key) == identity.as_ref());
            if present {
                return false;
            }
            items.push(element);
            true
        }
        _ => {
            document.insert(field.to_owned(), Value::Array(vec![element]));
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn document(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn server_timestamp_resolves_to_millis() {
        let mut doc = Document::new();
        let now = UNIX_EPOCH + Duration::from_millis(1_500);
        let mut fields = Fields::new();
        fields.insert("createdAt".into(), FieldValue::ServerTimestamp);
        fields.insert("status".into(), json!("waiting").into());

        apply_fields(&mut doc, fields, now);

        assert_eq!(doc.get("createdAt"), Some(&json!(1_500)));
        assert_eq!(doc.get("status"), Some(&json!("waiting")));
    }

    #[test]
    fn merge_keyed_skips_existing_identity() {
        let mut doc = document(json!({"players": [{"uid": "a1", "score": 3}]}));

        let changed = merge_keyed(&mut doc, "players", "uid", json!({"uid": "a1", "score": 0}));

        assert!(!changed);
        assert_eq!(doc["players"], json!([{"uid": "a1", "score": 3}]));
    }

    #[test]
    fn merge_keyed_appends_new_identity_in_order() {
        let mut doc = document(json!({"players": [{"uid": "a1"}]}));

        assert!(merge_keyed(&mut doc, "players", "uid", json!({"uid": "b1"})));
        assert!(merge_keyed(&mut doc, "players", "uid", json!({"uid": "c1"})));

        assert_eq!(
            doc["players"],
            json!([{"uid": "a1"}, {"uid": "b1"}, {"uid": "c1"}])
        );
    }

    #[test]
    fn merge_keyed_creates_missing_array() {
        let mut doc = Document::new();
        assert!(merge_keyed(&mut doc, "players", "uid", json!({"uid": "a1"})));
        assert_eq!(doc["players"], json!([{"uid": "a1"}]));
    }
}
