use std::time::SystemTime;

use reqwest::header::{DATE, HeaderMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{PrimitiveDateTime, macros::format_description};

use crate::dao::document_store::{Document, DocumentSnapshot};

const COLLECTION_SEPARATOR: &str = "::";

/// Stored CouchDB document: bookkeeping fields plus the flattened body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument {
    /// Collection-qualified document id.
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision; absent before the first write.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Application fields.
    #[serde(flatten)]
    pub body: Document,
}

impl CouchDocument {
    /// Strip CouchDB-reserved members and expose the body under its short id.
    pub fn into_snapshot(mut self) -> DocumentSnapshot {
        self.body.retain(|name, _| !name.starts_with('_'));
        DocumentSnapshot {
            id: short_id(&self.id).to_owned(),
            revision: self.rev.unwrap_or_default(),
            data: self.body,
        }
    }
}

/// Response body of a successful document PUT.
#[derive(Debug, Deserialize)]
pub struct PutResponse {
    /// Revision assigned to the write.
    pub rev: String,
}

/// Response body of a `_changes` request.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    /// Changes since the requested sequence.
    pub results: Vec<ChangeRow>,
    /// Sequence to resume the feed from.
    pub last_seq: Value,
}

/// One change of a watched document.
#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    /// The document was deleted by this change.
    #[serde(default)]
    pub deleted: bool,
    /// Full document, requested with `include_docs`.
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Request body selecting the documents a `_changes` feed reports on.
#[derive(Debug, Serialize)]
pub struct DocIdsFilter<'a> {
    /// Ids the feed is restricted to.
    pub doc_ids: [&'a str; 1],
}

/// Document id used inside CouchDB: `<collection>::<id>`.
pub fn doc_id(collection: &str, id: &str) -> String {
    format!("{collection}{COLLECTION_SEPARATOR}{id}")
}

fn short_id(doc_id: &str) -> &str {
    doc_id
        .split_once(COLLECTION_SEPARATOR)
        .map_or(doc_id, |(_, id)| id)
}

/// Sequence tokens are strings on CouchDB 2+ and integers on 1.x.
pub fn seq_token(value: &Value) -> String {
    match value {
        Value::String(token) => token.clone(),
        other => other.to_string(),
    }
}

/// Read the server clock from the HTTP `Date` response header.
pub fn server_date(headers: &HeaderMap) -> Option<SystemTime> {
    let raw = headers.get(DATE)?.to_str().ok()?;
    PrimitiveDateTime::parse(
        raw,
        format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        ),
    )
    .ok()
    .map(|date| date.assume_utc().into())
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use reqwest::header::HeaderValue;
    use serde_json::json;

    use super::*;

    #[test]
    fn snapshot_drops_reserved_members() {
        let doc: CouchDocument = serde_json::from_value(json!({
            "_id": "rooms::abc",
            "_rev": "3-xyz",
            "_revisions": {"start": 3},
            "status": "waiting"
        }))
        .unwrap();

        let snapshot = doc.into_snapshot();
        assert_eq!(snapshot.id, "abc");
        assert_eq!(snapshot.revision, "3-xyz");
        assert_eq!(Value::Object(snapshot.data), json!({"status": "waiting"}));
    }

    #[test]
    fn http_date_is_parsed_as_utc() {
        let mut headers = HeaderMap::new();
        headers.insert(
            DATE,
            HeaderValue::from_static("Thu, 01 Jan 1970 00:00:42 GMT"),
        );
        assert_eq!(
            server_date(&headers),
            Some(UNIX_EPOCH + Duration::from_secs(42))
        );
    }

    #[test]
    fn seq_tokens_accept_both_encodings() {
        assert_eq!(seq_token(&json!("12-g1AAAA")), "12-g1AAAA");
        assert_eq!(seq_token(&json!(12)), "12");
    }
}
