//! In-process document store used by tests and single-process deployments.
//!
//! Every document lives in one [`DashMap`] slot holding a revision counter and
//! a [`watch`] channel whose current value *is* the document. Writes mutate
//! the slot under its shard lock and publish before releasing it, so
//! subscribers never observe revisions out of order.

use std::{sync::Arc, time::Duration, time::SystemTime};

use dashmap::DashMap;
use futures::{StreamExt, future::BoxFuture, stream::BoxStream};
use rand::Rng;
use serde_json::Value;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;
use uuid::Uuid;

use super::{
    Document, DocumentEvent, DocumentSnapshot, DocumentStore, Fields, TransactFn, apply_fields,
    merge_keyed,
};
use crate::dao::storage::{StorageError, StorageResult};

/// Attempts granted to a transaction before it reports exhaustion.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const RETRY_BASE_DELAY_MS: u64 = 2;

struct Slot {
    version: u64,
    watcher: watch::Sender<Option<DocumentSnapshot>>,
}

impl Slot {
    fn vacant() -> Self {
        let (watcher, _rx) = watch::channel(None);
        Self {
            version: 0,
            watcher,
        }
    }

    fn current(&self) -> Option<DocumentSnapshot> {
        self.watcher.borrow().clone()
    }

    fn commit(&mut self, id: &str, data: Document) -> DocumentSnapshot {
        self.version += 1;
        let snapshot = DocumentSnapshot {
            id: id.to_owned(),
            revision: self.version.to_string(),
            data,
        };
        self.watcher.send_replace(Some(snapshot.clone()));
        snapshot
    }
}

struct MemoryInner {
    documents: DashMap<String, Slot>,
    max_attempts: u32,
}

/// [`DocumentStore`] backed by process memory.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<MemoryInner>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::with_max_attempts(DEFAULT_MAX_ATTEMPTS)
    }
}

impl InMemoryDocumentStore {
    /// Store with the default transaction attempt budget.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store whose transactions give up after `max_attempts` conflicts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                documents: DashMap::new(),
                max_attempts: max_attempts.max(1),
            }),
        }
    }

    /// Remove a document and notify its subscribers.
    pub fn delete(&self, collection: &str, id: &str) -> bool {
        let Some(mut slot) = self.inner.documents.get_mut(&slot_key(collection, id)) else {
            return false;
        };
        let existed = slot.current().is_some();
        slot.version += 1;
        slot.watcher.send_replace(None);
        existed
    }

    fn read(&self, collection: &str, id: &str) -> Option<DocumentSnapshot> {
        self.inner
            .documents
            .get(&slot_key(collection, id))
            .and_then(|slot| slot.current())
    }

    /// Run `mutate` against the committed document under the slot lock.
    /// `mutate` returns `false` to skip the write.
    fn update<F>(&self, collection: &str, id: &str, mutate: F) -> StorageResult<()>
    where
        F: FnOnce(&mut Document) -> bool,
    {
        let mut slot = self
            .inner
            .documents
            .get_mut(&slot_key(collection, id))
            .ok_or_else(|| StorageError::not_found(collection, id))?;
        let mut data = slot
            .current()
            .ok_or_else(|| StorageError::not_found(collection, id))?
            .data;
        if mutate(&mut data) {
            slot.commit(id, data);
        }
        Ok(())
    }

    async fn transact_inner(
        &self,
        collection: String,
        id: String,
        body: TransactFn,
    ) -> StorageResult<DocumentSnapshot> {
        let key = slot_key(&collection, &id);
        for attempt in 1..=self.inner.max_attempts {
            let base = self
                .read(&collection, &id)
                .ok_or_else(|| StorageError::not_found(&collection, &id))?;
            let fields = body(&base.data).map_err(StorageError::Aborted)?;

            // Reads and commits are separate round-trips; let other writers in.
            tokio::task::yield_now().await;

            {
                let mut slot = self
                    .inner
                    .documents
                    .get_mut(&key)
                    .ok_or_else(|| StorageError::not_found(&collection, &id))?;
                let unchanged = slot
                    .current()
                    .is_some_and(|current| current.revision == base.revision);
                if unchanged {
                    let mut data = base.data;
                    apply_fields(&mut data, fields, SystemTime::now());
                    return Ok(slot.commit(&id, data));
                }
            }

            debug!(%collection, %id, attempt, "transaction conflict; retrying");
            let delay = {
                let ceiling = RETRY_BASE_DELAY_MS * u64::from(attempt);
                Duration::from_millis(rand::rng().random_range(0..=ceiling))
            };
            tokio::time::sleep(delay).await;
        }

        Err(StorageError::TransactionExhausted {
            collection,
            id,
            attempts: self.inner.max_attempts,
        })
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn create(&self, collection: &str, fields: Fields) -> BoxFuture<'static, StorageResult<String>> {
        let id = Uuid::new_v4().simple().to_string();
        let mut data = Document::new();
        apply_fields(&mut data, fields, SystemTime::now());
        self.inner
            .documents
            .entry(slot_key(collection, &id))
            .or_insert_with(Slot::vacant)
            .commit(&id, data);
        Box::pin(async move { Ok(id) })
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<DocumentSnapshot>>> {
        let snapshot = self.read(collection, id);
        Box::pin(async move { Ok(snapshot) })
    }

    fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxStream<'static, StorageResult<DocumentEvent>> {
        let receiver = self
            .inner
            .documents
            .entry(slot_key(collection, id))
            .or_insert_with(Slot::vacant)
            .watcher
            .subscribe();

        WatchStream::new(receiver)
            .map(|state| {
                Ok(match state {
                    Some(snapshot) => DocumentEvent::Snapshot(snapshot),
                    None => DocumentEvent::Deleted,
                })
            })
            .boxed()
    }

    fn merge_array_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        key: &str,
        element: Value,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.update(collection, id, |data| merge_keyed(data, field, key, element));
        Box::pin(async move { result })
    }

    fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let result = self.update(collection, id, |data| {
            apply_fields(data, fields, SystemTime::now());
            true
        });
        Box::pin(async move { result })
    }

    fn transact(
        &self,
        collection: &str,
        id: &str,
        body: TransactFn,
    ) -> BoxFuture<'static, StorageResult<DocumentSnapshot>> {
        let store = self.clone();
        let collection = collection.to_owned();
        let id = id.to_owned();
        Box::pin(async move { store.transact_inner(collection, id, body).await })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

fn slot_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

#[cfg(test)]
mod tests {
    use std::io;

    use serde_json::json;

    use super::*;
    use crate::dao::document_store::{FieldValue, TransactionAbort};

    const COLLECTION: &str = "rooms";

    fn fields(pairs: &[(&str, Value)]) -> Fields {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), FieldValue::Value(value.clone())))
            .collect()
    }

    #[tokio::test]
    async fn create_then_get_returns_document() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create(COLLECTION, fields(&[("status", json!("waiting"))]))
            .await
            .unwrap();

        let snapshot = store.get(COLLECTION, &id).await.unwrap().unwrap();
        assert_eq!(snapshot.id, id);
        assert_eq!(snapshot.data["status"], json!("waiting"));
        assert!(store.get(COLLECTION, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn writes_to_missing_document_fail() {
        let store = InMemoryDocumentStore::new();
        let err = store
            .set_fields(COLLECTION, "missing", fields(&[("status", json!("finished"))]))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn subscription_sees_latest_state_and_deletion() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create(COLLECTION, fields(&[("status", json!("waiting"))]))
            .await
            .unwrap();
        let mut stream = store.subscribe(COLLECTION, &id);

        match stream.next().await {
            Some(Ok(DocumentEvent::Snapshot(snapshot))) => {
                assert_eq!(snapshot.data["status"], json!("waiting"))
            }
            other => panic!("unexpected event {other:?}"),
        }

        store
            .set_fields(COLLECTION, &id, fields(&[("status", json!("in-progress"))]))
            .await
            .unwrap();
        match stream.next().await {
            Some(Ok(DocumentEvent::Snapshot(snapshot))) => {
                assert_eq!(snapshot.data["status"], json!("in-progress"))
            }
            other => panic!("unexpected event {other:?}"),
        }

        assert!(store.delete(COLLECTION, &id));
        assert!(matches!(
            stream.next().await,
            Some(Ok(DocumentEvent::Deleted))
        ));
    }

    #[tokio::test]
    async fn subscribing_to_unknown_document_reports_deleted() {
        let store = InMemoryDocumentStore::new();
        let mut stream = store.subscribe(COLLECTION, "nope");
        assert!(matches!(
            stream.next().await,
            Some(Ok(DocumentEvent::Deleted))
        ));
    }

    #[tokio::test]
    async fn transaction_abort_leaves_document_untouched() {
        let store = InMemoryDocumentStore::new();
        let id = store
            .create(COLLECTION, fields(&[("count", json!(1))]))
            .await
            .unwrap();

        let err = store
            .transact(
                COLLECTION,
                &id,
                Box::new(|_doc: &Document| -> Result<Fields, TransactionAbort> {
                    Err(Box::new(io::Error::other("refused")))
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StorageError::Aborted(_)));
        let snapshot = store.get(COLLECTION, &id).await.unwrap().unwrap();
        assert_eq!(snapshot.data["count"], json!(1));
        assert_eq!(snapshot.revision, "1");
    }

    #[tokio::test]
    async fn concurrent_transactions_do_not_lose_updates() {
        let store = InMemoryDocumentStore::with_max_attempts(64);
        let id = store
            .create(COLLECTION, fields(&[("count", json!(0))]))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .transact(
                        COLLECTION,
                        &id,
                        Box::new(|doc: &Document| -> Result<Fields, TransactionAbort> {
                            let count = doc["count"].as_i64().unwrap_or_default();
                            let mut fields = Fields::new();
                            fields.insert("count".into(), json!(count + 1).into());
                            Ok(fields)
                        }),
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let snapshot = store.get(COLLECTION, &id).await.unwrap().unwrap();
        assert_eq!(snapshot.data["count"], json!(8));
    }

    #[tokio::test]
    async fn exhausted_transaction_reports_attempts() {
        let store = InMemoryDocumentStore::with_max_attempts(2);
        let id = store
            .create(COLLECTION, fields(&[("count", json!(0))]))
            .await
            .unwrap();

        // Every attempt races a competing write made from inside the body.
        let competitor = store.clone();
        let competitor_id = id.clone();
        let err = store
            .transact(
                COLLECTION,
                &id,
                Box::new(move |_doc: &Document| -> Result<Fields, TransactionAbort> {
                    competitor
                        .update(COLLECTION, &competitor_id, |data| {
                            data.insert("noise".into(), json!(true));
                            true
                        })
                        .map_err(|err| -> TransactionAbort { Box::new(err) })?;
                    Ok(Fields::new())
                }),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::TransactionExhausted { attempts: 2, .. }
        ));
    }
}
