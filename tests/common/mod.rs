#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::{
    StreamExt,
    future::BoxFuture,
    stream::{self, BoxStream},
};
use race_room::{
    dao::{
        document_store::{
            DocumentEvent, DocumentSnapshot, DocumentStore, Fields, FieldValue, TransactFn,
            memory::InMemoryDocumentStore,
        },
        models::fields,
        session::{DEFAULT_COLLECTION, SessionRepository},
        storage::{StorageError, StorageResult},
    },
    identity::{StaticIdentityProvider, UserProfile},
    services::synchronizer::{SessionSynchronizer, SessionView, SyncSettings},
};
use serde_json::{Value, json};
use tokio::{sync::watch, time::timeout};

pub const WAIT: Duration = Duration::from_secs(3);

pub fn user(uid: &str) -> UserProfile {
    UserProfile {
        uid: uid.into(),
        display_name: uid.to_uppercase(),
        avatar_url: format!("https://avatars.test/{uid}.png"),
    }
}

/// Short timings so countdown scenarios finish quickly.
pub fn fast_settings(game_duration: Duration) -> SyncSettings {
    SyncSettings {
        game_duration,
        tick_interval: Duration::from_millis(20),
        min_players: 2,
        resubscribe_initial_delay: Duration::from_millis(20),
        resubscribe_max_delay: Duration::from_millis(100),
    }
}

#[derive(Debug, thiserror::Error)]
#[error("feed dropped")]
pub struct FeedDropped;

/// In-memory store that records finishing writes and can drop subscriptions.
#[derive(Clone)]
pub struct RecordingStore {
    pub inner: InMemoryDocumentStore,
    finish_writes: Arc<AtomicUsize>,
    drop_next_feed: Arc<AtomicBool>,
    severed: Arc<watch::Sender<u64>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::with_max_attempts(64)
    }

    /// Store whose transactions give up after `max_attempts` conflicts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        let (severed, _rx) = watch::channel(0);
        Self {
            inner: InMemoryDocumentStore::with_max_attempts(max_attempts),
            finish_writes: Arc::new(AtomicUsize::new(0)),
            drop_next_feed: Arc::new(AtomicBool::new(false)),
            severed: Arc::new(severed),
        }
    }

    pub fn finish_writes(&self) -> usize {
        self.finish_writes.load(Ordering::SeqCst)
    }

    /// The next subscription delivers one event, then fails.
    pub fn drop_next_feed(&self) {
        self.drop_next_feed.store(true, Ordering::SeqCst);
    }

    /// Fail every subscription open right now. Later subscriptions are unaffected.
    pub fn sever_feeds(&self) {
        self.severed.send_modify(|generation| *generation += 1);
    }

    /// Overwrite top-level fields of a session, bypassing every rule.
    pub async fn inject(&self, id: &str, values: Value) {
        let mut update = Fields::new();
        if let Value::Object(map) = values {
            for (name, value) in map {
                update.insert(name, FieldValue::Value(value));
            }
        }
        self.inner
            .set_fields(DEFAULT_COLLECTION, id, update)
            .await
            .expect("inject fields");
    }

    pub async fn inject_field(&self, id: &str, name: &str, value: Value) {
        let mut update = Fields::new();
        update.insert(name.to_owned(), FieldValue::Value(value));
        self.inner
            .set_fields(DEFAULT_COLLECTION, id, update)
            .await
            .expect("inject field");
    }

    /// Replace the player list with plain entries for `uids`.
    pub async fn set_players(&self, id: &str, uids: &[&str]) {
        let players: Vec<Value> = uids
            .iter()
            .map(|uid| {
                json!({
                    "uid": uid,
                    "displayName": uid.to_uppercase(),
                    "avatarUrl": "",
                    "score": 0
                })
            })
            .collect();
        self.inject_field(id, fields::PLAYERS, Value::Array(players))
            .await;
    }
}

impl DocumentStore for RecordingStore {
    fn create(&self, collection: &str, fields: Fields) -> BoxFuture<'static, StorageResult<String>> {
        self.inner.create(collection, fields)
    }

    fn get(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxFuture<'static, StorageResult<Option<DocumentSnapshot>>> {
        self.inner.get(collection, id)
    }

    fn subscribe(
        &self,
        collection: &str,
        id: &str,
    ) -> BoxStream<'static, StorageResult<DocumentEvent>> {
        let mut feed = self.inner.subscribe(collection, id);
        if self.drop_next_feed.swap(false, Ordering::SeqCst) {
            feed = feed.take(1).boxed();
        }
        let mut cut = self.severed.subscribe();
        let severed = async move {
            let _ = cut.changed().await;
        };
        let failure = stream::once(async {
            Err(StorageError::unavailable("feed dropped".into(), FeedDropped))
        });
        feed.take_until(severed).chain(failure).boxed()
    }

    fn merge_array_field(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        key: &str,
        element: Value,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.merge_array_field(collection, id, field, key, element)
    }

    fn set_fields(
        &self,
        collection: &str,
        id: &str,
        update: Fields,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let finishing = matches!(
            update.get(fields::STATUS),
            Some(FieldValue::Value(Value::String(status))) if status == "finished"
        );
        if finishing {
            self.finish_writes.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.set_fields(collection, id, update)
    }

    fn transact(
        &self,
        collection: &str,
        id: &str,
        body: TransactFn,
    ) -> BoxFuture<'static, StorageResult<DocumentSnapshot>> {
        self.inner.transact(collection, id, body)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.inner.health_check()
    }
}

/// One participant: its own identity and synchronizer over the shared store.
pub struct Client {
    pub identity: Arc<StaticIdentityProvider>,
    pub sync: SessionSynchronizer,
}

impl Client {
    pub fn new(store: &RecordingStore, uid: &str, settings: SyncSettings) -> Self {
        let identity = Arc::new(StaticIdentityProvider::signed_in(user(uid)));
        let repository = SessionRepository::new(Arc::new(store.clone()), DEFAULT_COLLECTION);
        let sync = SessionSynchronizer::new(repository, identity.clone(), settings);
        Self { identity, sync }
    }

    /// Wait until the view satisfies `predicate`, returning it.
    pub async fn wait_for<F>(&self, predicate: F) -> Option<SessionView>
    where
        F: FnMut(Option<&SessionView>) -> bool,
    {
        wait_for(&mut self.sync.watch_view(), predicate).await
    }
}

pub async fn wait_for<F>(
    rx: &mut watch::Receiver<Option<SessionView>>,
    mut predicate: F,
) -> Option<SessionView>
where
    F: FnMut(Option<&SessionView>) -> bool,
{
    timeout(WAIT, async {
        loop {
            {
                let current = rx.borrow_and_update();
                if predicate(current.as_ref()) {
                    return current.clone();
                }
            }
            rx.changed().await.expect("view channel closed");
        }
    })
    .await
    .expect("view condition not reached in time")
}

pub fn scores(view: &SessionView) -> Vec<(String, i64)> {
    view.session
        .players
        .values()
        .map(|player| (player.uid.clone(), player.score))
        .collect()
}
