use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use serde_json::Value;
use thiserror::Error;

use crate::dao::{
    document_store::{
        Document, DocumentEvent, DocumentSnapshot, DocumentStore, FieldValue, Fields,
        TransactFn, TransactionAbort,
    },
    models::{PlayerEntity, SessionEntity, SessionStatusEntity, fields},
    storage::{StorageError, StorageResult},
};

/// Collection holding session documents unless configured otherwise.
pub const DEFAULT_COLLECTION: &str = "GameRooms-CareerRacer";
const PLAYER_SCORE: &str = "score";

/// Rule violated inside a session transaction; the write was not performed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionRejection {
    /// The caller has no entry in `players`.
    #[error("player `{uid}` is not part of the session")]
    PlayerNotInSession { uid: String },
    /// Only the host may do this.
    #[error("`{uid}` is not the session host")]
    NotHost { uid: String },
    /// The session already left the lobby.
    #[error("session is {status:?}, expected waiting")]
    NotWaiting { status: SessionStatusEntity },
    /// Fewer players than required to start.
    #[error("session has {actual} players, {required} required")]
    NotEnoughPlayers { required: usize, actual: usize },
    /// The stored score of `uid` is not an integer; it is left untouched.
    #[error("score of player `{uid}` is not an integer")]
    MalformedScore { uid: String },
}

/// Failure of a repository operation.
#[derive(Debug, Error)]
pub enum SessionDaoError {
    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// A session rule refused the write.
    #[error(transparent)]
    Rejected(SessionRejection),
}

impl From<TransactionAbort> for SessionDaoError {
    fn from(abort: TransactionAbort) -> Self {
        match abort.downcast::<SessionRejection>() {
            Ok(rejection) => SessionDaoError::Rejected(*rejection),
            Err(other) => SessionDaoError::Storage(StorageError::Aborted(other)),
        }
    }
}

/// Decoded session document at one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Session identifier.
    pub id: String,
    /// Store revision of this snapshot.
    pub revision: String,
    /// Decoded document body.
    pub session: SessionEntity,
}

impl TryFrom<DocumentSnapshot> for SessionSnapshot {
    type Error = StorageError;

    fn try_from(snapshot: DocumentSnapshot) -> Result<Self, Self::Error> {
        let session = snapshot.decode::<SessionEntity>()?;
        Ok(Self {
            id: snapshot.id,
            revision: snapshot.revision,
            session,
        })
    }
}

/// Item of a session subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionFeedEvent {
    /// Decoded state after a committed write.
    Snapshot(SessionSnapshot),
    /// The document is gone.
    Deleted,
}

/// Maps session identifiers onto document store operations. Holds no state.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn DocumentStore>,
    collection: Arc<str>,
}

impl SessionRepository {
    /// Repository over `collection` of `store`.
    pub fn new(store: Arc<dyn DocumentStore>, collection: impl Into<Arc<str>>) -> Self {
        Self {
            store,
            collection: collection.into(),
        }
    }

    /// Create a waiting session hosted by `host`; returns the store-assigned id.
    pub async fn create(&self, host: &PlayerEntity, question_set_id: &str) -> StorageResult<String> {
        let mut document = Fields::new();
        document.insert(fields::HOST_ID.into(), Value::from(host.uid.clone()).into());
        document.insert(
            fields::STATUS.into(),
            encode(&SessionStatusEntity::Waiting)?.into(),
        );
        document.insert(
            fields::PLAYERS.into(),
            encode(&[host])?.into(),
        );
        document.insert(
            fields::QUESTION_SET_ID.into(),
            Value::from(question_set_id).into(),
        );
        document.insert(fields::CREATED_AT.into(), FieldValue::ServerTimestamp);

        self.store.create(&self.collection, document).await
    }

    /// Read the current state of a session, `None` when it does not exist.
    pub async fn find(&self, id: &str) -> StorageResult<Option<SessionSnapshot>> {
        self.store
            .get(&self.collection, id)
            .await?
            .map(SessionSnapshot::try_from)
            .transpose()
    }

    /// Subscribe to a session. Undecodable snapshots surface as
    /// [`StorageError::Decode`] items without ending the stream.
    pub fn subscribe(&self, id: &str) -> BoxStream<'static, StorageResult<SessionFeedEvent>> {
        self.store
            .subscribe(&self.collection, id)
            .map(|event| match event? {
                DocumentEvent::Snapshot(snapshot) => {
                    SessionSnapshot::try_from(snapshot).map(SessionFeedEvent::Snapshot)
                }
                DocumentEvent::Deleted => Ok(SessionFeedEvent::Deleted),
            })
            .boxed()
    }

    /// Additive, uid-keyed merge of a new player entry.
    pub async fn add_player(&self, id: &str, player: &PlayerEntity) -> StorageResult<()> {
        self.store
            .merge_array_field(
                &self.collection,
                id,
                fields::PLAYERS,
                fields::PLAYER_UID,
                encode(player)?,
            )
            .await
    }

    /// Move a waiting session to in-progress and stamp its start time with the
    /// store clock, re-checking host, status and player count atomically.
    pub async fn start(
        &self,
        id: &str,
        host_uid: &str,
        min_players: usize,
    ) -> Result<SessionSnapshot, SessionDaoError> {
        let host_uid = host_uid.to_owned();
        let body: TransactFn = Box::new(move |document: &Document| -> Result<Fields, TransactionAbort> {
            let session: SessionEntity = serde_json::from_value(Value::Object(document.clone()))?;
            if session.host_id != host_uid {
                return Err(SessionRejection::NotHost {
                    uid: host_uid.clone(),
                }
                .into());
            }
            if session.status != SessionStatusEntity::Waiting {
                return Err(SessionRejection::NotWaiting {
                    status: session.status,
                }
                .into());
            }
            if session.players.len() < min_players {
                return Err(SessionRejection::NotEnoughPlayers {
                    required: min_players,
                    actual: session.players.len(),
                }
                .into());
            }

            let mut update = Fields::new();
            update.insert(
                fields::STATUS.into(),
                serde_json::to_value(SessionStatusEntity::InProgress)?.into(),
            );
            update.insert(fields::GAME_START_TIME.into(), FieldValue::ServerTimestamp);
            Ok(update)
        });

        let committed = self
            .store
            .transact(&self.collection, id, body)
            .await
            .map_err(lift_rejection)?;
        Ok(SessionSnapshot::try_from(committed)?)
    }

    /// Single-field write marking the session finished.
    pub async fn finish(&self, id: &str) -> StorageResult<()> {
        let mut update = Fields::new();
        update.insert(
            fields::STATUS.into(),
            encode(&SessionStatusEntity::Finished)?.into(),
        );
        self.store.set_fields(&self.collection, id, update).await
    }

    /// Add `delta` to the score of `uid` inside one transaction and return the
    /// committed score. Only that player's entry is changed; every other entry
    /// is written back exactly as read.
    pub async fn adjust_score(
        &self,
        id: &str,
        uid: &str,
        delta: i64,
    ) -> Result<i64, SessionDaoError> {
        let target = uid.to_owned();
        let body: TransactFn = Box::new(move |document: &Document| -> Result<Fields, TransactionAbort> {
            let mut players = match document.get(fields::PLAYERS) {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            };
            let entry = players
                .iter_mut()
                .find(|entry| entry_uid(entry) == Some(target.as_str()))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| SessionRejection::PlayerNotInSession {
                    uid: target.clone(),
                })?;
            let current = match entry.get(PLAYER_SCORE) {
                None => 0,
                Some(score) => score.as_i64().ok_or_else(|| SessionRejection::MalformedScore {
                    uid: target.clone(),
                })?,
            };
            entry.insert(PLAYER_SCORE.into(), Value::from(current.saturating_add(delta)));

            let mut update = Fields::new();
            update.insert(fields::PLAYERS.into(), Value::Array(players).into());
            Ok(update)
        });

        let committed = self
            .store
            .transact(&self.collection, id, body)
            .await
            .map_err(lift_rejection)?;
        let session = SessionSnapshot::try_from(committed)?.session;
        session
            .player(uid)
            .map(|player| player.score)
            .ok_or_else(|| {
                SessionDaoError::Rejected(SessionRejection::PlayerNotInSession { uid: uid.into() })
            })
    }

    /// Probe the underlying store.
    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}

fn entry_uid(entry: &Value) -> Option<&str> {
    entry.get(fields::PLAYER_UID).and_then(Value::as_str)
}

fn encode<T>(value: &T) -> StorageResult<Value>
where
    T: serde::Serialize + ?Sized,
{
    serde_json::to_value(value).map_err(|source| StorageError::Decode {
        id: String::from("<encode>"),
        source,
    })
}

/// Turn an aborted transaction carrying a [`SessionRejection`] into a typed rejection.
fn lift_rejection(err: StorageError) -> SessionDaoError {
    match err {
        StorageError::Aborted(abort) => abort.into(),
        other => SessionDaoError::Storage(other),
    }
}
