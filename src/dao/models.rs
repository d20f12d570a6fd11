use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};

/// Top-level field names of a session document.
pub mod fields {
    /// Uid of the host.
    pub const HOST_ID: &str = "hostId";
    /// Lifecycle status.
    pub const STATUS: &str = "status";
    /// Array of player entries keyed by `uid`.
    pub const PLAYERS: &str = "players";
    /// Question set played in the session.
    pub const QUESTION_SET_ID: &str = "questionSetId";
    /// Server timestamp written on creation.
    pub const CREATED_AT: &str = "createdAt";
    /// Server timestamp written on start.
    pub const GAME_START_TIME: &str = "gameStartTime";
    /// Identity key of an entry of [`PLAYERS`].
    pub const PLAYER_UID: &str = "uid";
}

/// Lifecycle status as persisted in the session document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatusEntity {
    /// Lobby open.
    Waiting,
    /// Round running.
    InProgress,
    /// Round over.
    Finished,
}

/// Player entry stored inside a session document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerEntity {
    /// Stable identity provided by the identity provider.
    pub uid: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image URL, may be empty.
    pub avatar_url: String,
    /// Current score; only ever changed by the score transaction.
    pub score: i64,
}

/// Session document as persisted by the document store. The document id is
/// carried by the store, not by the body.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntity {
    /// Uid of the player who created the session.
    pub host_id: String,
    /// Lifecycle status.
    pub status: SessionStatusEntity,
    /// Participants in join order.
    pub players: Vec<PlayerEntity>,
    /// Opaque selector for the question content.
    pub question_set_id: String,
    /// Server-assigned creation time; absent until the store resolves it.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub created_at: Option<SystemTime>,
    /// Server-assigned start time, written once by the start transition.
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_start_time: Option<SystemTime>,
}

impl SessionEntity {
    /// Find the entry of `uid` in the player list.
    pub fn player(&self, uid: &str) -> Option<&PlayerEntity> {
        self.players.iter().find(|player| player.uid == uid)
    }

    /// Whether the host still has an entry in the player list.
    pub fn host_present(&self) -> bool {
        self.player(&self.host_id).is_some()
    }
}
