use std::time::SystemTime;

use indexmap::IndexMap;

use crate::{
    dao::{
        models::{PlayerEntity, SessionStatusEntity},
        session::SessionSnapshot,
    },
    identity::UserProfile,
};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionStatus {
    /// Players may join.
    Waiting,
    /// Round running; the countdown is active.
    InProgress,
    /// Terminal.
    Finished,
}

/// Participant of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    /// Player identifier.
    pub uid: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image URL, may be empty.
    pub avatar_url: String,
    /// Signed total, may go negative.
    pub score: i64,
}

/// Reconciled view of a shared session document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Session identifier.
    pub id: String,
    /// Creator of the session; never changes.
    pub host_id: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Players keyed by uid, in join order.
    pub players: IndexMap<String, Player>,
    /// Question set played in the session.
    pub question_set_id: String,
    /// Server time of creation.
    pub created_at: Option<SystemTime>,
    /// Server time of the start, origin of the countdown.
    pub game_start_time: Option<SystemTime>,
}

impl Session {
    /// Entry of `uid`, if present.
    pub fn player(&self, uid: &str) -> Option<&Player> {
        self.players.get(uid)
    }

    /// Whether `uid` created the session.
    pub fn is_host(&self, uid: &str) -> bool {
        self.host_id == uid
    }

    /// Whether the host still has an entry in the player list.
    pub fn host_present(&self) -> bool {
        self.players.contains_key(&self.host_id)
    }
}

impl From<SessionStatusEntity> for SessionStatus {
    fn from(value: SessionStatusEntity) -> Self {
        match value {
            SessionStatusEntity::Waiting => SessionStatus::Waiting,
            SessionStatusEntity::InProgress => SessionStatus::InProgress,
            SessionStatusEntity::Finished => SessionStatus::Finished,
        }
    }
}

impl From<SessionStatus> for SessionStatusEntity {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Waiting => SessionStatusEntity::Waiting,
            SessionStatus::InProgress => SessionStatusEntity::InProgress,
            SessionStatus::Finished => SessionStatusEntity::Finished,
        }
    }
}

impl From<PlayerEntity> for Player {
    fn from(value: PlayerEntity) -> Self {
        Self {
            uid: value.uid,
            display_name: value.display_name,
            avatar_url: value.avatar_url,
            score: value.score,
        }
    }
}

impl From<&UserProfile> for PlayerEntity {
    fn from(user: &UserProfile) -> Self {
        Self {
            uid: user.uid.clone(),
            display_name: user.display_name.clone(),
            avatar_url: user.avatar_url.clone(),
            score: 0,
        }
    }
}

impl From<SessionSnapshot> for Session {
    fn from(snapshot: SessionSnapshot) -> Self {
        let entity = snapshot.session;
        let mut players = IndexMap::with_capacity(entity.players.len());
        for player in entity.players {
            // duplicate uids: the earliest entry wins
            if !players.contains_key(&player.uid) {
                players.insert(player.uid.clone(), Player::from(player));
            }
        }

        Self {
            id: snapshot.id,
            host_id: entity.host_id,
            status: entity.status.into(),
            players,
            question_set_id: entity.question_set_id,
            created_at: entity.created_at,
            game_start_time: entity.game_start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::SessionEntity;

    fn entry(uid: &str, score: i64) -> PlayerEntity {
        PlayerEntity {
            uid: uid.into(),
            display_name: uid.into(),
            avatar_url: String::new(),
            score,
        }
    }

    #[test]
    fn duplicate_player_entries_keep_the_first() {
        let snapshot = SessionSnapshot {
            id: "s1".into(),
            revision: "1".into(),
            session: SessionEntity {
                host_id: "a1".into(),
                status: SessionStatusEntity::Waiting,
                players: vec![entry("a1", 0), entry("b1", 4), entry("b1", 9)],
                question_set_id: "q".into(),
                created_at: None,
                game_start_time: None,
            },
        };

        let session = Session::from(snapshot);
        assert_eq!(session.players.len(), 2);
        assert_eq!(session.player("b1").map(|p| p.score), Some(4));
        assert!(session.host_present());
        assert!(session.is_host("a1"));
    }
}
