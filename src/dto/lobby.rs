//! DTO definitions used by the lobby REST API, the session SSE stream and the
//! documentation layer.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::{format_system_time, validation::validate_question_set_id},
    services::synchronizer::SessionView,
    state::{
        countdown::display_seconds,
        session::{Player, SessionStatus},
    },
};

/// Payload creating a new session hosted by the local user.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    /// Question set to play; the configured default when omitted.
    #[serde(default)]
    #[validate(custom(function = "validate_question_set_id"))]
    pub question_set_id: Option<String>,
}

/// Identifier of a freshly created session.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    /// Identifier to share with other players.
    pub session_id: String,
}

/// Signed score change applied to the local player.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AdjustScoreRequest {
    /// Signed change applied to the score.
    pub delta: i64,
}

/// Score committed by a score adjustment.
#[derive(Debug, Serialize, ToSchema)]
pub struct AdjustScoreResponse {
    /// Committed score after the change.
    pub score: i64,
}

/// Lifecycle status exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SessionStatusDto {
    /// Lobby open.
    Waiting,
    /// Round running.
    InProgress,
    /// Round over.
    Finished,
}

impl From<SessionStatus> for SessionStatusDto {
    fn from(value: SessionStatus) -> Self {
        match value {
            SessionStatus::Waiting => SessionStatusDto::Waiting,
            SessionStatus::InProgress => SessionStatusDto::InProgress,
            SessionStatus::Finished => SessionStatusDto::Finished,
        }
    }
}

/// Player entry as shown in the lobby.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    /// Player identifier.
    pub uid: String,
    /// Name shown to other players.
    pub display_name: String,
    /// Avatar image URL, may be empty.
    pub avatar_url: String,
    /// Current score.
    pub score: i64,
}

impl From<&Player> for PlayerSummary {
    fn from(player: &Player) -> Self {
        Self {
            uid: player.uid.clone(),
            display_name: player.display_name.clone(),
            avatar_url: player.avatar_url.clone(),
            score: player.score,
        }
    }
}

/// Local view of the attached session.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionViewResponse {
    /// Session identifier.
    pub id: String,
    /// Uid of the host.
    pub host_id: String,
    /// Lifecycle status.
    pub status: SessionStatusDto,
    /// Players in join order.
    pub players: Vec<PlayerSummary>,
    /// Question set played in the session.
    pub question_set_id: String,
    /// RFC 3339 creation time, once assigned by the store.
    pub created_at: Option<String>,
    /// RFC 3339 start time, once the host started the round.
    pub game_start_time: Option<String>,
    /// Countdown rounded to whole seconds while the round runs.
    pub time_remaining_secs: Option<u64>,
    /// The store subscription is reconnecting; data may be outdated.
    pub stale: bool,
}

impl From<&SessionView> for SessionViewResponse {
    fn from(view: &SessionView) -> Self {
        let session = &view.session;
        Self {
            id: session.id.clone(),
            host_id: session.host_id.clone(),
            status: session.status.into(),
            players: session.players.values().map(PlayerSummary::from).collect(),
            question_set_id: session.question_set_id.clone(),
            created_at: session.created_at.map(format_system_time),
            game_start_time: session.game_start_time.map(format_system_time),
            time_remaining_secs: view.time_remaining.map(display_seconds),
            stale: view.stale,
        }
    }
}
