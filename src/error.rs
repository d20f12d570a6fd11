use std::time::Duration;

use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    dao::{
        session::{SessionDaoError, SessionRejection},
        storage::StorageError,
    },
    state::{
        session::SessionStatus,
        state_machine::{InvalidTransition, SessionEvent},
    },
};

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session document with this id.
    #[error("session `{0}` not found")]
    NotFound(String),
    /// The session already left the waiting room.
    #[error("session is {status:?} and can no longer be joined")]
    NotJoinable { status: SessionStatus },
    /// The host's entry is gone; the session is abandoned.
    #[error("the session host has left")]
    HostAbsent,
    /// The local player has no entry in the session.
    #[error("player `{0}` is not part of the session")]
    PlayerNotInSession(String),
    /// The store failed or rejected the write; nothing was changed.
    #[error("store operation failed")]
    TransactionFailed(#[source] StorageError),
    /// No signed-in user, or the caller is not the host.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The intent needs an attached session.
    #[error("no active session")]
    NoActiveSession,
    /// Start requested with too few players.
    #[error("{actual} players present, at least {required} required")]
    NotEnoughPlayers { required: usize, actual: usize },
    /// Intent not allowed in the current status.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    /// Finish was requested before the countdown reached zero.
    #[error("countdown still running, {}s left", remaining.as_secs())]
    CountdownRunning { remaining: Duration },
}

impl From<StorageError> for SessionError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { id, .. } => SessionError::NotFound(id),
            other => SessionError::TransactionFailed(other),
        }
    }
}

impl From<SessionRejection> for SessionError {
    fn from(rejection: SessionRejection) -> Self {
        match rejection {
            SessionRejection::PlayerNotInSession { uid } => SessionError::PlayerNotInSession(uid),
            SessionRejection::NotHost { uid } => {
                SessionError::Unauthorized(format!("`{uid}` is not the session host"))
            }
            SessionRejection::NotWaiting { status } => InvalidTransition {
                from: status.into(),
                event: SessionEvent::Start,
            }
            .into(),
            SessionRejection::NotEnoughPlayers { required, actual } => {
                SessionError::NotEnoughPlayers { required, actual }
            }
            rejection @ SessionRejection::MalformedScore { .. } => {
                SessionError::TransactionFailed(StorageError::Aborted(Box::new(rejection)))
            }
        }
    }
}

impl From<SessionDaoError> for SessionError {
    fn from(err: SessionDaoError) -> Self {
        match err {
            SessionDaoError::Storage(err) => err.into(),
            SessionDaoError::Rejected(rejection) => rejection.into(),
        }
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) | SessionError::NoActiveSession => {
                AppError::NotFound(err.to_string())
            }
            SessionError::Unauthorized(message) => AppError::Unauthorized(message),
            SessionError::NotJoinable { .. }
            | SessionError::HostAbsent
            | SessionError::NotEnoughPlayers { .. }
            | SessionError::InvalidTransition(_)
            | SessionError::CountdownRunning { .. } => AppError::Conflict(err.to_string()),
            SessionError::PlayerNotInSession(_) => AppError::BadRequest(err.to_string()),
            SessionError::TransactionFailed(source) => {
                AppError::ServiceUnavailable(source.to_string())
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::SessionStatusEntity;

    #[test]
    fn rejections_map_onto_session_errors() {
        let err: SessionError = SessionDaoError::Rejected(SessionRejection::NotWaiting {
            status: SessionStatusEntity::Finished,
        })
        .into();
        assert!(matches!(
            err,
            SessionError::InvalidTransition(InvalidTransition {
                from: SessionStatus::Finished,
                event: SessionEvent::Start,
            })
        ));

        let err: SessionError = SessionDaoError::Rejected(SessionRejection::NotHost {
            uid: "b1".into(),
        })
        .into();
        assert!(matches!(err, SessionError::Unauthorized(_)));

        let err: SessionError = SessionDaoError::Rejected(SessionRejection::MalformedScore {
            uid: "a1".into(),
        })
        .into();
        assert!(matches!(
            err,
            SessionError::TransactionFailed(StorageError::Aborted(_))
        ));
    }

    #[test]
    fn missing_documents_surface_as_not_found() {
        let err: SessionError = StorageError::not_found("rooms", "s1").into();
        assert!(matches!(err, SessionError::NotFound(ref id) if id == "s1"));
    }

    #[test]
    fn http_status_follows_error_kind() {
        let status = |err: SessionError| AppError::from(err).into_response().status();

        assert_eq!(status(SessionError::NoActiveSession), StatusCode::NOT_FOUND);
        assert_eq!(status(SessionError::HostAbsent), StatusCode::CONFLICT);
        assert_eq!(
            status(SessionError::Unauthorized("not host".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(SessionError::TransactionFailed(StorageError::TransactionExhausted {
                collection: "rooms".into(),
                id: "s1".into(),
                attempts: 5,
            })),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
