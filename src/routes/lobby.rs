use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use axum_valid::Valid;

use crate::{
    dto::{
        lobby::{
            AdjustScoreRequest, AdjustScoreResponse, CreateSessionRequest, CreateSessionResponse,
            SessionViewResponse,
        },
        validation::validate_session_id,
    },
    error::AppError,
    services::lobby_service,
    state::SharedState,
};

/// Routes translating the local participant's intents into session operations.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/lobby/sessions", post(create_session))
        .route("/lobby/sessions/{id}/join", post(join_session))
        .route("/lobby/session", get(current_session))
        .route("/lobby/session/start", post(start_session))
        .route("/lobby/session/finish", post(finish_session))
        .route("/lobby/session/score", post(adjust_score))
        .route("/lobby/session/leave", post(leave_session))
}

/// Create a session hosted by the local user and attach to it.
#[utoipa::path(
    post,
    path = "/lobby/sessions",
    tag = "lobby",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = CreateSessionResponse),
        (status = 401, description = "No signed-in user")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<CreateSessionResponse>, AppError> {
    let created = lobby_service::create_session(&state, payload).await?;
    Ok(Json(created))
}

/// Join a waiting session and attach to it.
#[utoipa::path(
    post,
    path = "/lobby/sessions/{id}/join",
    tag = "lobby",
    params(("id" = String, Path, description = "Identifier of the session to join")),
    responses(
        (status = 204, description = "Joined"),
        (status = 404, description = "Unknown session"),
        (status = 409, description = "Session not joinable or host absent")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    validate_session_id(&id).map_err(|err| {
        let mut errors = validator::ValidationErrors::new();
        errors.add("id", err);
        AppError::from(errors)
    })?;
    lobby_service::join_session(&state, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the attached session (host only).
#[utoipa::path(
    post,
    path = "/lobby/session/start",
    tag = "lobby",
    responses(
        (status = 204, description = "Session started"),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Wrong status or not enough players")
    )
)]
pub async fn start_session(State(state): State<SharedState>) -> Result<StatusCode, AppError> {
    lobby_service::start_session(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Finish the attached session once its countdown elapsed (host only).
#[utoipa::path(
    post,
    path = "/lobby/session/finish",
    tag = "lobby",
    responses(
        (status = 204, description = "Session finished"),
        (status = 401, description = "Caller is not the host"),
        (status = 409, description = "Countdown still running or wrong status")
    )
)]
pub async fn finish_session(State(state): State<SharedState>) -> Result<StatusCode, AppError> {
    lobby_service::finish_session(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Adjust the local player's score by a signed delta.
#[utoipa::path(
    post,
    path = "/lobby/session/score",
    tag = "lobby",
    request_body = AdjustScoreRequest,
    responses(
        (status = 200, description = "Score committed", body = AdjustScoreResponse),
        (status = 400, description = "Local player is not part of the session"),
        (status = 503, description = "Store transaction failed")
    )
)]
pub async fn adjust_score(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<AdjustScoreRequest>>,
) -> Result<Json<AdjustScoreResponse>, AppError> {
    let score = lobby_service::adjust_score(&state, payload).await?;
    Ok(Json(score))
}

/// Detach from the current session.
#[utoipa::path(
    post,
    path = "/lobby/session/leave",
    tag = "lobby",
    responses((status = 204, description = "Left the session"))
)]
pub async fn leave_session(State(state): State<SharedState>) -> StatusCode {
    lobby_service::leave_session(&state).await;
    StatusCode::NO_CONTENT
}

/// Current view of the attached session.
#[utoipa::path(
    get,
    path = "/lobby/session",
    tag = "lobby",
    responses(
        (status = 200, description = "Attached session", body = SessionViewResponse),
        (status = 404, description = "No active session")
    )
)]
pub async fn current_session(
    State(state): State<SharedState>,
) -> Result<Json<SessionViewResponse>, AppError> {
    let view = lobby_service::current_session(&state)?;
    Ok(Json(view))
}
