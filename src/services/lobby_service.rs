use tracing::info;

use crate::{
    dto::lobby::{
        AdjustScoreRequest, AdjustScoreResponse, CreateSessionRequest, CreateSessionResponse,
        SessionViewResponse,
    },
    error::SessionError,
    state::SharedState,
};

/// Create a session hosted by the local user and attach to it.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<CreateSessionResponse, SessionError> {
    let question_set_id = request
        .question_set_id
        .unwrap_or_else(|| state.config().default_question_set_id.clone());
    let session_id = state
        .synchronizer()
        .create_session(&question_set_id)
        .await?;
    Ok(CreateSessionResponse { session_id })
}

/// Join a waiting session and attach to it.
pub async fn join_session(state: &SharedState, session_id: &str) -> Result<(), SessionError> {
    state.synchronizer().join_session(session_id).await
}

/// Start the attached session.
pub async fn start_session(state: &SharedState) -> Result<(), SessionError> {
    state.synchronizer().start_session().await
}

/// Finish the attached session after its countdown.
pub async fn finish_session(state: &SharedState) -> Result<(), SessionError> {
    state.synchronizer().finish_session().await
}

/// Adjust the local player's score; returns the committed value.
pub async fn adjust_score(
    state: &SharedState,
    request: AdjustScoreRequest,
) -> Result<AdjustScoreResponse, SessionError> {
    let score = state.synchronizer().adjust_score(request.delta).await?;
    Ok(AdjustScoreResponse { score })
}

/// Detach from the current session.
pub async fn leave_session(state: &SharedState) {
    state.synchronizer().leave().await;
    info!("lobby left the current session");
}

/// Current view of the attached session.
pub fn current_session(state: &SharedState) -> Result<SessionViewResponse, SessionError> {
    state
        .synchronizer()
        .view()
        .as_ref()
        .map(SessionViewResponse::from)
        .ok_or(SessionError::NoActiveSession)
}
