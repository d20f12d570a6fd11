use axum::Router;

use crate::state::SharedState;

/// Swagger UI.
pub mod docs;
/// Health check route.
pub mod health;
/// Lobby intents of the local participant.
pub mod lobby;
/// Session event stream.
pub mod sse;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(lobby::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
