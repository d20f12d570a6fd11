/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Lobby intents translated into synchronizer calls.
pub mod lobby_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// Storage connection and health supervision.
pub mod storage_supervisor;
/// Session synchronization and lifecycle engine.
pub mod synchronizer;
