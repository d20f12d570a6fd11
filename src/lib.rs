//! Library crate for race-room: the session synchronization engine, its store
//! backends and the lobby HTTP surface, exposed for the binaries and integration tests.

/// Runtime configuration.
pub mod config;
/// Persistence: document stores and the session repository.
pub mod dao;
mod dto;
/// Session and HTTP error types.
pub mod error;
/// Signed-in user source.
pub mod identity;
/// HTTP routes.
pub mod routes;
/// Session engine and the services behind the routes.
pub mod services;
/// Shared application state and the session domain model.
pub mod state;
