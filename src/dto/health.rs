use serde::Serialize;
use utoipa::ToSchema;

/// Overall service condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Store reachable.
    Ok,
    /// The document store is unreachable or failing its probes.
    Degraded,
}

/// Body of `/healthcheck`: store health plus the state of the session feed.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Store condition.
    pub status: HealthStatus,
    /// Session the local participant is attached to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The session feed is reconnecting and the view may lag behind the store.
    pub feed_stale: bool,
}

impl HealthResponse {
    /// Build the response from its parts.
    pub fn new(store_healthy: bool, session_id: Option<String>, feed_stale: bool) -> Self {
        let status = if store_healthy {
            HealthStatus::Ok
        } else {
            HealthStatus::Degraded
        };
        Self {
            status,
            session_id,
            feed_stale,
        }
    }
}
