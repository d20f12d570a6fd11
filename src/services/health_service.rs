use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Probe the document store and describe the local session feed.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    let synchronizer = state.synchronizer();
    let store_healthy = match synchronizer.repository().health_check().await {
        Ok(()) => !state.is_degraded(),
        Err(err) => {
            warn!(error = %err, "storage health check failed");
            false
        }
    };

    let feed_stale = synchronizer.view().is_some_and(|view| view.stale);
    HealthResponse::new(store_healthy, synchronizer.session_id().await, feed_stale)
}
