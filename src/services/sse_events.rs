use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    dto::{
        lobby::SessionViewResponse,
        sse::{ServerEvent, SessionClosedEvent, SystemStatus},
    },
    services::synchronizer::SessionView,
    state::SseHub,
};

/// Carries every published session view.
pub const EVENT_SESSION_VIEW: &str = "session.view";
/// The view was cleared.
pub const EVENT_SESSION_CLOSED: &str = "session.closed";
/// Degraded flag changes.
pub const EVENT_SYSTEM_STATUS: &str = "system.status";
/// First event of every stream.
pub const EVENT_HANDSHAKE: &str = "handshake";

/// Build the event describing `view`, or the closed event once detached.
pub fn session_event(view: Option<&SessionView>, last_id: Option<String>) -> Option<ServerEvent> {
    match view {
        Some(view) => build_event(EVENT_SESSION_VIEW, &SessionViewResponse::from(view)),
        None => build_event(
            EVENT_SESSION_CLOSED,
            &SessionClosedEvent {
                session_id: last_id,
            },
        ),
    }
}

/// Broadcast the degraded flag.
pub fn broadcast_system_status(hub: &SseHub, degraded: bool) {
    if let Some(event) = build_event(EVENT_SYSTEM_STATUS, &SystemStatus { degraded }) {
        hub.broadcast(event);
    }
}

/// Forward every view change onto `hub` until the synchronizer goes away.
pub fn spawn_view_forwarder(
    mut views: watch::Receiver<Option<SessionView>>,
    hub: SseHub,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_id = None;
        while views.changed().await.is_ok() {
            let view = views.borrow_and_update().clone();
            let closed_id = match &view {
                Some(view) => {
                    last_id = Some(view.session.id.clone());
                    None
                }
                None => last_id.take(),
            };
            if view.is_none() && closed_id.is_none() {
                continue;
            }
            if let Some(event) = session_event(view.as_ref(), closed_id) {
                hub.broadcast(event);
            }
        }
        debug!("session view forwarder stopped");
    })
}

fn build_event<T: Serialize>(name: &str, payload: &T) -> Option<ServerEvent> {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, "failed to serialise SSE payload");
            None
        }
    }
}
