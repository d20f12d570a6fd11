/// Round countdown.
pub mod countdown;
/// Session domain model.
pub mod session;
mod sse;
/// Session lifecycle rules.
pub mod state_machine;

use std::sync::Arc;

use tokio::sync::watch;

use crate::{config::AppConfig, services::synchronizer::SessionSynchronizer};

pub use self::sse::SseHub;

/// Handle to [`AppState`] shared by every route.
pub type SharedState = Arc<AppState>;

const SSE_CAPACITY: usize = 32;

/// Central application state: the local participant's synchronizer plus the
/// plumbing the HTTP layer needs around it.
pub struct AppState {
    config: AppConfig,
    synchronizer: SessionSynchronizer,
    sse: SseHub,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(config: AppConfig, synchronizer: SessionSynchronizer) -> SharedState {
        let (degraded, _rx) = watch::channel(false);
        Arc::new(Self {
            config,
            synchronizer,
            sse: SseHub::new(SSE_CAPACITY),
            degraded,
        })
    }

    /// Configuration loaded at startup.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Session engine of the local participant.
    pub fn synchronizer(&self) -> &SessionSynchronizer {
        &self.synchronizer
    }

    /// Broadcast hub used for the session SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update the degraded flag, returning whether it changed.
    pub fn update_degraded(&self, value: bool) -> bool {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        })
    }
}
