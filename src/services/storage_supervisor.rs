use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{document_store::DocumentStore, storage::StorageError},
    services::sse_events::broadcast_system_status,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Connect to the storage backend, retrying with exponential backoff until it answers.
pub async fn connect_with_backoff<F, Fut>(mut connect: F) -> Arc<dyn DocumentStore>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Arc<dyn DocumentStore>, StorageError>>,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                info!("storage connection established");
                return store;
            }
            Err(err) => {
                warn!(
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "storage connection attempt failed"
                );
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the storage backend and keep the shared degraded flag current.
pub async fn run(state: SharedState) {
    let mut delay = INITIAL_DELAY;

    loop {
        match state.synchronizer().repository().health_check().await {
            Ok(()) => {
                if state.update_degraded(false) {
                    info!("storage healthy again; leaving degraded mode");
                    broadcast_system_status(state.sse(), false);
                }
                delay = INITIAL_DELAY;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                if state.update_degraded(true) {
                    warn!(error = %err, "storage health check failed; entering degraded mode");
                    broadcast_system_status(state.sse(), true);
                } else {
                    warn!(error = %err, "storage still unavailable");
                }
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures::{future::BoxFuture, stream::BoxStream};
    use serde_json::Value;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            document_store::{
                DocumentEvent, DocumentSnapshot, Fields, TransactFn, memory::InMemoryDocumentStore,
            },
            session::SessionRepository,
            storage::StorageResult,
        },
        identity::StaticIdentityProvider,
        services::synchronizer::{SessionSynchronizer, SyncSettings},
        state::AppState,
    };

    /// Memory store whose health check can be switched off.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: InMemoryDocumentStore,
        down: Arc<AtomicBool>,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    impl DocumentStore for FlakyStore {
        fn create(&self, collection: &str, fields: Fields) -> BoxFuture<'static, StorageResult<String>> {
            self.inner.create(collection, fields)
        }

        fn get(
            &self,
            collection: &str,
            id: &str,
        ) -> BoxFuture<'static, StorageResult<Option<DocumentSnapshot>>> {
            self.inner.get(collection, id)
        }

        fn subscribe(
            &self,
            collection: &str,
            id: &str,
        ) -> BoxStream<'static, StorageResult<DocumentEvent>> {
            self.inner.subscribe(collection, id)
        }

        fn merge_array_field(
            &self,
            collection: &str,
            id: &str,
            field: &str,
            key: &str,
            element: Value,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.merge_array_field(collection, id, field, key, element)
        }

        fn set_fields(
            &self,
            collection: &str,
            id: &str,
            fields: Fields,
        ) -> BoxFuture<'static, StorageResult<()>> {
            self.inner.set_fields(collection, id, fields)
        }

        fn transact(
            &self,
            collection: &str,
            id: &str,
            body: TransactFn,
        ) -> BoxFuture<'static, StorageResult<DocumentSnapshot>> {
            self.inner.transact(collection, id, body)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let down = self.down.load(Ordering::SeqCst);
            Box::pin(async move {
                if down {
                    Err(StorageError::unavailable("health check failed".into(), Refused))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn state_over(store: FlakyStore) -> SharedState {
        let config = AppConfig::default();
        let repository = SessionRepository::new(Arc::new(store), config.collection.clone());
        let synchronizer = SessionSynchronizer::new(
            repository,
            Arc::new(StaticIdentityProvider::new(None)),
            SyncSettings::default(),
        );
        AppState::new(config, synchronizer)
    }

    #[tokio::test(start_paused = true)]
    async fn health_failures_toggle_degraded_mode() {
        let store = FlakyStore::default();
        let state = state_over(store.clone());
        let mut degraded = state.degraded_watcher();
        let supervisor = tokio::spawn(run(state.clone()));

        store.down.store(true, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(30), degraded.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(state.is_degraded());

        store.down.store(false, Ordering::SeqCst);
        tokio::time::timeout(Duration::from_secs(30), degraded.changed())
            .await
            .unwrap()
            .unwrap();
        assert!(!state.is_degraded());

        supervisor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_until_success() {
        let mut attempts = 0;
        let _store = connect_with_backoff(|| {
            attempts += 1;
            let outcome: Result<Arc<dyn DocumentStore>, StorageError> = if attempts < 3 {
                Err(StorageError::unavailable("refused".into(), Refused))
            } else {
                Ok(Arc::new(InMemoryDocumentStore::new()))
            };
            async move { outcome }
        })
        .await;

        assert_eq!(attempts, 3);
    }
}
