//! race-room binary entrypoint wiring the session synchronizer, its document
//! store and the lobby REST/SSE layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use race_room::{
    config::AppConfig,
    dao::{
        document_store::{DocumentStore, memory::InMemoryDocumentStore},
        session::SessionRepository,
    },
    identity::StaticIdentityProvider,
    routes,
    services::{sse_events, storage_supervisor, synchronizer::SessionSynchronizer},
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let store = open_store(&config).await;
    let repository = SessionRepository::new(store, config.collection.clone());
    let synchronizer = SessionSynchronizer::new(
        repository,
        Arc::new(StaticIdentityProvider::from_env()),
        config.sync_settings(),
    );
    let app_state = AppState::new(config, synchronizer);

    sse_events::spawn_view_forwarder(
        app_state.synchronizer().watch_view(),
        app_state.sse().clone(),
    );
    tokio::spawn(storage_supervisor::run(app_state.clone()));
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Connect to CouchDB when `COUCH_BASE_URL` is set, otherwise keep sessions in memory.
async fn open_store(config: &AppConfig) -> Arc<dyn DocumentStore> {
    #[cfg(feature = "couch-store")]
    if env::var_os("COUCH_BASE_URL").is_some() {
        use race_room::dao::{
            document_store::couchdb::{CouchConfig, CouchDocumentStore},
            storage::StorageError,
        };

        let max_attempts = config.transaction_max_attempts;
        return storage_supervisor::connect_with_backoff(move || async move {
            let couch = CouchConfig::from_env()?.with_max_attempts(max_attempts);
            let store = CouchDocumentStore::connect(couch).await?;
            Ok::<_, StorageError>(Arc::new(store) as Arc<dyn DocumentStore>)
        })
        .await;
    }

    info!("no document store configured; sessions are kept in memory");
    Arc::new(InMemoryDocumentStore::with_max_attempts(
        config.transaction_max_attempts,
    ))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
