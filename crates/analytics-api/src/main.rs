//! Stackpulse Analytics API Server
//!
//! Serves the usage analytics API over a local SQLite database.

use stackpulse_analytics_api::{
    build_router,
    config::ApiConfig,
    events::{event_writer_task, EventQueue},
    AppState,
};
use stackpulse_analytics_storage::{AnalyticsBackend, DynAnalyticsBackend, LocalSqliteBackend};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ApiConfig::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    }

    tracing::info!(db_path = %config.db_path, "Using analytics database");

    let backend = LocalSqliteBackend::new(&config.db_path);
    if !backend.exists().unwrap_or(false) {
        tracing::warn!("Database does not exist, initializing new database");
        backend
            .initialize()
            .expect("Failed to initialize analytics database");
    }
    let backend: Arc<DynAnalyticsBackend> = Arc::new(backend);

    let (events, receiver) = EventQueue::new(&config.events);
    tokio::spawn(event_writer_task(
        receiver,
        Arc::clone(&backend),
        config.events.clone(),
    ));

    let state = AppState::new(backend, events, &config);
    let app = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Stackpulse API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
