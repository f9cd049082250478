//! Stackpulse Analytics API Library
//!
//! HTTP surface for component usage analytics: tracking writes, popular and
//! trending listings, usage series, the overview dashboard and exports.
//! [`build_router`] assembles the full application for the binary and for
//! integration tests.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use stackpulse_analytics_storage::DynAnalyticsBackend;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod events;
pub mod export;
pub mod params;
pub mod rate_limiting;
pub mod reports;
pub mod request_id;
pub mod tracking;

#[cfg(feature = "metrics")]
pub mod metrics;

use config::ApiConfig;
use events::EventQueue;
use rate_limiting::{FixedWindowLimiter, RateLimiter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<DynAnalyticsBackend>,
    pub events: EventQueue,
    pub export_limiter: Arc<dyn RateLimiter>,
    pub bulk_export_limiter: Arc<dyn RateLimiter>,
    /// Row cap applied to every usage stat fetch
    pub stat_fetch_limit: usize,
}

impl AppState {
    /// Build state with in-memory fixed-window limiters from `config`
    pub fn new(backend: Arc<DynAnalyticsBackend>, events: EventQueue, config: &ApiConfig) -> Self {
        Self {
            backend,
            events,
            export_limiter: Arc::new(FixedWindowLimiter::new(config.export_rate_limit.clone())),
            bulk_export_limiter: Arc::new(FixedWindowLimiter::new(
                config.bulk_export_rate_limit.clone(),
            )),
            stat_fetch_limit: config.stat_fetch_limit,
        }
    }

    pub fn with_export_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.export_limiter = limiter;
        self
    }

    pub fn with_bulk_export_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.bulk_export_limiter = limiter;
        self
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Assemble the router with all routes and middleware
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/analytics/track",
            get(tracking::get_component_stats).post(tracking::track_usage),
        )
        .route("/analytics/popular", get(reports::popular))
        .route("/analytics/trending", get(reports::trending))
        .route("/analytics/usage", get(reports::usage))
        .route("/analytics", get(reports::overview))
        .route("/analytics/export", get(export::export_usage))
        .route("/analytics/export/bulk", post(export::bulk_export));

    let router = Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api);

    #[cfg(feature = "metrics")]
    let router = router
        .route("/metrics", get(metrics::metrics_handler))
        .layer(middleware::from_fn(metrics::track_metrics));

    router
        .layer(middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
