//! Prometheus metrics for the Stackpulse analytics API
//!
//! This module is only compiled when the `metrics` feature is enabled.
//!
//! - `http_requests_total` - Counter for total HTTP requests
//! - `http_request_duration_seconds` - Histogram for request latencies
//! - `tracked_actions_total` - Counter for tracked actions by action
//! - `tracking_effects_total` - Counter for best-effort write outcomes
//! - `rate_limit_hits_total` - Counter for rejected requests per limiter
//! - `tracking_events_dropped_total` - Counter for events that never reached the log

use axum::{
    extract::{MatchedPath, Request},
    http::StatusCode,
    middleware::Next,
    response::IntoResponse,
};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    /// Counter for total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// Histogram for HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latency in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    pub static ref TRACKED_ACTIONS_TOTAL: CounterVec = register_counter_vec!(
        "tracked_actions_total",
        "Total number of tracked component actions",
        &["action"]
    )
    .unwrap();

    pub static ref TRACKING_EFFECTS_TOTAL: CounterVec = register_counter_vec!(
        "tracking_effects_total",
        "Outcomes of best-effort tracking writes",
        &["effect", "outcome"]
    )
    .unwrap();

    pub static ref RATE_LIMIT_HITS_TOTAL: CounterVec = register_counter_vec!(
        "rate_limit_hits_total",
        "Requests rejected by a rate limiter",
        &["limiter"]
    )
    .unwrap();

    pub static ref TRACKING_EVENTS_DROPPED_TOTAL: CounterVec = register_counter_vec!(
        "tracking_events_dropped_total",
        "Tracking events dropped before reaching the event log",
        &["reason"]
    )
    .unwrap();
}

/// Axum middleware to track HTTP request metrics
pub async fn track_metrics(req: Request, next: Next) -> impl IntoResponse {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Handler for the `/metrics` endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", encoder.format_type())],
            buffer,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

pub fn record_tracked_action(action: &str) {
    TRACKED_ACTIONS_TOTAL.with_label_values(&[action]).inc();
}

pub fn record_effect(effect: &str, outcome: &str) {
    TRACKING_EFFECTS_TOTAL
        .with_label_values(&[effect, outcome])
        .inc();
}

pub fn record_rate_limit_hit(limiter: &str) {
    RATE_LIMIT_HITS_TOTAL.with_label_values(&[limiter]).inc();
}

pub fn record_event_dropped(reason: &str) {
    TRACKING_EVENTS_DROPPED_TOTAL
        .with_label_values(&[reason])
        .inc();
}
