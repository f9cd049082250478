//! Integration tests for the Stackpulse analytics API
//!
//! Every test drives the real router over a temporary SQLite database seeded
//! with a handful of components.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use stackpulse_analytics_api::{
    build_router,
    config::ApiConfig,
    events::{EventQueue, EventQueueConfig},
    rate_limiting::{FixedWindowLimiter, RateLimitConfig},
    AppState,
};
use stackpulse_analytics_core::{Component, TrackingAction, TrackingEvent};
use stackpulse_analytics_storage::{
    get_component, insert_component, insert_events, AnalyticsBackend, DynAnalyticsBackend,
    LocalSqliteBackend,
};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::mpsc::Receiver;
use tower::ServiceExt;

const BUTTON: &str = "11111111-1111-4111-8111-111111111111";
const MODAL: &str = "22222222-2222-4222-8222-222222222222";
const PRIVATE: &str = "33333333-3333-4333-8333-333333333333";
const UNKNOWN: &str = "99999999-9999-4999-8999-999999999999";
const AUTHOR: &str = "author-1";

// =============================================================================
// Test Helpers
// =============================================================================

struct TestApp {
    router: Router,
    backend: Arc<DynAnalyticsBackend>,
    _events: Receiver<TrackingEvent>,
    _file: NamedTempFile,
}

fn component(id: &str, name: &str, is_public: bool, usage_count: i64) -> Component {
    let now = Utc::now();
    Component {
        id: id.to_string(),
        name: name.to_string(),
        author_id: AUTHOR.to_string(),
        category: Some("forms".to_string()),
        framework: Some("react".to_string()),
        is_public,
        is_featured: false,
        usage_count,
        rating: None,
        performance_score: 0.0,
        accessibility_score: 0.0,
        created_at: now,
        updated_at: now,
    }
}

fn test_app_with(export_limit: u32) -> TestApp {
    let file = NamedTempFile::new().expect("temp file");
    let backend = LocalSqliteBackend::new(file.path());
    {
        let conn = backend.get_connection().expect("connection");
        insert_component(&conn, &component(BUTTON, "Button", true, 100)).unwrap();
        insert_component(&conn, &component(MODAL, "Modal", true, 10)).unwrap();
        insert_component(&conn, &component(PRIVATE, "Secret", false, 0)).unwrap();
    }
    let backend: Arc<DynAnalyticsBackend> = Arc::new(backend);

    let config = ApiConfig::default();
    let (events, receiver) = EventQueue::new(&EventQueueConfig::default());
    let state = AppState::new(Arc::clone(&backend), events, &config)
        .with_export_limiter(Arc::new(FixedWindowLimiter::new(RateLimitConfig::new(
            export_limit,
            3600,
        ))))
        .with_bulk_export_limiter(Arc::new(FixedWindowLimiter::new(RateLimitConfig::new(
            export_limit,
            3600,
        ))));

    TestApp {
        router: build_router(state),
        backend,
        _events: receiver,
        _file: file,
    }
}

fn test_app() -> TestApp {
    test_app_with(10)
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn get_as(&self, uri: &str, user_id: &str) -> Response {
        self.send(
            Request::builder()
                .uri(uri)
                .header("x-user-id", user_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    async fn post_json(&self, uri: &str, body: Value, user_id: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn track(&self, component_id: &str, action: &str) -> Response {
        self.post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": component_id, "action": action }),
            None,
        )
        .await
    }

    fn usage_count(&self, id: &str) -> i64 {
        let conn = self.backend.get_connection().unwrap();
        get_component(&conn, id).unwrap().unwrap().usage_count
    }

    fn stat_rows(&self, id: &str) -> i64 {
        let conn = self.backend.get_connection().unwrap();
        conn.query_row(
            "SELECT COUNT(*) FROM component_usage_stats WHERE component_id = ?1",
            [id],
            |row| row.get(0),
        )
        .unwrap()
    }
}

async fn extract_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    serde_json::from_slice(&body).expect("Failed to parse JSON")
}

async fn extract_text_body(response: Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(body.to_vec()).expect("utf-8 body")
}

// =============================================================================
// Health and request ids
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let response = app.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_text_body(response).await, "ok");
}

#[tokio::test]
async fn test_request_id_echoed_and_stamped_on_errors() {
    let app = test_app();
    let response = app
        .send(
            Request::builder()
                .uri("/api/v1/analytics/track")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["x-request-id"], "req-123");
    let body = extract_json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["request_id"], "req-123");
}

// =============================================================================
// POST /analytics/track
// =============================================================================

#[tokio::test]
async fn test_track_view_reports_effects() {
    let app = test_app();
    let response = app.track(BUTTON, "view").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["tracked"], true);
    assert_eq!(body["data"]["component_id"], BUTTON);
    assert_eq!(body["data"]["action"], "view");
    assert_eq!(body["data"]["effects"]["usage_counter"], "skipped");
    assert_eq!(body["data"]["effects"]["daily_stats"], "applied");
    assert_eq!(body["data"]["effects"]["trending_score"], "applied");
    assert_eq!(body["data"]["effects"]["event_log"], "queued");

    // Views never touch the lifetime counter
    assert_eq!(app.usage_count(BUTTON), 100);
    assert_eq!(app.stat_rows(BUTTON), 1);
}

#[tokio::test]
async fn test_track_import_updates_counters() {
    let app = test_app();
    let ok = app
        .post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": MODAL, "action": "import", "user_id": "u1" }),
            None,
        )
        .await;
    assert_eq!(ok.status(), StatusCode::OK);
    let body = extract_json_body(ok).await;
    assert_eq!(body["data"]["effects"]["usage_counter"], "applied");

    let failed = app
        .post_json(
            "/api/v1/analytics/track",
            json!({
                "component_id": MODAL,
                "action": "import",
                "user_id": "u2",
                "metadata": { "success": false }
            }),
            None,
        )
        .await;
    assert_eq!(failed.status(), StatusCode::OK);

    assert_eq!(app.usage_count(MODAL), 12);

    let conn = app.backend.get_connection().unwrap();
    let (uses, users, ok_imports, failed_imports): (i64, i64, i64, i64) = conn
        .query_row(
            "SELECT total_uses, unique_users, successful_imports, failed_imports
             FROM component_usage_stats WHERE component_id = ?1",
            [MODAL],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!((uses, users, ok_imports, failed_imports), (2, 2, 1, 1));
}

#[tokio::test]
async fn test_track_private_component_by_non_author_is_forbidden() {
    let app = test_app();
    let response = app
        .post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": PRIVATE, "action": "import", "user_id": "intruder" }),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = extract_json_body(response).await;
    assert_eq!(body["success"], false);
    assert!(body["request_id"].is_string());

    // No counter was touched
    assert_eq!(app.usage_count(PRIVATE), 0);
    assert_eq!(app.stat_rows(PRIVATE), 0);
}

#[tokio::test]
async fn test_track_private_component_by_author() {
    let app = test_app();
    let response = app
        .post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": PRIVATE, "action": "copy" }),
            Some(AUTHOR),
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.usage_count(PRIVATE), 1);
}

#[tokio::test]
async fn test_track_unknown_component_is_not_found() {
    let app = test_app();
    let response = app.track(UNKNOWN, "view").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_track_validation_errors() {
    let app = test_app();

    let response = app.track("not-a-uuid", "view").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json_body(response).await;
    assert_eq!(body["details"]["field"], "component_id");

    let response = app.track(BUTTON, "like").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json_body(response).await;
    assert_eq!(body["details"]["field"], "action");

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/v1/analytics/track")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": BUTTON, "action": "view", "metadata": [1, 2, 3] }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// GET /analytics/track
// =============================================================================

#[tokio::test]
async fn test_component_stats_after_tracking() {
    let app = test_app();
    for _ in 0..3 {
        app.track(BUTTON, "view").await;
    }

    let response = app
        .get(&format!(
            "/api/v1/analytics/track?component_id={}&timeframe=7d",
            BUTTON
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["component_id"], BUTTON);
    assert_eq!(data["timeframe"], "7d");
    assert_eq!(data["period"]["days"], 7);
    assert_eq!(data["total_views"], 3);
    assert_eq!(data["total_imports"], 0);
}

#[tokio::test]
async fn test_component_stats_of_private_component() {
    let app = test_app();
    let response = app
        .post_json(
            "/api/v1/analytics/track",
            json!({ "component_id": PRIVATE, "action": "view" }),
            Some(AUTHOR),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let uri = format!("/api/v1/analytics/track?component_id={}&timeframe=7d", PRIVATE);

    let response = app.get(&uri).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.get_as(&uri, "intruder").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = extract_json_body(response).await;
    assert!(body["data"].is_null());

    let response = app.get_as(&uri, AUTHOR).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["data"]["total_views"], 1);

    let response = app
        .get(&format!("/api/v1/analytics/track?component_id={}", UNKNOWN))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_component_stats_validation() {
    let app = test_app();

    let response = app.get("/api/v1/analytics/track").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!(
            "/api/v1/analytics/track?component_id={}&timeframe=1y",
            BUTTON
        ))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json_body(response).await;
    assert_eq!(body["details"]["field"], "timeframe");
}

// =============================================================================
// Read endpoints
// =============================================================================

#[tokio::test]
async fn test_popular_hides_private_components() {
    let app = test_app();
    let response = app.get("/api/v1/analytics/popular").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let components = body["data"]["components"].as_array().unwrap();
    assert_eq!(components.len(), 2);
    assert_eq!(components[0]["id"], BUTTON);
    assert_eq!(components[0]["popularity_score"], 60);
    assert_eq!(body["data"]["summary"]["total_components"], 2);
    assert_eq!(body["data"]["summary"]["sort_by"], "popularity");

    // The author sees their private component too
    let response = app.get_as("/api/v1/analytics/popular", AUTHOR).await;
    let body = extract_json_body(response).await;
    assert_eq!(body["data"]["summary"]["total_components"], 3);
}

#[tokio::test]
async fn test_popular_validation() {
    let app = test_app();
    for uri in [
        "/api/v1/analytics/popular?limit=0",
        "/api/v1/analytics/popular?limit=101",
        "/api/v1/analytics/popular?sort_by=downloads",
        "/api/v1/analytics/popular?timeframe=2w",
    ] {
        let response = app.get(uri).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }

    let response = app.get("/api/v1/analytics/popular?limit=1&sort_by=usage").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json_body(response).await;
    assert_eq!(body["data"]["components"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_trending_lists_active_components() {
    let app = test_app();
    app.track(MODAL, "view").await;

    let response = app.get("/api/v1/analytics/trending?timeframe=24h").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let components = body["data"]["components"].as_array().unwrap();
    assert_eq!(components.len(), 1);
    assert_eq!(components[0]["id"], MODAL);
    assert_eq!(components[0]["trending_metrics"]["current_usage"], 1);
    assert_eq!(body["data"]["summary"]["candidates"], 1);

    let response = app.get("/api/v1/analytics/trending?timeframe=90d").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app.get("/api/v1/analytics/trending?min_growth=abc").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_usage_with_details() {
    let app = test_app();
    app.track(BUTTON, "view").await;
    app.track(BUTTON, "import").await;

    let response = app
        .get(&format!(
            "/api/v1/analytics/usage?component_id={}&timeframe=30d&granularity=weekly&include_details=true",
            BUTTON
        ))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["granularity"], "weekly");
    assert_eq!(data["truncated"], false);

    let buckets = data["usage_data"].as_array().unwrap();
    let total: i64 = buckets.iter().map(|b| b["total_uses"].as_i64().unwrap()).sum();
    assert_eq!(total, 2);

    assert!(data["insights"]["trend"].is_string());
    assert_eq!(data["comparison"]["current_total_uses"], 2);
    assert_eq!(data["breakdowns"]["imports"]["successful"], 1);
}

#[tokio::test]
async fn test_usage_action_breakdown_hides_private_events() {
    let app = test_app();
    {
        let conn = app.backend.get_connection().unwrap();
        let downloads: Vec<TrackingEvent> = (0..5)
            .map(|_| TrackingEvent::new(PRIVATE, TrackingAction::Download))
            .collect();
        insert_events(&conn, &downloads).unwrap();
        insert_events(&conn, &[TrackingEvent::new(BUTTON, TrackingAction::View)]).unwrap();
    }

    let uri = "/api/v1/analytics/usage?include_details=true";

    let body = extract_json_body(app.get(uri).await).await;
    let actions = &body["data"]["breakdowns"]["actions"];
    assert_eq!(actions["view"], 1);
    assert!(actions.get("download").is_none());

    let body = extract_json_body(app.get_as(uri, "intruder").await).await;
    assert!(body["data"]["breakdowns"]["actions"].get("download").is_none());

    let body = extract_json_body(app.get_as(uri, AUTHOR).await).await;
    assert_eq!(body["data"]["breakdowns"]["actions"]["download"], 5);
}

#[tokio::test]
async fn test_usage_without_details_omits_them() {
    let app = test_app();
    let response = app.get("/api/v1/analytics/usage").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    assert!(body["data"]["usage_data"].as_array().unwrap().is_empty());
    assert!(body["data"].get("insights").is_none());
    assert!(body["data"].get("comparison").is_none());

    let response = app.get("/api/v1/analytics/usage?granularity=yearly").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .get(&format!("/api/v1/analytics/usage?component_id={}", PRIVATE))
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .get(&format!("/api/v1/analytics/usage?component_id={}", UNKNOWN))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_overview_shape() {
    let app = test_app();
    app.track(BUTTON, "import").await;

    let response = app
        .get("/api/v1/analytics?timeframe=7d&categories=forms&frameworks=react,vue&limit=5")
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let data = &body["data"];
    assert_eq!(data["overview"]["total_components"], 2);
    assert_eq!(data["overview"]["active_components"], 1);
    assert_eq!(data["overview"]["total_uses"], 1);
    assert!(data["trending"].is_array());
    assert!(data["popular"].is_array());
    assert!(data["usage"]["usage_data"].is_array());

    let response = app.get("/api/v1/analytics?categories=bad%3Bvalue").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Exports
// =============================================================================

#[tokio::test]
async fn test_export_requires_caller() {
    let app = test_app();
    let response = app.get("/api/v1/analytics/export").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .post_json(
            "/api/v1/analytics/export/bulk",
            json!({ "component_ids": [BUTTON] }),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_export_json_and_csv() {
    let app = test_app();
    app.track(BUTTON, "view").await;

    let response = app
        .get_as(
            &format!("/api/v1/analytics/export?component_id={}", BUTTON),
            "user-1",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-ratelimit-limit"], "10");
    assert_eq!(response.headers()["x-ratelimit-remaining"], "9");
    let body = extract_json_body(response).await;
    assert_eq!(body["data"]["rows"].as_array().unwrap().len(), 1);

    let response = app
        .get_as("/api/v1/analytics/export?format=csv", "user-1")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/csv");
    let csv = extract_text_body(response).await;
    let lines: Vec<&str> = csv.lines().collect();
    assert!(lines[0].starts_with("component_id,date,total_uses"));
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with(BUTTON));
}

#[tokio::test]
async fn test_export_rate_limited() {
    let app = test_app_with(2);
    for _ in 0..2 {
        let response = app.get_as("/api/v1/analytics/export", "user-1").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = app.get_as("/api/v1/analytics/export", "user-1").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));
    let body = extract_json_body(response).await;
    assert!(body["retry_after"].as_u64().unwrap() > 0);

    // Quotas are per caller
    let response = app.get_as("/api/v1/analytics/export", "user-2").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_bulk_export() {
    let app = test_app();
    app.track(BUTTON, "view").await;

    let response = app
        .post_json(
            "/api/v1/analytics/export/bulk",
            json!({ "component_ids": [BUTTON, PRIVATE, UNKNOWN], "timeframe": "7d" }),
            Some("user-1"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json_body(response).await;
    let exports = body["data"]["exports"].as_array().unwrap();
    assert_eq!(exports.len(), 1);
    assert_eq!(exports[0]["component_id"], BUTTON);
    assert_eq!(exports[0]["rows"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["missing"], json!([PRIVATE, UNKNOWN]));
}

#[tokio::test]
async fn test_bulk_export_rejects_too_many_ids() {
    let app = test_app();
    let ids: Vec<String> = (0..51)
        .map(|i| format!("00000000-0000-4000-8000-{:012}", i))
        .collect();

    let response = app
        .post_json(
            "/api/v1/analytics/export/bulk",
            json!({ "component_ids": ids }),
            Some("user-1"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json_body(response).await;
    assert_eq!(body["details"]["field"], "component_ids");

    let response = app
        .post_json(
            "/api/v1/analytics/export/bulk",
            json!({ "component_ids": [] }),
            Some("user-1"),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
