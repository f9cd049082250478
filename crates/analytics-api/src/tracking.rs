//! Tracking endpoints: `GET` and `POST /api/v1/analytics/track`.
//!
//! A tracked action passes validation and the access check before anything
//! is written. The writes themselves are best-effort: each one reports an
//! [`EffectOutcome`] in the response and is logged, but none of them can fail
//! the request.

use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::events::EnqueueOutcome;
use crate::{params, AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use stackpulse_analytics_core::{
    validation, Component, Period, Timeframe, TrackingAction, TrackingEvent,
};
use stackpulse_analytics_storage::{
    fetch_usage_stats, get_component, increment_usage_count, record_daily_usage,
    refresh_trending_score, AnalyticsBackend, ImportOutcome,
};
use tracing::{debug, error, info};

const STATS_TIMEFRAMES: &[Timeframe] = &[Timeframe::Week, Timeframe::Month, Timeframe::Quarter];

#[derive(Debug, Deserialize)]
pub struct ComponentStatsParams {
    pub component_id: Option<String>,
    pub timeframe: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PeriodInfo {
    pub start_date: chrono::NaiveDate,
    pub end_date: chrono::NaiveDate,
    pub days: i64,
}

impl From<&Period> for PeriodInfo {
    fn from(period: &Period) -> Self {
        Self {
            start_date: period.start_date,
            end_date: period.end_date,
            days: period.days,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ComponentStats {
    pub component_id: String,
    pub timeframe: Timeframe,
    pub period: PeriodInfo,
    pub total_views: i64,
    pub total_unique_users: i64,
    pub total_imports: i64,
    pub daily_average: f64,
    /// Trending score of the most recent day in the period
    pub trending_score: f64,
    pub truncated: bool,
}

/// `GET /analytics/track?component_id&timeframe`
pub async fn get_component_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ComponentStatsParams>,
) -> ApiResult<ComponentStats> {
    let raw_id = query
        .component_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid_param("component_id", "component_id is required"))?;
    let component_id = params::component_id(raw_id)?;
    let timeframe = params::timeframe(
        query.timeframe.as_deref(),
        STATS_TIMEFRAMES,
        Timeframe::Month,
    )?;

    let caller = params::caller(&headers)?;

    let period = Period::from_timeframe(timeframe, Utc::now());
    let conn = state.backend.get_connection()?;
    let component = get_component(&conn, &component_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Component '{}' not found", component_id)))?;
    check_access(&component, caller.as_deref())?;

    let fetch = fetch_usage_stats(
        &conn,
        Some(&component_id),
        &period.range(),
        state.stat_fetch_limit,
    )?;

    let total_views: i64 = fetch.rows.iter().map(|s| s.total_uses).sum();
    let total_unique_users: i64 = fetch.rows.iter().map(|s| s.unique_users).sum();
    let total_imports: i64 = fetch.rows.iter().map(|s| s.successful_imports).sum();
    let trending_score = fetch.rows.last().map(|s| s.trending_score).unwrap_or(0.0);

    debug!(component_id = %component_id, rows = fetch.rows.len(), "Component stats");

    Ok(ApiResponse::ok(ComponentStats {
        component_id,
        timeframe,
        period: PeriodInfo::from(&period),
        total_views,
        total_unique_users,
        total_imports,
        daily_average: total_views as f64 / period.days as f64,
        trending_score,
        truncated: fetch.truncated,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub component_id: String,
    pub action: String,
    pub user_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub session_id: Option<String>,
}

/// Result of one best-effort write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectOutcome {
    Applied,
    /// Not applicable to this action
    Skipped,
    Failed,
    /// Handed to the event queue
    Queued,
    /// The event queue refused the event
    Dropped,
}

impl EffectOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            EffectOutcome::Applied => "applied",
            EffectOutcome::Skipped => "skipped",
            EffectOutcome::Failed => "failed",
            EffectOutcome::Queued => "queued",
            EffectOutcome::Dropped => "dropped",
        }
    }
}

impl From<EnqueueOutcome> for EffectOutcome {
    fn from(outcome: EnqueueOutcome) -> Self {
        match outcome {
            EnqueueOutcome::Queued => EffectOutcome::Queued,
            EnqueueOutcome::Dropped => EffectOutcome::Dropped,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackEffects {
    pub usage_counter: EffectOutcome,
    pub daily_stats: EffectOutcome,
    /// Skipped when the daily row could not be written
    pub trending_score: EffectOutcome,
    pub event_log: EffectOutcome,
}

#[derive(Debug, Serialize)]
pub struct TrackResponse {
    pub tracked: bool,
    pub component_id: String,
    pub action: TrackingAction,
    pub effects: TrackEffects,
}

/// A validated tracking request
struct ValidatedTrack {
    component_id: String,
    action: TrackingAction,
    user_id: Option<String>,
    session_id: Option<String>,
    metadata: Option<serde_json::Value>,
}

fn validate_track(
    body: TrackRequest,
    header_user: Option<String>,
) -> Result<ValidatedTrack, ApiError> {
    let component_id = params::component_id(&body.component_id)?;
    let action: TrackingAction = body
        .action
        .parse()
        .map_err(|e: stackpulse_analytics_core::AnalyticsError| {
            ApiError::invalid_param("action", e.to_string())
        })?;

    let user_id = match body.user_id.filter(|s| !s.trim().is_empty()) {
        Some(user_id) => {
            validation::validate_identifier(&user_id, "user_id")
                .map_err(|e| ApiError::invalid_param("user_id", e.to_string()))?;
            Some(user_id)
        }
        None => header_user,
    };

    let session_id = body.session_id.filter(|s| !s.trim().is_empty());
    if let Some(session_id) = &session_id {
        validation::validate_identifier(session_id, "session_id")
            .map_err(|e| ApiError::invalid_param("session_id", e.to_string()))?;
    }

    if let Some(metadata) = &body.metadata {
        validation::validate_metadata(metadata)
            .map_err(|e| ApiError::invalid_param("metadata", e.to_string()))?;
    }

    Ok(ValidatedTrack {
        component_id,
        action,
        user_id,
        session_id,
        metadata: body.metadata,
    })
}

/// Imports count as failed only when the client reports `success: false`
fn import_outcome(action: TrackingAction, metadata: Option<&serde_json::Value>) -> ImportOutcome {
    if action != TrackingAction::Import {
        return ImportOutcome::None;
    }
    let failed = metadata
        .and_then(|m| m.get("success"))
        .and_then(|v| v.as_bool())
        == Some(false);
    if failed {
        ImportOutcome::Failed
    } else {
        ImportOutcome::Succeeded
    }
}

fn log_effect(effect: &str, component_id: &str, result: &Result<(), ApiError>) -> EffectOutcome {
    let outcome = match result {
        Ok(()) => EffectOutcome::Applied,
        Err(e) => {
            error!(effect, component_id, error = %e, "Tracking effect failed");
            EffectOutcome::Failed
        }
    };
    #[cfg(feature = "metrics")]
    crate::metrics::record_effect(effect, outcome.as_str());
    outcome
}

fn apply_usage_counter(conn: &Connection, track: &ValidatedTrack) -> EffectOutcome {
    if !track.action.increments_usage_count() {
        return EffectOutcome::Skipped;
    }
    let result = increment_usage_count(conn, &track.component_id)
        .map(|_| ())
        .map_err(ApiError::from);
    log_effect("usage_counter", &track.component_id, &result)
}

fn apply_daily_stats(
    conn: &Connection,
    track: &ValidatedTrack,
    now: DateTime<Utc>,
) -> EffectOutcome {
    let result = record_daily_usage(
        conn,
        &track.component_id,
        now.date_naive(),
        track.user_id.as_deref(),
        import_outcome(track.action, track.metadata.as_ref()),
    )
    .map(|_| ())
    .map_err(ApiError::from);
    log_effect("daily_stats", &track.component_id, &result)
}

/// Refresh today's trending score; only runs once the daily row was written
fn apply_trending_score(
    conn: &Connection,
    track: &ValidatedTrack,
    now: DateTime<Utc>,
    daily_stats: EffectOutcome,
) -> EffectOutcome {
    if daily_stats != EffectOutcome::Applied {
        return EffectOutcome::Skipped;
    }
    let result = refresh_trending_score(conn, &track.component_id, now)
        .map(|_| ())
        .map_err(ApiError::from);
    log_effect("trending_score", &track.component_id, &result)
}

fn check_access(component: &Component, user_id: Option<&str>) -> Result<(), ApiError> {
    if component.is_visible_to(user_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "Access denied to component '{}'",
            component.id
        )))
    }
}

/// `POST /analytics/track`
pub async fn track_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<TrackRequest>, JsonRejection>,
) -> ApiResult<TrackResponse> {
    let Json(body) = body.map_err(|e| ApiError::BadRequest {
        message: "Invalid request body".to_string(),
        details: Some(serde_json::json!({ "message": e.body_text() })),
    })?;
    let track = validate_track(body, params::caller(&headers)?)?;

    let conn = state.backend.get_connection()?;
    let component = get_component(&conn, &track.component_id)?.ok_or_else(|| {
        ApiError::NotFound(format!("Component '{}' not found", track.component_id))
    })?;
    check_access(&component, track.user_id.as_deref())?;

    #[cfg(feature = "metrics")]
    crate::metrics::record_tracked_action(track.action.as_str());

    let now = Utc::now();
    let usage_counter = apply_usage_counter(&conn, &track);
    let daily_stats = apply_daily_stats(&conn, &track, now);
    let trending_score = apply_trending_score(&conn, &track, now, daily_stats);

    let mut event = TrackingEvent::new(track.component_id.clone(), track.action)
        .with_user(track.user_id.clone())
        .with_session(track.session_id.clone())
        .with_metadata(track.metadata.clone());
    event.created_at = now;
    let event_log = EffectOutcome::from(state.events.enqueue(event));
    #[cfg(feature = "metrics")]
    crate::metrics::record_effect("event_log", event_log.as_str());

    info!(
        component_id = %track.component_id,
        action = track.action.as_str(),
        usage_counter = usage_counter.as_str(),
        daily_stats = daily_stats.as_str(),
        trending_score = trending_score.as_str(),
        event_log = event_log.as_str(),
        "Tracked component action"
    );

    Ok(ApiResponse::ok(TrackResponse {
        tracked: true,
        component_id: track.component_id,
        action: track.action,
        effects: TrackEffects {
            usage_counter,
            daily_stats,
            trending_score,
            event_log,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(action: &str) -> TrackRequest {
        TrackRequest {
            component_id: "5f0c7c1e-8a43-4f5e-9a57-3b1c2d4e5f60".to_string(),
            action: action.to_string(),
            user_id: None,
            metadata: None,
            session_id: None,
        }
    }

    #[test]
    fn test_import_outcome() {
        let success = json!({"success": true});
        let failure = json!({"success": false});
        let unrelated = json!({"source": "docs"});

        assert_eq!(import_outcome(TrackingAction::Import, None), ImportOutcome::Succeeded);
        assert_eq!(
            import_outcome(TrackingAction::Import, Some(&success)),
            ImportOutcome::Succeeded
        );
        assert_eq!(
            import_outcome(TrackingAction::Import, Some(&unrelated)),
            ImportOutcome::Succeeded
        );
        assert_eq!(
            import_outcome(TrackingAction::Import, Some(&failure)),
            ImportOutcome::Failed
        );
        assert_eq!(
            import_outcome(TrackingAction::Copy, Some(&failure)),
            ImportOutcome::None
        );
    }

    #[test]
    fn test_validate_track() {
        let track = validate_track(request("IMPORT"), None).unwrap();
        assert_eq!(track.action, TrackingAction::Import);
        assert!(track.user_id.is_none());

        assert!(validate_track(request("like"), None).is_err());

        let mut bad_id = request("view");
        bad_id.component_id = "nope".to_string();
        assert!(validate_track(bad_id, None).is_err());

        let mut bad_meta = request("view");
        bad_meta.metadata = Some(json!("not an object"));
        assert!(validate_track(bad_meta, None).is_err());
    }

    #[test]
    fn test_body_user_overrides_header() {
        let mut body = request("view");
        body.user_id = Some("body-user".to_string());
        let track = validate_track(body, Some("header-user".to_string())).unwrap();
        assert_eq!(track.user_id.as_deref(), Some("body-user"));

        let track = validate_track(request("view"), Some("header-user".to_string())).unwrap();
        assert_eq!(track.user_id.as_deref(), Some("header-user"));
    }

    /// Schema without foreign keys, so stat rows can exist for a missing component
    fn loose_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        stackpulse_analytics_core::init_sqlite_schema(&conn).unwrap();
        stackpulse_analytics_core::migrations::run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_trending_score_reported_separately() {
        let conn = loose_conn();
        let track = validate_track(request("view"), None).unwrap();
        let now = Utc::now();

        let daily_stats = apply_daily_stats(&conn, &track, now);
        assert_eq!(daily_stats, EffectOutcome::Applied);
        assert_eq!(
            apply_trending_score(&conn, &track, now, daily_stats),
            EffectOutcome::Failed
        );
    }

    #[test]
    fn test_trending_score_skipped_without_daily_row() {
        let conn = loose_conn();
        let track = validate_track(request("view"), None).unwrap();

        assert_eq!(
            apply_trending_score(&conn, &track, Utc::now(), EffectOutcome::Failed),
            EffectOutcome::Skipped
        );
    }

    #[test]
    fn test_effect_outcome_serialization() {
        let effects = TrackEffects {
            usage_counter: EffectOutcome::Skipped,
            daily_stats: EffectOutcome::Applied,
            trending_score: EffectOutcome::Failed,
            event_log: EffectOutcome::Dropped,
        };
        let json = serde_json::to_value(&effects).unwrap();
        assert_eq!(json["usage_counter"], "skipped");
        assert_eq!(json["daily_stats"], "applied");
        assert_eq!(json["trending_score"], "failed");
        assert_eq!(json["event_log"], "dropped");
    }
}
