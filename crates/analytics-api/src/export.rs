//! Usage export endpoints
//!
//! Both endpoints require a caller (`x-user-id`) and are rate limited per
//! caller: authentication is checked first, then the quota, then the
//! request itself. Successful responses carry the `x-ratelimit-*` headers.

use crate::error::{ApiError, ApiResponse};
use crate::rate_limiting::{RateLimitDecision, RateLimiter};
use crate::tracking::PeriodInfo;
use crate::{params, AppState};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use stackpulse_analytics_core::{validation, Period, Timeframe, UsageStat};
use stackpulse_analytics_storage::{
    fetch_filtered_usage_stats, fetch_usage_stats, get_component, AnalyticsBackend,
    ComponentFilter,
};
use std::fmt::Write;
use tracing::{debug, info};

const EXPORT_TIMEFRAMES: &[Timeframe] = &[
    Timeframe::Day,
    Timeframe::Week,
    Timeframe::Month,
    Timeframe::Quarter,
    Timeframe::Year,
];

const CSV_HEADER: &str =
    "component_id,date,total_uses,unique_users,successful_imports,failed_imports,avg_rating,trending_score";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    fn parse(raw: Option<&str>) -> Result<Self, ApiError> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("json") => Ok(ExportFormat::Json),
            Some("csv") => Ok(ExportFormat::Csv),
            Some(_) => Err(ApiError::invalid_param("format", "must be one of: json, csv")),
        }
    }
}

/// Render rows as CSV, one line per row after the header
pub fn to_csv(rows: &[UsageStat]) -> String {
    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');
    for row in rows {
        let rating = row.avg_rating.map(|r| r.to_string()).unwrap_or_default();
        let _ = writeln!(
            csv,
            "{},{},{},{},{},{},{},{}",
            row.component_id,
            row.date,
            row.total_uses,
            row.unique_users,
            row.successful_imports,
            row.failed_imports,
            rating,
            row.trending_score,
        );
    }
    csv
}

/// Count the request against `limiter` under the caller's key
fn enforce_quota(
    limiter: &dyn RateLimiter,
    name: &str,
    user_id: &str,
) -> Result<RateLimitDecision, ApiError> {
    let decision = limiter.check(user_id);
    if decision.allowed {
        return Ok(decision);
    }
    debug!(limiter = name, user_id, "Export rejected by quota");
    #[cfg(feature = "metrics")]
    crate::metrics::record_rate_limit_hit(name);
    Err(ApiError::RateLimited(decision))
}

fn render<T: Serialize>(
    format: ExportFormat,
    data: T,
    rows: &[UsageStat],
    decision: &RateLimitDecision,
) -> Response {
    let mut response = match format {
        ExportFormat::Json => ApiResponse::ok(data).into_response(),
        ExportFormat::Csv => {
            let filename = format!(
                "attachment; filename=\"usage-export-{}.csv\"",
                Utc::now().format("%Y%m%d")
            );
            (
                [
                    (header::CONTENT_TYPE, "text/csv".to_string()),
                    (header::CONTENT_DISPOSITION, filename),
                ],
                to_csv(rows),
            )
                .into_response()
        }
    };
    decision.apply_headers(response.headers_mut());
    response
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub component_id: Option<String>,
    pub timeframe: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UsageExport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    pub timeframe: Timeframe,
    pub period: PeriodInfo,
    pub rows: Vec<UsageStat>,
    pub truncated: bool,
}

/// `GET /analytics/export`
pub async fn export_usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ExportParams>,
) -> Result<Response, ApiError> {
    let user_id = params::require_caller(&headers)?;
    let decision = enforce_quota(state.export_limiter.as_ref(), "export", &user_id)?;

    let timeframe = params::timeframe(query.timeframe.as_deref(), EXPORT_TIMEFRAMES, Timeframe::Month)?;
    let format = ExportFormat::parse(query.format.as_deref())?;
    let component_id = query
        .component_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(params::component_id)
        .transpose()?;

    let period = Period::from_timeframe(timeframe, Utc::now());
    let conn = state.backend.get_connection()?;
    let fetch = match &component_id {
        Some(id) => {
            let component = get_component(&conn, id)?
                .ok_or_else(|| ApiError::NotFound(format!("Component '{}' not found", id)))?;
            if !component.is_visible_to(Some(&user_id)) {
                return Err(ApiError::Forbidden(format!(
                    "Access denied to component '{}'",
                    id
                )));
            }
            fetch_usage_stats(&conn, Some(id), &period.range(), state.stat_fetch_limit)?
        }
        None => fetch_filtered_usage_stats(
            &conn,
            &ComponentFilter::new().with_viewer(Some(user_id.clone())),
            &period.range(),
            state.stat_fetch_limit,
        )?,
    };

    info!(
        user_id = %user_id,
        component_id = ?component_id,
        rows = fetch.rows.len(),
        "Usage export"
    );

    let rows = fetch.rows;
    let csv_rows = if format == ExportFormat::Csv { rows.clone() } else { Vec::new() };
    let export = UsageExport {
        component_id,
        timeframe,
        period: PeriodInfo::from(&period),
        rows,
        truncated: fetch.truncated,
    };
    Ok(render(format, export, &csv_rows, &decision))
}

#[derive(Debug, Deserialize)]
pub struct BulkExportRequest {
    pub component_ids: Vec<String>,
    pub timeframe: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ComponentExport {
    pub component_id: String,
    pub rows: Vec<UsageStat>,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct BulkExport {
    pub timeframe: Timeframe,
    pub period: PeriodInfo,
    pub exports: Vec<ComponentExport>,
    /// Requested ids that do not exist or are not visible to the caller
    pub missing: Vec<String>,
}

/// `POST /analytics/export/bulk`
pub async fn bulk_export(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<BulkExportRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user_id = params::require_caller(&headers)?;
    let decision = enforce_quota(state.bulk_export_limiter.as_ref(), "bulk_export", &user_id)?;

    let Json(body) = body.map_err(|e| ApiError::BadRequest {
        message: "Invalid request body".to_string(),
        details: Some(serde_json::json!({ "message": e.body_text() })),
    })?;
    let component_ids = validation::validate_component_ids(&body.component_ids)
        .map_err(|e| ApiError::invalid_param("component_ids", e.to_string()))?;
    let timeframe = params::timeframe(body.timeframe.as_deref(), EXPORT_TIMEFRAMES, Timeframe::Month)?;
    let format = ExportFormat::parse(body.format.as_deref())?;

    let period = Period::from_timeframe(timeframe, Utc::now());
    let range = period.range();
    let conn = state.backend.get_connection()?;

    let mut exports = Vec::with_capacity(component_ids.len());
    let mut missing = Vec::new();
    for id in component_ids {
        match get_component(&conn, &id)? {
            Some(component) if component.is_visible_to(Some(&user_id)) => {
                let fetch = fetch_usage_stats(&conn, Some(&id), &range, state.stat_fetch_limit)?;
                exports.push(ComponentExport {
                    component_id: id,
                    rows: fetch.rows,
                    truncated: fetch.truncated,
                });
            }
            _ => missing.push(id),
        }
    }

    info!(
        user_id = %user_id,
        exported = exports.len(),
        missing = missing.len(),
        "Bulk usage export"
    );

    let csv_rows: Vec<UsageStat> = if format == ExportFormat::Csv {
        exports.iter().flat_map(|e| e.rows.iter().cloned()).collect()
    } else {
        Vec::new()
    };
    let export = BulkExport {
        timeframe,
        period: PeriodInfo::from(&period),
        exports,
        missing,
    };
    Ok(render(format, export, &csv_rows, &decision))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiting::{FixedWindowLimiter, RateLimitConfig};
    use chrono::NaiveDate;

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse(None).unwrap(), ExportFormat::Json);
        assert_eq!(ExportFormat::parse(Some("CSV")).unwrap(), ExportFormat::Csv);
        assert!(ExportFormat::parse(Some("xml")).is_err());
    }

    #[test]
    fn test_to_csv() {
        let day = NaiveDate::from_ymd_opt(2024, 4, 2).unwrap();
        let rows = vec![
            UsageStat::new("c1", day).with_uses(5).with_imports(2, 1),
            UsageStat::new("c2", day).with_uses(1).with_rating(4.5),
        ];

        let csv = to_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "c1,2024-04-02,5,0,2,1,,0");
        assert_eq!(lines[2], "c2,2024-04-02,1,0,0,0,4.5,0");
    }

    #[test]
    fn test_enforce_quota() {
        let limiter = FixedWindowLimiter::new(RateLimitConfig::new(1, 60));
        assert!(enforce_quota(&limiter, "export", "user-1").is_ok());

        match enforce_quota(&limiter, "export", "user-1") {
            Err(ApiError::RateLimited(decision)) => {
                assert!(!decision.allowed);
                assert!(decision.retry_after > 0);
            }
            other => panic!("expected rate limit rejection, got {:?}", other.map(|d| d.allowed)),
        }
    }
}
