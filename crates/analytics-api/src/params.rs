//! Query parameter parsing shared by the analytics handlers.
//!
//! Handlers reject tokens outside an endpoint's allowed set with a 400; the
//! core resolvers never see an invalid token.

use crate::error::ApiError;
use axum::http::HeaderMap;
use stackpulse_analytics_core::{validation, Granularity, Timeframe};

/// Header carrying the caller's user id
pub const USER_ID_HEADER: &str = "x-user-id";

pub const DEFAULT_LIMIT: usize = 20;
pub const MAX_LIMIT: i64 = 100;

/// Parse an optional timeframe restricted to `allowed`
pub fn timeframe(
    raw: Option<&str>,
    allowed: &[Timeframe],
    default: Timeframe,
) -> Result<Timeframe, ApiError> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(default);
    };

    match Timeframe::parse(raw) {
        Some(tf) if allowed.contains(&tf) => Ok(tf),
        _ => {
            let allowed: Vec<&str> = allowed.iter().map(|tf| tf.as_str()).collect();
            Err(ApiError::invalid_param(
                "timeframe",
                format!("must be one of: {}", allowed.join(", ")),
            ))
        }
    }
}

pub fn granularity(raw: Option<&str>) -> Result<Granularity, ApiError> {
    match raw.filter(|s| !s.trim().is_empty()) {
        None => Ok(Granularity::Daily),
        Some(raw) => Granularity::parse(raw).ok_or_else(|| {
            ApiError::invalid_param("granularity", "must be one of: hourly, daily, weekly, monthly")
        }),
    }
}

/// Parse `limit` within `[1, 100]`
pub fn limit(raw: Option<&str>, default: usize) -> Result<usize, ApiError> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        return Ok(default);
    };

    let parsed: i64 = raw
        .trim()
        .parse()
        .map_err(|_| ApiError::invalid_param("limit", "must be an integer"))?;
    validation::validate_limit(parsed, 1, MAX_LIMIT)
        .map_err(|e| ApiError::invalid_param("limit", e.to_string()))
}

pub fn float(raw: Option<&str>, field: &str, default: f64) -> Result<f64, ApiError> {
    match raw.filter(|s| !s.trim().is_empty()) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| ApiError::invalid_param(field, "must be a number")),
    }
}

pub fn boolean(raw: Option<&str>, field: &str) -> Result<bool, ApiError> {
    match raw.map(|s| s.trim().to_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(_) => Err(ApiError::invalid_param(field, "must be true or false")),
    }
}

/// Comma-separated filter list (also used for a single-valued filter)
pub fn filter_list(raw: Option<&str>, field: &str) -> Result<Vec<String>, ApiError> {
    match raw {
        None => Ok(Vec::new()),
        Some(raw) => validation::parse_filter_list(raw, field)
            .map_err(|e| ApiError::invalid_param(field, e.to_string())),
    }
}

pub fn component_id(raw: &str) -> Result<String, ApiError> {
    validation::validate_component_id(raw)
        .map_err(|e| ApiError::invalid_param("component_id", e.to_string()))
}

/// Optional caller identity from the `x-user-id` header
pub fn caller(headers: &HeaderMap) -> Result<Option<String>, ApiError> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };

    let user_id = value
        .to_str()
        .map_err(|_| ApiError::invalid_param(USER_ID_HEADER, "must be valid ASCII"))?
        .trim();
    if user_id.is_empty() {
        return Ok(None);
    }

    validation::validate_identifier(user_id, "user_id")
        .map_err(|e| ApiError::invalid_param(USER_ID_HEADER, e.to_string()))?;
    Ok(Some(user_id.to_string()))
}

/// Caller identity, required
pub fn require_caller(headers: &HeaderMap) -> Result<String, ApiError> {
    caller(headers)?.ok_or_else(|| ApiError::Unauthorized("Authentication required".to_string()))
}
