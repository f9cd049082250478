//! Input validation for Stackpulse analytics
//!
//! Provides validation functions for request inputs:
//! - Component ids (must be UUIDs)
//! - User and session identifiers
//! - Category/framework filters
//! - Result limits and bulk id lists
//! - Tracking metadata size

use crate::{AnalyticsError, Result};

/// Maximum length for user and session identifiers
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Maximum length for category/framework filter values
pub const MAX_FILTER_LEN: usize = 64;

/// Maximum number of values in a comma-separated filter list
pub const MAX_FILTER_VALUES: usize = 20;

/// Maximum serialized size of tracking metadata in bytes
pub const MAX_METADATA_BYTES: usize = 4096;

/// Maximum number of components in a bulk export
pub const MAX_BULK_COMPONENTS: usize = 50;

/// Validate a component id
///
/// Requirements:
/// - A hyphenated UUID
///
/// Returns the normalized (lowercase) id.
pub fn validate_component_id(id: &str) -> Result<String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(AnalyticsError::ValidationError(
            "component_id cannot be empty".to_string(),
        ));
    }

    uuid::Uuid::parse_str(trimmed)
        .map(|uuid| uuid.hyphenated().to_string())
        .map_err(|_| {
            AnalyticsError::ValidationError(format!(
                "component_id must be a valid UUID, got '{}'",
                trimmed
            ))
        })
}

/// Validate a user or session identifier
///
/// Requirements:
/// - Not empty
/// - <= 128 characters
/// - Alphanumeric, underscore, hyphen, dot, at-sign, colon only
pub fn validate_identifier(identifier: &str, field_name: &str) -> Result<()> {
    if identifier.is_empty() {
        return Err(AnalyticsError::ValidationError(format!(
            "{} cannot be empty",
            field_name
        )));
    }

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(AnalyticsError::ValidationError(format!(
            "{} too long: {} > {} characters",
            field_name,
            identifier.len(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if !identifier
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '@' | ':'))
    {
        return Err(AnalyticsError::ValidationError(format!(
            "{} contains invalid characters (allowed: alphanumeric, _, -, ., @, :)",
            field_name
        )));
    }

    Ok(())
}

/// Validate a single category/framework filter value
pub fn validate_filter(value: &str, field_name: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_FILTER_LEN {
        return Err(AnalyticsError::ValidationError(format!(
            "{} must be 1-{} characters",
            field_name, MAX_FILTER_LEN
        )));
    }

    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
    {
        return Err(AnalyticsError::ValidationError(format!(
            "{} contains invalid characters",
            field_name
        )));
    }

    Ok(())
}

/// Split and validate a comma-separated filter list.
///
/// Empty segments are ignored; an empty input yields an empty list.
pub fn parse_filter_list(raw: &str, field_name: &str) -> Result<Vec<String>> {
    let values: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    if values.len() > MAX_FILTER_VALUES {
        return Err(AnalyticsError::ValidationError(format!(
            "{} accepts at most {} values, got {}",
            field_name,
            MAX_FILTER_VALUES,
            values.len()
        )));
    }

    for value in &values {
        validate_filter(value, field_name)?;
    }

    Ok(values)
}

/// Validate a result limit against an inclusive range
pub fn validate_limit(limit: i64, min: i64, max: i64) -> Result<usize> {
    if !(min..=max).contains(&limit) {
        return Err(AnalyticsError::ValidationError(format!(
            "limit must be between {} and {}, got {}",
            min, max, limit
        )));
    }
    Ok(limit as usize)
}

/// Validate tracking metadata
///
/// Requirements:
/// - A JSON object
/// - Serialized size <= 4 KiB
pub fn validate_metadata(metadata: &serde_json::Value) -> Result<()> {
    if !metadata.is_object() {
        return Err(AnalyticsError::ValidationError(
            "metadata must be a JSON object".to_string(),
        ));
    }

    let size = serde_json::to_vec(metadata)
        .map_err(|e| AnalyticsError::SerializationError(e.to_string()))?
        .len();
    if size > MAX_METADATA_BYTES {
        return Err(AnalyticsError::ValidationError(format!(
            "metadata too large: {} > {} bytes",
            size, MAX_METADATA_BYTES
        )));
    }

    Ok(())
}

/// Validate the component id list of a bulk export.
///
/// Returns normalized ids with duplicates removed, in first-seen order.
pub fn validate_component_ids(ids: &[String]) -> Result<Vec<String>> {
    if ids.is_empty() {
        return Err(AnalyticsError::ValidationError(
            "component_ids cannot be empty".to_string(),
        ));
    }

    if ids.len() > MAX_BULK_COMPONENTS {
        return Err(AnalyticsError::ValidationError(format!(
            "component_ids accepts at most {} ids, got {}",
            MAX_BULK_COMPONENTS,
            ids.len()
        )));
    }

    let mut normalized: Vec<String> = Vec::with_capacity(ids.len());
    for id in ids {
        let id = validate_component_id(id)?;
        if !normalized.contains(&id) {
            normalized.push(id);
        }
    }
    Ok(normalized)
}
