//! Tracking event log writes and reads.

use crate::{ComponentFilter, Result};
use rusqlite::{params, params_from_iter, Connection};
use stackpulse_analytics_core::{AnalyticsError, DateRange, TrackingEvent};
use std::collections::BTreeMap;

/// Insert a batch of events in a single transaction.
///
/// Returns the number of rows written.
pub fn insert_events(conn: &Connection, events: &[TrackingEvent]) -> Result<usize> {
    if events.is_empty() {
        return Ok(0);
    }

    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare_cached(
            r#"
            INSERT INTO component_usage_events (id, component_id, user_id, session_id, action, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )?;

        for event in events {
            let metadata = event
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| AnalyticsError::SerializationError(e.to_string()))?;

            stmt.execute(params![
                event.id,
                event.component_id,
                event.user_id,
                event.session_id,
                event.action.as_str(),
                metadata,
                event.created_at,
            ])?;
        }
    }
    tx.commit()?;

    Ok(events.len())
}

/// Count logged events by action over a date range.
///
/// Only events of components matching `filter` are counted, so visibility
/// follows the same rules as the stat fetches.
pub fn action_breakdown(
    conn: &Connection,
    filter: &ComponentFilter,
    range: &DateRange,
) -> Result<BTreeMap<String, i64>> {
    let (mut clauses, filter_values) = filter.to_sql();
    clauses.insert(0, "substr(e.created_at, 1, 10) BETWEEN ? AND ?".to_string());

    let mut values = vec![range.start.to_string(), range.end.to_string()];
    values.extend(filter_values);

    let sql = format!(
        r#"
        SELECT e.action, COUNT(*)
        FROM component_usage_events e
        JOIN components c ON c.id = e.component_id
        WHERE {}
        GROUP BY e.action
        ORDER BY e.action
        "#,
        clauses.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let breakdown = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?
        .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;

    Ok(breakdown)
}
