//! Daily usage stats: the stat fetcher and the per-action counter writes.

use crate::components::ComponentFilter;
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use stackpulse_analytics_core::{
    trending_score, AnalyticsError, DateRange, Period, Timeframe, TrendingInput, TrendingMetrics,
    UsageStat,
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Result of a capped stat fetch
#[derive(Debug, Clone, Default)]
pub struct StatFetch {
    pub rows: Vec<UsageStat>,
    /// The row cap cut the result short
    pub truncated: bool,
}

/// Per-component sums over a date range
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeriodTotals {
    pub component_id: String,
    pub total_uses: i64,
    pub unique_users: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
}

/// How a tracked action affects the import counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// Not an import
    None,
    Succeeded,
    Failed,
}

fn row_to_stat(row: &Row<'_>) -> rusqlite::Result<UsageStat> {
    let user_ids: Option<String> = row.get(8)?;
    Ok(UsageStat {
        component_id: row.get(0)?,
        date: row.get(1)?,
        total_uses: row.get(2)?,
        unique_users: row.get(3)?,
        successful_imports: row.get(4)?,
        failed_imports: row.get(5)?,
        avg_rating: row.get(6)?,
        trending_score: row.get(7)?,
        user_ids: user_ids
            .map(|ids| ids.split(',').map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

/// Fetch daily rows for one component, or for all public components when
/// `component_id` is `None`.
///
/// Rows with `date` in `[range.start, range.end]` are returned ordered by
/// date ascending. At most `limit` rows are returned.
pub fn fetch_usage_stats(
    conn: &Connection,
    component_id: Option<&str>,
    range: &DateRange,
    limit: usize,
) -> Result<StatFetch> {
    let filter = match component_id {
        Some(id) => ComponentFilter::new()
            .with_component_ids(vec![id.to_string()])
            .including_private(),
        None => ComponentFilter::new(),
    };
    fetch_filtered_usage_stats(conn, &filter, range, limit)
}

/// Fetch daily rows for every component matching `filter`
pub fn fetch_filtered_usage_stats(
    conn: &Connection,
    filter: &ComponentFilter,
    range: &DateRange,
    limit: usize,
) -> Result<StatFetch> {
    let (mut clauses, filter_values) = filter.to_sql();
    clauses.insert(0, "s.date >= ? AND s.date <= ?".to_string());

    let mut values = vec![range.start.to_string(), range.end.to_string()];
    values.extend(filter_values);

    // One extra row tells us whether the cap truncated the result
    let sql = format!(
        r#"
        SELECT s.component_id, s.date, s.total_uses, s.unique_users, s.successful_imports,
               s.failed_imports, s.avg_rating, s.trending_score,
               (SELECT GROUP_CONCAT(u.user_id, ',')
                  FROM component_usage_users u
                 WHERE u.component_id = s.component_id AND u.date = s.date) AS user_ids
        FROM component_usage_stats s
        JOIN components c ON c.id = s.component_id
        WHERE {}
        ORDER BY s.date ASC, s.component_id ASC
        LIMIT {}
        "#,
        clauses.join(" AND "),
        limit.saturating_add(1)
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query_map(params_from_iter(values.iter()), row_to_stat)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let truncated = rows.len() > limit;
    if truncated {
        rows.truncate(limit);
        warn!(
            limit,
            start = %range.start,
            end = %range.end,
            "Usage stat fetch hit the row cap; result truncated"
        );
    }

    debug!(rows = rows.len(), start = %range.start, end = %range.end, "Fetched usage stats");
    Ok(StatFetch { rows, truncated })
}

/// Sum usage per component over a range
pub fn fetch_period_totals(
    conn: &Connection,
    range: &DateRange,
    filter: &ComponentFilter,
) -> Result<HashMap<String, PeriodTotals>> {
    let (mut clauses, filter_values) = filter.to_sql();
    clauses.insert(0, "s.date >= ? AND s.date <= ?".to_string());

    let mut values = vec![range.start.to_string(), range.end.to_string()];
    values.extend(filter_values);

    let sql = format!(
        r#"
        SELECT s.component_id,
               SUM(s.total_uses), SUM(s.unique_users),
               SUM(s.successful_imports), SUM(s.failed_imports)
        FROM component_usage_stats s
        JOIN components c ON c.id = s.component_id
        WHERE {}
        GROUP BY s.component_id
        "#,
        clauses.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let totals = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            Ok(PeriodTotals {
                component_id: row.get(0)?,
                total_uses: row.get(1)?,
                unique_users: row.get(2)?,
                successful_imports: row.get(3)?,
                failed_imports: row.get(4)?,
            })
        })?
        .map(|totals| totals.map(|t| (t.component_id.clone(), t)))
        .collect::<std::result::Result<HashMap<_, _>, _>>()?;

    Ok(totals)
}

fn load_stat(conn: &Connection, component_id: &str, date: NaiveDate) -> Result<UsageStat> {
    conn.query_row(
        r#"
        SELECT s.component_id, s.date, s.total_uses, s.unique_users, s.successful_imports,
               s.failed_imports, s.avg_rating, s.trending_score,
               (SELECT GROUP_CONCAT(u.user_id, ',')
                  FROM component_usage_users u
                 WHERE u.component_id = s.component_id AND u.date = s.date)
        FROM component_usage_stats s
        WHERE s.component_id = ?1 AND s.date = ?2
        "#,
        params![component_id, date],
        row_to_stat,
    )
    .optional()?
    .ok_or_else(|| {
        AnalyticsError::Other(format!(
            "No usage row for component {} on {}",
            component_id, date
        ))
    })
}

/// Record one tracked action in the daily row for `date`.
///
/// Creates the row on first use. `total_uses` is incremented, the import
/// counters follow `import`, and an identified user is recorded once per day
/// with `unique_users` refreshed from the distinct set.
pub fn record_daily_usage(
    conn: &Connection,
    component_id: &str,
    date: NaiveDate,
    user_id: Option<&str>,
    import: ImportOutcome,
) -> Result<UsageStat> {
    let (successful, failed) = match import {
        ImportOutcome::None => (0, 0),
        ImportOutcome::Succeeded => (1, 0),
        ImportOutcome::Failed => (0, 1),
    };

    let tx = conn.unchecked_transaction()?;

    tx.execute(
        r#"
        INSERT INTO component_usage_stats (component_id, date, total_uses, successful_imports, failed_imports, updated_at)
        VALUES (?1, ?2, 1, ?3, ?4, datetime('now'))
        ON CONFLICT(component_id, date) DO UPDATE SET
            total_uses = total_uses + 1,
            successful_imports = successful_imports + excluded.successful_imports,
            failed_imports = failed_imports + excluded.failed_imports,
            updated_at = datetime('now')
        "#,
        params![component_id, date, successful, failed],
    )?;

    if let Some(user_id) = user_id {
        tx.execute(
            "INSERT OR IGNORE INTO component_usage_users (component_id, date, user_id) VALUES (?1, ?2, ?3)",
            params![component_id, date, user_id],
        )?;
        tx.execute(
            r#"
            UPDATE component_usage_stats
            SET unique_users = MAX(
                unique_users,
                (SELECT COUNT(*) FROM component_usage_users WHERE component_id = ?1 AND date = ?2)
            )
            WHERE component_id = ?1 AND date = ?2
            "#,
            params![component_id, date],
        )?;
    }

    tx.commit()?;

    load_stat(conn, component_id, date)
}

/// Recompute the trending score of a component's row for the day of `now`.
///
/// Compares the 7-day period ending at `now` with the 7 days before it.
pub fn refresh_trending_score(
    conn: &Connection,
    component_id: &str,
    now: DateTime<Utc>,
) -> Result<TrendingMetrics> {
    let period = Period::from_timeframe(Timeframe::Week, now);
    let filter = ComponentFilter::new()
        .with_component_ids(vec![component_id.to_string()])
        .including_private();

    let current = fetch_period_totals(conn, &period.range(), &filter)?
        .remove(component_id)
        .unwrap_or_default();
    let previous = fetch_period_totals(conn, &period.previous(), &filter)?
        .remove(component_id)
        .unwrap_or_default();

    let usage_count: i64 = conn
        .query_row(
            "SELECT usage_count FROM components WHERE id = ?1",
            params![component_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| AnalyticsError::ComponentNotFound(component_id.to_string()))?;

    let metrics = trending_score(&TrendingInput {
        current_usage: current.total_uses,
        previous_usage: previous.total_uses,
        current_unique_users: current.unique_users,
        previous_unique_users: previous.unique_users,
        lifetime_usage_count: usage_count,
        period_days: period.days,
    });

    conn.execute(
        "UPDATE component_usage_stats SET trending_score = ?1 WHERE component_id = ?2 AND date = ?3",
        params![metrics.trending_score, component_id, period.end_date],
    )?;

    Ok(metrics)
}
