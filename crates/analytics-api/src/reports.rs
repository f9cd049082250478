//! Read-side analytics endpoints: popular, trending, usage and the overview.
//!
//! Every response is recomputed from committed `component_usage_stats` rows
//! and component records on each request. Listings only ever include
//! components visible to the caller (public, or authored by the `x-user-id`
//! caller).

use crate::error::{ApiError, ApiResponse, ApiResult};
use crate::tracking::PeriodInfo;
use crate::{params, AppState};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use stackpulse_analytics_core::{
    calculate_insights, group_stats, percent_change, popularity_score, rank_trending,
    trending_score, AggregatedPeriod, Component, DateRange, Granularity, Period, PopularSort,
    PopularityBreakdown, Timeframe, TrendingInput, TrendingMetrics, UsageInsights, UsageStat,
};
use stackpulse_analytics_storage::{
    action_breakdown, fetch_filtered_usage_stats, fetch_period_totals, get_component,
    list_components, AnalyticsBackend, ComponentFilter, PeriodTotals,
};
use std::collections::BTreeMap;
use tracing::debug;

const ALL_TIMEFRAMES: &[Timeframe] = &[
    Timeframe::Day,
    Timeframe::Week,
    Timeframe::Month,
    Timeframe::Quarter,
    Timeframe::Year,
];

const TRENDING_TIMEFRAMES: &[Timeframe] = &[Timeframe::Day, Timeframe::Week, Timeframe::Month];

const OVERVIEW_LIMIT: usize = 10;

// ============================================================================
// Shared computations
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PopularComponent {
    #[serde(flatten)]
    pub component: Component,
    pub popularity_score: i64,
    pub score_breakdown: PopularityBreakdown,
    /// Usage inside the requested timeframe
    pub period_usage: PeriodTotals,
}

#[derive(Debug, Serialize)]
pub struct TrendingComponent {
    #[serde(flatten)]
    pub component: Component,
    pub trending_metrics: TrendingMetrics,
}

/// Score, sort and truncate the components matching `filter`.
///
/// Returns the ranked page and the number of components that matched.
fn rank_popular(
    conn: &Connection,
    filter: &ComponentFilter,
    period: &Period,
    sort: PopularSort,
    limit: usize,
    now: DateTime<Utc>,
) -> Result<(Vec<PopularComponent>, usize), ApiError> {
    let components = list_components(conn, filter)?;
    let matched = components.len();

    let mut scored: Vec<(Component, PopularityBreakdown)> = components
        .into_iter()
        .map(|c| {
            let breakdown = popularity_score(&c, now);
            (c, breakdown)
        })
        .collect();
    sort.sort(&mut scored);
    scored.truncate(limit);

    let ids: Vec<String> = scored.iter().map(|(c, _)| c.id.clone()).collect();
    let mut usage = fetch_period_totals(
        conn,
        &period.range(),
        &filter.clone().with_component_ids(ids),
    )?;

    let ranked = scored
        .into_iter()
        .map(|(component, breakdown)| {
            let period_usage = usage.remove(&component.id).unwrap_or_else(|| PeriodTotals {
                component_id: component.id.clone(),
                ..PeriodTotals::default()
            });
            PopularComponent {
                popularity_score: breakdown.popularity_score,
                score_breakdown: breakdown,
                period_usage,
                component,
            }
        })
        .collect();

    Ok((ranked, matched))
}

/// Trending candidates are the components with usage in the current period.
///
/// Returns the ranked page and the candidate count.
fn rank_trending_components(
    conn: &Connection,
    filter: &ComponentFilter,
    period: &Period,
    min_growth: f64,
    limit: usize,
) -> Result<(Vec<TrendingComponent>, usize), ApiError> {
    let current = fetch_period_totals(conn, &period.range(), filter)?;
    let previous = fetch_period_totals(conn, &period.previous(), filter)?;

    let candidates: Vec<(Component, TrendingMetrics)> = list_components(conn, filter)?
        .into_iter()
        .filter_map(|component| {
            let now = current.get(&component.id).filter(|t| t.total_uses > 0)?;
            let before = previous.get(&component.id);
            let metrics = trending_score(&TrendingInput {
                current_usage: now.total_uses,
                previous_usage: before.map(|t| t.total_uses).unwrap_or(0),
                current_unique_users: now.unique_users,
                previous_unique_users: before.map(|t| t.unique_users).unwrap_or(0),
                lifetime_usage_count: component.usage_count,
                period_days: period.days,
            });
            Some((component, metrics))
        })
        .collect();
    let candidate_count = candidates.len();

    let ranked = rank_trending(candidates, min_growth, limit)
        .into_iter()
        .map(|(component, trending_metrics)| TrendingComponent {
            component,
            trending_metrics,
        })
        .collect();

    Ok((ranked, candidate_count))
}

/// Collapse multi-component rows into one series row per date
fn daily_series(rows: &[UsageStat]) -> Vec<UsageStat> {
    let mut by_date: BTreeMap<NaiveDate, UsageStat> = BTreeMap::new();
    for row in rows {
        let day = by_date
            .entry(row.date)
            .or_insert_with(|| UsageStat::new("all", row.date));
        day.total_uses += row.total_uses;
        day.unique_users += row.unique_users;
        day.successful_imports += row.successful_imports;
        day.failed_imports += row.failed_imports;
    }
    by_date.into_values().collect()
}

fn sum_totals<'a>(totals: impl Iterator<Item = &'a PeriodTotals>) -> PeriodTotals {
    totals.fold(PeriodTotals::default(), |mut acc, t| {
        acc.total_uses += t.total_uses;
        acc.unique_users += t.unique_users;
        acc.successful_imports += t.successful_imports;
        acc.failed_imports += t.failed_imports;
        acc
    })
}

fn visible_filter(viewer: Option<String>) -> ComponentFilter {
    ComponentFilter::new().with_viewer(viewer)
}

// ============================================================================
// GET /analytics/popular
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PopularParams {
    pub timeframe: Option<String>,
    pub category: Option<String>,
    pub framework: Option<String>,
    pub limit: Option<String>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PopularSummary {
    pub timeframe: Timeframe,
    pub sort_by: PopularSort,
    pub total_components: usize,
    pub returned: usize,
    pub total_usage: i64,
    pub average_popularity_score: f64,
}

#[derive(Debug, Serialize)]
pub struct PopularResponse {
    pub components: Vec<PopularComponent>,
    pub summary: PopularSummary,
}

pub async fn popular(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PopularParams>,
) -> ApiResult<PopularResponse> {
    let timeframe = params::timeframe(query.timeframe.as_deref(), ALL_TIMEFRAMES, Timeframe::Month)?;
    let limit = params::limit(query.limit.as_deref(), params::DEFAULT_LIMIT)?;
    let sort_by = match query.sort_by.as_deref() {
        None => PopularSort::default(),
        Some(raw) => PopularSort::parse(raw).ok_or_else(|| {
            ApiError::invalid_param("sort_by", "must be one of: popularity, usage, rating, recent")
        })?,
    };
    let filter = visible_filter(params::caller(&headers)?)
        .with_categories(params::filter_list(query.category.as_deref(), "category")?)
        .with_frameworks(params::filter_list(query.framework.as_deref(), "framework")?);

    let now = Utc::now();
    let period = Period::from_timeframe(timeframe, now);
    let conn = state.backend.get_connection()?;
    let (components, matched) = rank_popular(&conn, &filter, &period, sort_by, limit, now)?;

    let total_usage = components.iter().map(|c| c.component.usage_count).sum();
    let average_popularity_score = if components.is_empty() {
        0.0
    } else {
        components.iter().map(|c| c.popularity_score as f64).sum::<f64>() / components.len() as f64
    };

    debug!(matched, returned = components.len(), "Popular components");

    Ok(ApiResponse::ok(PopularResponse {
        summary: PopularSummary {
            timeframe,
            sort_by,
            total_components: matched,
            returned: components.len(),
            total_usage,
            average_popularity_score,
        },
        components,
    }))
}

// ============================================================================
// GET /analytics/trending
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct TrendingParams {
    pub timeframe: Option<String>,
    pub category: Option<String>,
    pub framework: Option<String>,
    pub limit: Option<String>,
    pub min_growth: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrendingSummary {
    pub timeframe: Timeframe,
    pub period: PeriodInfo,
    pub min_growth: f64,
    /// Components with usage in the period
    pub candidates: usize,
    pub returned: usize,
    pub average_trending_score: f64,
}

#[derive(Debug, Serialize)]
pub struct TrendingResponse {
    pub components: Vec<TrendingComponent>,
    pub summary: TrendingSummary,
}

pub async fn trending(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<TrendingParams>,
) -> ApiResult<TrendingResponse> {
    let timeframe =
        params::timeframe(query.timeframe.as_deref(), TRENDING_TIMEFRAMES, Timeframe::Week)?;
    let limit = params::limit(query.limit.as_deref(), params::DEFAULT_LIMIT)?;
    let min_growth = params::float(query.min_growth.as_deref(), "min_growth", 0.0)?;
    let filter = visible_filter(params::caller(&headers)?)
        .with_categories(params::filter_list(query.category.as_deref(), "category")?)
        .with_frameworks(params::filter_list(query.framework.as_deref(), "framework")?);

    let period = Period::from_timeframe(timeframe, Utc::now());
    let conn = state.backend.get_connection()?;
    let (components, candidates) =
        rank_trending_components(&conn, &filter, &period, min_growth, limit)?;

    let average_trending_score = if components.is_empty() {
        0.0
    } else {
        components
            .iter()
            .map(|c| c.trending_metrics.trending_score)
            .sum::<f64>()
            / components.len() as f64
    };

    debug!(candidates, returned = components.len(), "Trending components");

    Ok(ApiResponse::ok(TrendingResponse {
        summary: TrendingSummary {
            timeframe,
            period: PeriodInfo::from(&period),
            min_growth,
            candidates,
            returned: components.len(),
            average_trending_score,
        },
        components,
    }))
}

// ============================================================================
// GET /analytics/usage
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct UsageParams {
    pub component_id: Option<String>,
    pub timeframe: Option<String>,
    pub granularity: Option<String>,
    pub include_details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UsageComparison {
    pub current_period: DateRange,
    pub previous_period: DateRange,
    pub current_total_uses: i64,
    pub previous_total_uses: i64,
    pub usage_change: f64,
    pub current_unique_users: i64,
    pub previous_unique_users: i64,
    pub user_change: f64,
}

#[derive(Debug, Serialize)]
pub struct ImportBreakdown {
    pub successful: i64,
    pub failed: i64,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct UsageBreakdowns {
    /// Logged events per action
    pub actions: BTreeMap<String, i64>,
    pub imports: ImportBreakdown,
    /// Period uses per component, only when no component was requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<String, i64>>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component_id: Option<String>,
    pub timeframe: Timeframe,
    pub granularity: Granularity,
    pub period: PeriodInfo,
    pub usage_data: Vec<AggregatedPeriod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<UsageInsights>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<UsageComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdowns: Option<UsageBreakdowns>,
    /// The row cap cut the underlying fetch short
    pub truncated: bool,
}

pub async fn usage(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<UsageParams>,
) -> ApiResult<UsageResponse> {
    let timeframe = params::timeframe(query.timeframe.as_deref(), ALL_TIMEFRAMES, Timeframe::Month)?;
    let granularity = params::granularity(query.granularity.as_deref())?;
    let include_details = params::boolean(query.include_details.as_deref(), "include_details")?;
    let component_id = query
        .component_id
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(params::component_id)
        .transpose()?;
    let caller = params::caller(&headers)?;

    let conn = state.backend.get_connection()?;
    let filter = match &component_id {
        Some(id) => {
            let component = get_component(&conn, id)?
                .ok_or_else(|| ApiError::NotFound(format!("Component '{}' not found", id)))?;
            if !component.is_visible_to(caller.as_deref()) {
                return Err(ApiError::Forbidden(format!(
                    "Access denied to component '{}'",
                    id
                )));
            }
            ComponentFilter::new()
                .with_component_ids(vec![id.clone()])
                .including_private()
        }
        None => visible_filter(caller),
    };

    let period = Period::from_timeframe(timeframe, Utc::now());
    let range = period.range();
    let fetch = fetch_filtered_usage_stats(&conn, &filter, &range, state.stat_fetch_limit)?;
    let usage_data = group_stats(&fetch.rows, granularity);

    let (insights, comparison, breakdowns) = if include_details {
        let series = match component_id {
            Some(_) => fetch.rows.clone(),
            None => daily_series(&fetch.rows),
        };
        let insights = calculate_insights(&series);

        let current_by_component = fetch_period_totals(&conn, &range, &filter)?;
        let current = sum_totals(current_by_component.values());
        let previous_range = period.previous();
        let previous = sum_totals(fetch_period_totals(&conn, &previous_range, &filter)?.values());
        let comparison = UsageComparison {
            current_period: range,
            previous_period: previous_range,
            current_total_uses: current.total_uses,
            previous_total_uses: previous.total_uses,
            usage_change: percent_change(previous.total_uses as f64, current.total_uses as f64),
            current_unique_users: current.unique_users,
            previous_unique_users: previous.unique_users,
            user_change: percent_change(
                previous.unique_users as f64,
                current.unique_users as f64,
            ),
        };

        let import_total = current.successful_imports + current.failed_imports;
        let breakdowns = UsageBreakdowns {
            actions: action_breakdown(&conn, &filter, &range)?,
            imports: ImportBreakdown {
                successful: current.successful_imports,
                failed: current.failed_imports,
                success_rate: (import_total > 0)
                    .then(|| current.successful_imports as f64 / import_total as f64 * 100.0),
            },
            components: component_id.is_none().then(|| {
                current_by_component
                    .iter()
                    .map(|(id, t)| (id.clone(), t.total_uses))
                    .collect()
            }),
        };

        (Some(insights), Some(comparison), Some(breakdowns))
    } else {
        (None, None, None)
    };

    debug!(
        component_id = ?component_id,
        granularity = granularity.as_str(),
        buckets = usage_data.len(),
        "Usage series"
    );

    Ok(ApiResponse::ok(UsageResponse {
        component_id,
        timeframe,
        granularity,
        period: PeriodInfo::from(&period),
        usage_data,
        insights,
        comparison,
        breakdowns,
        truncated: fetch.truncated,
    }))
}

// ============================================================================
// GET /analytics
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct OverviewParams {
    pub timeframe: Option<String>,
    pub categories: Option<String>,
    pub frameworks: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OverviewTotals {
    pub timeframe: Timeframe,
    pub period: PeriodInfo,
    pub total_components: usize,
    /// Components with any usage in the period
    pub active_components: usize,
    pub total_uses: i64,
    pub unique_users: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
    pub average_daily_usage: f64,
}

#[derive(Debug, Serialize)]
pub struct OverviewUsage {
    pub usage_data: Vec<AggregatedPeriod>,
    pub truncated: bool,
}

#[derive(Debug, Serialize)]
pub struct OverviewResponse {
    pub overview: OverviewTotals,
    pub trending: Vec<TrendingComponent>,
    pub popular: Vec<PopularComponent>,
    pub usage: OverviewUsage,
}

pub async fn overview(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OverviewParams>,
) -> ApiResult<OverviewResponse> {
    let timeframe = params::timeframe(query.timeframe.as_deref(), ALL_TIMEFRAMES, Timeframe::Month)?;
    let limit = params::limit(query.limit.as_deref(), OVERVIEW_LIMIT)?;
    let filter = visible_filter(params::caller(&headers)?)
        .with_categories(params::filter_list(query.categories.as_deref(), "categories")?)
        .with_frameworks(params::filter_list(query.frameworks.as_deref(), "frameworks")?);

    let now = Utc::now();
    let period = Period::from_timeframe(timeframe, now);
    let conn = state.backend.get_connection()?;

    let per_component = fetch_period_totals(&conn, &period.range(), &filter)?;
    let totals = sum_totals(per_component.values());
    let active_components = per_component.values().filter(|t| t.total_uses > 0).count();

    let (popular, total_components) =
        rank_popular(&conn, &filter, &period, PopularSort::Popularity, limit, now)?;
    let (trending, _) = rank_trending_components(&conn, &filter, &period, 0.0, limit)?;

    let fetch = fetch_filtered_usage_stats(&conn, &filter, &period.range(), state.stat_fetch_limit)?;
    let usage_data = group_stats(&fetch.rows, Granularity::Daily);

    debug!(
        total_components,
        active_components,
        total_uses = totals.total_uses,
        "Analytics overview"
    );

    Ok(ApiResponse::ok(OverviewResponse {
        overview: OverviewTotals {
            timeframe,
            period: PeriodInfo::from(&period),
            total_components,
            active_components,
            total_uses: totals.total_uses,
            unique_users: totals.unique_users,
            successful_imports: totals.successful_imports,
            failed_imports: totals.failed_imports,
            average_daily_usage: totals.total_uses as f64 / period.days as f64,
        },
        trending,
        popular,
        usage: OverviewUsage {
            usage_data,
            truncated: fetch.truncated,
        },
    }))
}
