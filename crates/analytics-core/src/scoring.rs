//! Ranking scores
//!
//! - **Trending score**: weighted combination of period-over-period growth,
//!   usage velocity and momentum (current usage relative to lifetime usage)
//! - **Popularity score**: weighted combination of lifetime usage, rating,
//!   recency and quality bonuses
//!
//! Both are recomputed on every read; neither is cached.

use crate::insights::percent_change;
use crate::Component;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;

/// Weight for growth in the trending score
const WEIGHT_GROWTH: f64 = 0.4;

/// Weight for velocity in the trending score
const WEIGHT_VELOCITY: f64 = 0.3;

/// Weight for momentum in the trending score
const WEIGHT_MOMENTUM: f64 = 0.3;

/// Trending score above which a component is rising
const RISING_THRESHOLD: f64 = 50.0;

/// Trending score above which a component is stable
const STABLE_THRESHOLD: f64 = 20.0;

// Popularity weights
const WEIGHT_USAGE: f64 = 0.4;
const WEIGHT_RATING: f64 = 0.3;
const WEIGHT_RECENCY: f64 = 0.2;
const WEIGHT_QUALITY: f64 = 0.1;
const FEATURED_BONUS: f64 = 10.0;

/// Ratings are on a 0-5 scale, rescaled to 0-100 before weighting
const RATING_SCALE: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Stable,
    Declining,
}

impl TrendDirection {
    pub fn from_score(score: f64) -> Self {
        if score > RISING_THRESHOLD {
            TrendDirection::Rising
        } else if score > STABLE_THRESHOLD {
            TrendDirection::Stable
        } else {
            TrendDirection::Declining
        }
    }
}

/// Period aggregates for one component
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrendingInput {
    pub current_usage: i64,
    pub previous_usage: i64,
    pub current_unique_users: i64,
    pub previous_unique_users: i64,
    /// Lifetime `usage_count` of the component
    pub lifetime_usage_count: i64,
    pub period_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TrendingMetrics {
    pub current_usage: i64,
    pub previous_usage: i64,
    pub current_unique_users: i64,
    pub previous_unique_users: i64,
    pub usage_growth: f64,
    pub user_growth: f64,
    pub usage_velocity: f64,
    pub user_velocity: f64,
    pub growth_score: f64,
    pub velocity_score: f64,
    pub momentum_score: f64,
    pub trending_score: f64,
    pub trend_direction: TrendDirection,
}

/// Compute the trending metrics for one component
pub fn trending_score(input: &TrendingInput) -> TrendingMetrics {
    let days = input.period_days.max(1) as f64;
    let current_usage = input.current_usage as f64;
    let current_users = input.current_unique_users as f64;

    let usage_growth = percent_change(input.previous_usage as f64, current_usage);
    let user_growth = percent_change(input.previous_unique_users as f64, current_users);

    let usage_velocity = current_usage / days;
    let user_velocity = current_users / days;

    let growth_score = ((usage_growth + user_growth) / 2.0).max(0.0);
    // Geometric mean so neither velocity dominates
    let velocity_score = (usage_velocity * user_velocity).sqrt();
    let momentum_score = current_usage / (input.lifetime_usage_count.max(1) as f64) * 100.0;

    let score = growth_score * WEIGHT_GROWTH
        + velocity_score * WEIGHT_VELOCITY
        + momentum_score * WEIGHT_MOMENTUM;

    TrendingMetrics {
        current_usage: input.current_usage,
        previous_usage: input.previous_usage,
        current_unique_users: input.current_unique_users,
        previous_unique_users: input.previous_unique_users,
        usage_growth,
        user_growth,
        usage_velocity,
        user_velocity,
        growth_score,
        velocity_score,
        momentum_score,
        trending_score: score,
        trend_direction: TrendDirection::from_score(score),
    }
}

/// Keep entries with `usage_growth >= min_growth`, sort by score descending,
/// truncate to `limit`
pub fn rank_trending<T>(
    mut entries: Vec<(T, TrendingMetrics)>,
    min_growth: f64,
    limit: usize,
) -> Vec<(T, TrendingMetrics)> {
    entries.retain(|(_, metrics)| metrics.usage_growth >= min_growth);
    entries.sort_by(|(_, a), (_, b)| {
        b.trending_score
            .partial_cmp(&a.trending_score)
            .unwrap_or(Ordering::Equal)
    });
    entries.truncate(limit);
    entries
}

/// Component of the popularity score, kept for display
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PopularityBreakdown {
    pub usage_score: f64,
    pub rating_score: f64,
    pub recency_score: f64,
    pub featured_bonus: f64,
    pub quality_bonus: f64,
    pub popularity_score: i64,
}

/// Compute the popularity score of a component as of `now`
pub fn popularity_score(component: &Component, now: DateTime<Utc>) -> PopularityBreakdown {
    let days_since_update = ((now - component.updated_at).num_seconds() as f64 / 86_400.0).max(0.0);

    let usage_score = component.usage_count as f64 * WEIGHT_USAGE;
    let rating_score = component.rating.unwrap_or(0.0) * RATING_SCALE * WEIGHT_RATING;
    let recency_score = (100.0 - days_since_update / 30.0).max(0.0) * WEIGHT_RECENCY;
    let featured_bonus = if component.is_featured {
        FEATURED_BONUS
    } else {
        0.0
    };
    let quality_bonus =
        (component.performance_score + component.accessibility_score) / 20.0 * WEIGHT_QUALITY;

    let total = usage_score + rating_score + recency_score + featured_bonus + quality_bonus;

    PopularityBreakdown {
        usage_score,
        rating_score,
        recency_score,
        featured_bonus,
        quality_bonus,
        popularity_score: total.round() as i64,
    }
}

/// Sort key for the popular listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PopularSort {
    /// Composite popularity score
    #[default]
    Popularity,
    /// Lifetime usage count
    Usage,
    Rating,
    /// Newest first
    Recent,
}

impl PopularSort {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "" | "popularity" | "popular" => Some(PopularSort::Popularity),
            "usage" | "usage_count" => Some(PopularSort::Usage),
            "rating" => Some(PopularSort::Rating),
            "recent" | "newest" | "created_at" => Some(PopularSort::Recent),
            _ => None,
        }
    }

    /// Sort scored components in place.
    ///
    /// Only [`PopularSort::Popularity`] orders by the composite score;
    /// explicit keys bypass it.
    pub fn sort(&self, entries: &mut [(Component, PopularityBreakdown)]) {
        match self {
            PopularSort::Popularity => entries.sort_by(|(a, sa), (b, sb)| {
                sb.popularity_score
                    .cmp(&sa.popularity_score)
                    .then_with(|| b.usage_count.cmp(&a.usage_count))
                    .then_with(|| a.id.cmp(&b.id))
            }),
            PopularSort::Usage => entries.sort_by(|(a, _), (b, _)| {
                b.usage_count
                    .cmp(&a.usage_count)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            PopularSort::Rating => entries.sort_by(|(a, _), (b, _)| {
                let ra = a.rating.unwrap_or(f64::NEG_INFINITY);
                let rb = b.rating.unwrap_or(f64::NEG_INFINITY);
                rb.partial_cmp(&ra)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.id.cmp(&b.id))
            }),
            PopularSort::Recent => entries.sort_by(|(a, _), (b, _)| {
                b.created_at
                    .cmp(&a.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }
    }
}
