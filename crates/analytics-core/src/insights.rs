//! Usage insights for a single component
//!
//! Derives trend direction, growth rate, peak day and a consistency score
//! from a raw per-day series ordered by date ascending.

use crate::UsageStat;
use chrono::NaiveDate;
use serde::Serialize;

/// Growth rate above which a series counts as growing (percent)
const GROWING_THRESHOLD: f64 = 5.0;

/// Growth rate below which a series counts as declining (percent)
const DECLINING_THRESHOLD: f64 = -5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Growing,
    Declining,
    Stable,
    NoData,
}

impl Trend {
    pub fn from_growth_rate(growth_rate: f64) -> Self {
        if growth_rate > GROWING_THRESHOLD {
            Trend::Growing
        } else if growth_rate < DECLINING_THRESHOLD {
            Trend::Declining
        } else {
            Trend::Stable
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageInsights {
    pub trend: Trend,
    pub growth_rate: f64,
    pub peak_usage_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peak_usage: Option<i64>,
    pub average_daily_usage: f64,
    pub consistency_score: f64,
}

impl UsageInsights {
    /// Returned when there are no rows in range
    pub fn no_data() -> Self {
        Self {
            trend: Trend::NoData,
            growth_rate: 0.0,
            peak_usage_date: None,
            peak_usage: None,
            average_daily_usage: 0.0,
            consistency_score: 0.0,
        }
    }
}

/// Percentage change from `previous` to `current`.
///
/// `previous == 0` yields 100 when `current` grew and 0 otherwise.
pub fn percent_change(previous: f64, current: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else if current > 0.0 {
        100.0
    } else {
        0.0
    }
}

/// Compute insights over rows sorted ascending by date
pub fn calculate_insights(stats: &[UsageStat]) -> UsageInsights {
    if stats.is_empty() {
        return UsageInsights::no_data();
    }

    let uses: Vec<f64> = stats.iter().map(|s| s.total_uses as f64).collect();
    let n = uses.len() as f64;
    let total: f64 = uses.iter().sum();
    let mean = total / n;

    let midpoint = uses.len() / 2;
    let first_half: f64 = uses[..midpoint].iter().sum();
    let second_half: f64 = uses[midpoint..].iter().sum();
    let growth_rate = percent_change(first_half, second_half);

    // max_by keeps the last maximum, so scan manually for the first one
    let mut peak = &stats[0];
    for stat in &stats[1..] {
        if stat.total_uses > peak.total_uses {
            peak = stat;
        }
    }

    let consistency_score = if mean > 0.0 {
        let variance = uses.iter().map(|u| (u - mean).powi(2)).sum::<f64>() / n;
        let coefficient_of_variation = variance.sqrt() / mean;
        (100.0 - coefficient_of_variation * 100.0).max(0.0)
    } else {
        0.0
    };

    UsageInsights {
        trend: Trend::from_growth_rate(growth_rate),
        growth_rate,
        peak_usage_date: Some(peak.date),
        peak_usage: Some(peak.total_uses),
        average_daily_usage: mean,
        consistency_score,
    }
}
