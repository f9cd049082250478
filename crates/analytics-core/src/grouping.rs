//! Granularity grouping
//!
//! Buckets per-day [`UsageStat`] rows into day, week or month keys and folds
//! each bucket into an [`AggregatedPeriod`]. Summation is commutative and the
//! bucket key is a pure function of the row date, so row order never matters.

use crate::UsageStat;
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Time-bucket width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Accepted for compatibility; there is no hour-level data so this
    /// groups exactly like [`Granularity::Daily`].
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim().to_lowercase().as_str() {
            "hourly" => Some(Granularity::Hourly),
            "daily" => Some(Granularity::Daily),
            "weekly" => Some(Granularity::Weekly),
            "monthly" => Some(Granularity::Monthly),
            _ => None,
        }
    }

    /// Parse a token, falling back to daily
    pub fn parse_or_default(token: &str) -> Self {
        Self::parse(token).unwrap_or(Granularity::Daily)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Bucket key for a row date
    pub fn bucket_key(&self, date: NaiveDate) -> String {
        match self {
            Granularity::Weekly => {
                let offset = date.weekday().num_days_from_sunday() as i64;
                (date - Duration::days(offset)).format("%Y-%m-%d").to_string()
            }
            Granularity::Monthly => date.format("%Y-%m").to_string(),
            Granularity::Hourly | Granularity::Daily => date.format("%Y-%m-%d").to_string(),
        }
    }
}

/// One grouped bucket, derived on read and never stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedPeriod {
    pub period_key: String,
    pub total_uses: i64,
    pub unique_users: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
    pub avg_rating: Option<f64>,
    /// Percentage of successful imports; `None` when there were no imports
    pub success_rate: Option<f64>,
}

/// Union of users seen in a bucket.
///
/// Known ids are deduplicated as a set. Rows that only carry a scalar count
/// contribute that many sentinels keyed by `(component_id, date)`, so the
/// same row seen twice is not double counted.
#[derive(Default)]
struct UserUnion<'a> {
    ids: HashSet<&'a str>,
    sentinels: HashMap<(&'a str, NaiveDate), i64>,
}

impl<'a> UserUnion<'a> {
    fn add(&mut self, stat: &'a UsageStat) {
        if stat.user_ids.is_empty() {
            let entry = self
                .sentinels
                .entry((stat.component_id.as_str(), stat.date))
                .or_insert(0);
            *entry = (*entry).max(stat.unique_users.max(0));
        } else {
            self.ids.extend(stat.user_ids.iter().map(String::as_str));
        }
    }

    fn len(&self) -> i64 {
        self.ids.len() as i64 + self.sentinels.values().sum::<i64>()
    }
}

#[derive(Default)]
struct Bucket<'a> {
    total_uses: i64,
    successful_imports: i64,
    failed_imports: i64,
    users: UserUnion<'a>,
    rating_sum: f64,
    rating_count: u32,
}

impl<'a> Bucket<'a> {
    fn add(&mut self, stat: &'a UsageStat) {
        self.total_uses += stat.total_uses;
        self.successful_imports += stat.successful_imports;
        self.failed_imports += stat.failed_imports;
        self.users.add(stat);
        if let Some(rating) = stat.avg_rating {
            self.rating_sum += rating;
            self.rating_count += 1;
        }
    }

    fn finish(self, period_key: String) -> AggregatedPeriod {
        let attempts = self.successful_imports + self.failed_imports;
        AggregatedPeriod {
            period_key,
            total_uses: self.total_uses,
            unique_users: self.users.len(),
            successful_imports: self.successful_imports,
            failed_imports: self.failed_imports,
            avg_rating: (self.rating_count > 0).then(|| self.rating_sum / self.rating_count as f64),
            success_rate: (attempts > 0)
                .then(|| self.successful_imports as f64 / attempts as f64 * 100.0),
        }
    }
}

/// Group rows by granularity, sorted ascending by bucket key
pub fn group_stats(stats: &[UsageStat], granularity: Granularity) -> Vec<AggregatedPeriod> {
    let mut buckets: BTreeMap<String, Bucket<'_>> = BTreeMap::new();

    for stat in stats {
        buckets
            .entry(granularity.bucket_key(stat.date))
            .or_default()
            .add(stat);
    }

    buckets
        .into_iter()
        .map(|(key, bucket)| bucket.finish(key))
        .collect()
}

/// Fold every row into a single bucket (used for period totals)
pub fn summarize(stats: &[UsageStat], period_key: impl Into<String>) -> AggregatedPeriod {
    let mut bucket = Bucket::default();
    for stat in stats {
        bucket.add(stat);
    }
    bucket.finish(period_key.into())
}
