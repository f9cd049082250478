//! Period resolution
//!
//! Maps symbolic timeframe tokens (`24h`, `7d`, `30d`, `90d`, `1y`) to a day
//! count and an absolute date range. Unknown tokens silently fall back to
//! 30 days; endpoint handlers decide separately whether to reject them.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;

/// Symbolic reporting window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Timeframe {
    #[serde(rename = "24h")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "1y")]
    Year,
}

impl Timeframe {
    /// Fallback for unknown tokens
    pub const DEFAULT: Timeframe = Timeframe::Month;

    /// Parse a token, `None` when it is not recognized
    pub fn parse(token: &str) -> Option<Self> {
        match token.trim() {
            "24h" => Some(Timeframe::Day),
            "7d" => Some(Timeframe::Week),
            "30d" => Some(Timeframe::Month),
            "90d" => Some(Timeframe::Quarter),
            "1y" => Some(Timeframe::Year),
            _ => None,
        }
    }

    /// Parse a token, falling back to [`Timeframe::DEFAULT`]
    pub fn parse_or_default(token: &str) -> Self {
        Self::parse(token).unwrap_or(Self::DEFAULT)
    }

    pub fn days(&self) -> i64 {
        match self {
            Timeframe::Day => 1,
            Timeframe::Week => 7,
            Timeframe::Month => 30,
            Timeframe::Quarter => 90,
            Timeframe::Year => 365,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::Day => "24h",
            Timeframe::Week => "7d",
            Timeframe::Month => "30d",
            Timeframe::Quarter => "90d",
            Timeframe::Year => "1y",
        }
    }
}

/// Inclusive date range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Number of calendar days covered (0 for an inverted range)
    pub fn num_days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }
}

/// A resolved reporting period
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub timeframe: Timeframe,
    pub days: i64,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Period {
    /// Resolve a token against `now`; unknown tokens resolve to 30 days
    pub fn resolve(token: &str, now: DateTime<Utc>) -> Self {
        Self::from_timeframe(Timeframe::parse_or_default(token), now)
    }

    pub fn from_timeframe(timeframe: Timeframe, now: DateTime<Utc>) -> Self {
        let days = timeframe.days();
        let start_date = (now - Duration::hours(days * 24)).date_naive();
        Self {
            timeframe,
            days,
            start_date,
            end_date: now.date_naive(),
        }
    }

    /// The current window from `start_date` through `end_date`, both inclusive.
    ///
    /// Spans `days + 1` calendar days because today is still in progress.
    /// [`Period::previous`] spans exactly `days`, so comparisons between the
    /// two are not like-for-like on raw totals.
    pub fn range(&self) -> DateRange {
        DateRange::new(self.start_date, self.end_date)
    }

    /// The `days`-long window immediately preceding `start_date`.
    ///
    /// Ends the day before `start_date` so the first day of the current
    /// period is never counted in both windows.
    pub fn previous(&self) -> DateRange {
        DateRange::new(
            self.start_date - Duration::days(self.days),
            self.start_date - Duration::days(1),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_timeframes() {
        assert_eq!(Timeframe::parse("24h"), Some(Timeframe::Day));
        assert_eq!(Timeframe::parse("7d"), Some(Timeframe::Week));
        assert_eq!(Timeframe::parse("30d"), Some(Timeframe::Month));
        assert_eq!(Timeframe::parse("90d"), Some(Timeframe::Quarter));
        assert_eq!(Timeframe::parse("1y"), Some(Timeframe::Year));
        assert_eq!(Timeframe::parse("2w"), None);
    }

    #[test]
    fn test_unknown_token_falls_back_to_30_days() {
        let period = Period::resolve("fortnight", noon(2024, 6, 15));
        assert_eq!(period.days, 30);
        assert_eq!(period.timeframe, Timeframe::Month);
    }

    #[test]
    fn test_resolve_7d() {
        let period = Period::resolve("7d", noon(2024, 6, 15));
        assert_eq!(period.days, 7);
        assert_eq!(period.start_date, date(2024, 6, 8));
        assert_eq!(period.end_date, date(2024, 6, 15));
    }

    #[test]
    fn test_resolve_24h_truncates_to_date() {
        let period = Period::resolve("24h", noon(2024, 3, 1));
        assert_eq!(period.days, 1);
        assert_eq!(period.start_date, date(2024, 2, 29));
    }

    #[test]
    fn test_previous_window_does_not_overlap() {
        let period = Period::resolve("7d", noon(2024, 6, 15));
        let previous = period.previous();

        assert_eq!(previous.start, date(2024, 6, 1));
        assert_eq!(previous.end, date(2024, 6, 7));
        assert_eq!(previous.num_days(), 7);
        assert!(!previous.contains(period.start_date));
        assert!(period.range().contains(period.start_date));
    }

    #[test]
    fn test_current_window_includes_today() {
        let week = Period::resolve("7d", noon(2024, 6, 15));
        assert_eq!(week.range().num_days(), 8);
        assert_eq!(week.previous().num_days(), 7);
        assert_eq!(week.range().end, date(2024, 6, 15));

        let day = Period::resolve("24h", noon(2024, 6, 15));
        assert_eq!(day.range().num_days(), 2);
        assert_eq!(day.previous().num_days(), 1);
        assert_eq!(day.previous().end, date(2024, 6, 13));
    }

    #[test]
    fn test_date_range_contains_is_inclusive() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 31));
        assert!(range.contains(date(2024, 1, 1)));
        assert!(range.contains(date(2024, 1, 31)));
        assert!(!range.contains(date(2024, 2, 1)));
        assert_eq!(range.num_days(), 31);
    }

    #[test]
    fn test_timeframe_serializes_as_token() {
        let json = serde_json::to_value(Timeframe::Day).unwrap();
        assert_eq!(json, "24h");
    }
}
