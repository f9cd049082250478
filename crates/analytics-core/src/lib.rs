//! Stackpulse Analytics Core
//!
//! Core types, scoring functions and SQLite schema for component usage analytics.
//!
//! Everything in this crate except the schema DDL is a pure function of its
//! inputs: periods, grouping, insights and ranking scores are recomputed on
//! every read from committed `component_usage_stats` rows.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod grouping;
pub mod insights;
pub mod migrations;
pub mod period;
pub mod scoring;
pub mod validation;

pub use grouping::{group_stats, summarize, AggregatedPeriod, Granularity};
pub use insights::{calculate_insights, percent_change, Trend, UsageInsights};
pub use period::{DateRange, Period, Timeframe};
pub use scoring::{
    popularity_score, rank_trending, trending_score, PopularSort, PopularityBreakdown,
    TrendDirection, TrendingInput, TrendingMetrics,
};

/// A marketplace component subject to usage analytics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    /// UUID of the component
    pub id: String,
    /// Display name
    pub name: String,
    /// Author (owner) user id
    pub author_id: String,
    /// Category (e.g., "forms", "navigation")
    pub category: Option<String>,
    /// UI framework (e.g., "react", "vue")
    pub framework: Option<String>,
    /// Whether the component is visible to everyone
    pub is_public: bool,
    /// Whether the component is featured in the marketplace
    pub is_featured: bool,
    /// Lifetime usage count (incremented on import/copy/download)
    pub usage_count: i64,
    /// Average rating on a 0-5 scale
    pub rating: Option<f64>,
    /// Performance score (0-100)
    pub performance_score: f64,
    /// Accessibility score (0-100)
    pub accessibility_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Component {
    /// A component is visible when it is public or the caller is its author.
    pub fn is_visible_to(&self, user_id: Option<&str>) -> bool {
        self.is_public || user_id == Some(self.author_id.as_str())
    }
}

/// Per-component, per-day usage counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageStat {
    pub component_id: String,
    pub date: NaiveDate,
    pub total_uses: i64,
    /// Distinct identified users for the day
    pub unique_users: i64,
    pub successful_imports: i64,
    pub failed_imports: i64,
    pub avg_rating: Option<f64>,
    pub trending_score: f64,
    /// Distinct user ids behind `unique_users`, when the store has them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
}

impl UsageStat {
    /// Create an empty stat row for a component and day
    pub fn new(component_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            component_id: component_id.into(),
            date,
            total_uses: 0,
            unique_users: 0,
            successful_imports: 0,
            failed_imports: 0,
            avg_rating: None,
            trending_score: 0.0,
            user_ids: Vec::new(),
        }
    }

    pub fn with_uses(mut self, total_uses: i64) -> Self {
        self.total_uses = total_uses;
        self
    }

    pub fn with_unique_users(mut self, unique_users: i64) -> Self {
        self.unique_users = unique_users;
        self
    }

    pub fn with_imports(mut self, successful: i64, failed: i64) -> Self {
        self.successful_imports = successful;
        self.failed_imports = failed;
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.avg_rating = Some(rating);
        self
    }
}

/// User actions that can be tracked against a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingAction {
    View,
    Import,
    Copy,
    Download,
    Favorite,
    Share,
}

impl TrackingAction {
    pub const ALL: [TrackingAction; 6] = [
        TrackingAction::View,
        TrackingAction::Import,
        TrackingAction::Copy,
        TrackingAction::Download,
        TrackingAction::Favorite,
        TrackingAction::Share,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingAction::View => "view",
            TrackingAction::Import => "import",
            TrackingAction::Copy => "copy",
            TrackingAction::Download => "download",
            TrackingAction::Favorite => "favorite",
            TrackingAction::Share => "share",
        }
    }

    /// Actions that bump the lifetime `usage_count` of a component
    pub fn increments_usage_count(&self) -> bool {
        matches!(
            self,
            TrackingAction::Import | TrackingAction::Copy | TrackingAction::Download
        )
    }
}

impl std::str::FromStr for TrackingAction {
    type Err = AnalyticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "view" => Ok(TrackingAction::View),
            "import" => Ok(TrackingAction::Import),
            "copy" => Ok(TrackingAction::Copy),
            "download" => Ok(TrackingAction::Download),
            "favorite" => Ok(TrackingAction::Favorite),
            "share" => Ok(TrackingAction::Share),
            other => Err(AnalyticsError::ValidationError(format!(
                "Unknown action '{}' (allowed: view, import, copy, download, favorite, share)",
                other
            ))),
        }
    }
}

/// Append-only record of a single tracked action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub component_id: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub action: TrackingAction,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl TrackingEvent {
    pub fn new(component_id: impl Into<String>, action: TrackingAction) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            component_id: component_id.into(),
            user_id: None,
            session_id: None,
            action,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_session(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Errors that can occur in analytics operations
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for analytics operations
pub type Result<T> = std::result::Result<T, AnalyticsError>;

/// Initialize the base SQLite schema
///
/// Creates the tables every later migration builds on:
/// - `components`: Marketplace components (consumed, not managed, by analytics)
/// - `component_usage_stats`: One counter row per component per day
pub fn init_sqlite_schema(conn: &rusqlite::Connection) -> Result<()> {
    let ddl = r#"
    CREATE TABLE IF NOT EXISTS components (
      id TEXT PRIMARY KEY,
      name TEXT NOT NULL,
      author_id TEXT NOT NULL,
      category TEXT,
      framework TEXT,
      is_public INTEGER NOT NULL DEFAULT 1,
      is_featured INTEGER NOT NULL DEFAULT 0,
      usage_count INTEGER NOT NULL DEFAULT 0,
      rating REAL,
      created_at TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_components_author ON components(author_id);
    CREATE INDEX IF NOT EXISTS idx_components_category ON components(category);
    CREATE INDEX IF NOT EXISTS idx_components_framework ON components(framework);

    -- One row per (component_id, date)
    CREATE TABLE IF NOT EXISTS component_usage_stats (
      id INTEGER PRIMARY KEY AUTOINCREMENT,
      component_id TEXT NOT NULL,
      date TEXT NOT NULL,
      total_uses INTEGER NOT NULL DEFAULT 0,
      unique_users INTEGER NOT NULL DEFAULT 0,
      successful_imports INTEGER NOT NULL DEFAULT 0,
      failed_imports INTEGER NOT NULL DEFAULT 0,
      avg_rating REAL,
      trending_score REAL NOT NULL DEFAULT 0,
      updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
      FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE,
      UNIQUE(component_id, date)
    );

    CREATE INDEX IF NOT EXISTS idx_usage_stats_component ON component_usage_stats(component_id);
    CREATE INDEX IF NOT EXISTS idx_usage_stats_date ON component_usage_stats(date);
    "#;

    conn.execute_batch(ddl)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_component(is_public: bool) -> Component {
        Component {
            id: "c0ffee00-0000-4000-8000-000000000001".to_string(),
            name: "Button".to_string(),
            author_id: "author-1".to_string(),
            category: Some("inputs".to_string()),
            framework: Some("react".to_string()),
            is_public,
            is_featured: false,
            usage_count: 0,
            rating: None,
            performance_score: 0.0,
            accessibility_score: 0.0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_init_schema() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        assert!(tables.contains(&"components".to_string()));
        assert!(tables.contains(&"component_usage_stats".to_string()));
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        init_sqlite_schema(&conn).unwrap();
        init_sqlite_schema(&conn).unwrap();
    }

    #[test]
    fn test_tracking_action_parsing() {
        assert_eq!(
            "import".parse::<TrackingAction>().unwrap(),
            TrackingAction::Import
        );
        assert_eq!(
            "SHARE".parse::<TrackingAction>().unwrap(),
            TrackingAction::Share
        );
        assert!("delete".parse::<TrackingAction>().is_err());

        for action in TrackingAction::ALL {
            assert_eq!(action.as_str().parse::<TrackingAction>().unwrap(), action);
        }
    }

    #[test]
    fn test_usage_count_actions() {
        assert!(TrackingAction::Import.increments_usage_count());
        assert!(TrackingAction::Copy.increments_usage_count());
        assert!(TrackingAction::Download.increments_usage_count());
        assert!(!TrackingAction::View.increments_usage_count());
        assert!(!TrackingAction::Favorite.increments_usage_count());
        assert!(!TrackingAction::Share.increments_usage_count());
    }

    #[test]
    fn test_component_visibility() {
        let public = sample_component(true);
        assert!(public.is_visible_to(None));
        assert!(public.is_visible_to(Some("someone-else")));

        let private = sample_component(false);
        assert!(!private.is_visible_to(None));
        assert!(!private.is_visible_to(Some("someone-else")));
        assert!(private.is_visible_to(Some("author-1")));
    }

    #[test]
    fn test_usage_stat_serializes_date_without_time() {
        let stat = UsageStat::new("c1", NaiveDate::from_ymd_opt(2024, 3, 9).unwrap()).with_uses(4);
        let json = serde_json::to_value(&stat).unwrap();
        assert_eq!(json["date"], "2024-03-09");
        assert_eq!(json["total_uses"], 4);
        assert!(json.get("user_ids").is_none());
    }
}
