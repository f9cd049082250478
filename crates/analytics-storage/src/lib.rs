//! Stackpulse Analytics Storage
//!
//! Storage backend abstraction for usage analytics, plus the queries that
//! read and write usage rows. Only a local SQLite backend is provided.

use rusqlite::Connection;
use stackpulse_analytics_core::{init_sqlite_schema, migrations::run_migrations, AnalyticsError};
use std::path::{Path, PathBuf};

pub mod components;
pub mod events;
pub mod stats;

pub use components::{
    get_component, increment_usage_count, insert_component, list_components, ComponentFilter,
};
pub use events::{action_breakdown, insert_events};
pub use stats::{
    fetch_filtered_usage_stats, fetch_period_totals, fetch_usage_stats, record_daily_usage,
    refresh_trending_score, ImportOutcome, PeriodTotals, StatFetch,
};

/// Storage errors are the core analytics errors
pub type StorageError = AnalyticsError;

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Backend abstraction for analytics storage
pub trait AnalyticsBackend: Send + Sync {
    /// Get a connection with the schema initialized and migrations applied
    fn get_connection(&self) -> Result<Connection>;

    /// Check if the database exists
    fn exists(&self) -> Result<bool>;

    /// Initialize a new database (create the file and schema)
    fn initialize(&self) -> Result<()>;
}

/// Trait object alias used by the API state
pub type DynAnalyticsBackend = dyn AnalyticsBackend;

/// Local filesystem SQLite backend
#[derive(Clone, Debug)]
pub struct LocalSqliteBackend {
    /// Path to the SQLite database file
    path: PathBuf,
}

impl LocalSqliteBackend {
    /// Create a new local SQLite backend
    ///
    /// # Example
    /// ```
    /// use stackpulse_analytics_storage::LocalSqliteBackend;
    ///
    /// let backend = LocalSqliteBackend::new("stackpulse.db");
    /// ```
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Get the path to the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;

        // Enable foreign key constraints
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        init_sqlite_schema(&conn)?;
        run_migrations(&conn)?;

        Ok(conn)
    }
}

impl AnalyticsBackend for LocalSqliteBackend {
    fn get_connection(&self) -> Result<Connection> {
        self.open()
    }

    fn exists(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    fn initialize(&self) -> Result<()> {
        if self.exists()? {
            return Err(AnalyticsError::Other(format!(
                "Database already exists at {:?}",
                self.path
            )));
        }

        self.open()?;
        tracing::info!(path = ?self.path, "Initialized analytics database");
        Ok(())
    }
}
