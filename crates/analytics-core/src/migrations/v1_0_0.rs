//! Migration v1.0.0: Distinct daily users.
//!
//! Adds `component_usage_users`, which records each identified user once per
//! component per day. `component_usage_stats.unique_users` is derived from it.

use super::Migration;

/// Version number: 1_000_000 represents v1.0.0
/// Format: MAJOR * 1_000_000 + MINOR * 1_000 + PATCH
pub const VERSION: i64 = 1_000_000;

pub fn migration() -> Migration {
    Migration {
        version: VERSION,
        description: "v1.0.0: Distinct daily users",
        sql: SQL,
        add_columns: &[],
    }
}

const SQL: &str = r#"
-- ============================================================================
-- Stackpulse v1.0.0 Schema Migration
-- Distinct daily users
-- ============================================================================

CREATE TABLE IF NOT EXISTS component_usage_users (
    component_id TEXT NOT NULL,
    -- Calendar date (YYYY-MM-DD), matches component_usage_stats.date
    date TEXT NOT NULL,
    user_id TEXT NOT NULL,
    first_seen_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (component_id, date, user_id),
    FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_usage_users_date ON component_usage_users(date);
"#;
