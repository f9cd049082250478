//! Migration v1.1.0: Event log and component quality scores.
//!
//! This migration adds:
//! - `component_usage_events`, the append-only log of tracked actions
//! - `performance_score` and `accessibility_score` on components

use super::Migration;

/// Version number: 1_001_000 represents v1.1.0
/// Format: MAJOR * 1_000_000 + MINOR * 1_000 + PATCH
pub const VERSION: i64 = 1_001_000;

/// Columns to add to existing tables.
/// Format: (table_name, column_name, column_type)
const ADD_COLUMNS: &[(&str, &str, &str)] = &[
    ("components", "performance_score", "REAL NOT NULL DEFAULT 0"),
    ("components", "accessibility_score", "REAL NOT NULL DEFAULT 0"),
];

pub fn migration() -> Migration {
    Migration {
        version: VERSION,
        description: "v1.1.0: Event log and component quality scores",
        sql: SQL,
        add_columns: ADD_COLUMNS,
    }
}

const SQL: &str = r#"
-- ============================================================================
-- Stackpulse v1.1.0 Schema Migration
-- Event log and component quality scores
-- ============================================================================

CREATE TABLE IF NOT EXISTS component_usage_events (
    id TEXT PRIMARY KEY,
    component_id TEXT NOT NULL,
    user_id TEXT,
    session_id TEXT,
    -- One of: view, import, copy, download, favorite, share
    action TEXT NOT NULL,
    -- JSON object, may be NULL
    metadata TEXT,
    created_at TEXT NOT NULL,
    FOREIGN KEY (component_id) REFERENCES components(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_usage_events_component ON component_usage_events(component_id, created_at);
CREATE INDEX IF NOT EXISTS idx_usage_events_action ON component_usage_events(action);
"#;
