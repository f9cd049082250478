//! Versioned schema migrations.
//!
//! Each migration is applied at most once and recorded in `schema_migrations`.
//! Versions use the format `MAJOR * 1_000_000 + MINOR * 1_000 + PATCH`.

use crate::Result;
use rusqlite::Connection;
use tracing::info;

pub mod v1_0_0;
pub mod v1_1_0;

/// A single schema migration
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    /// DDL executed as a batch; must be idempotent
    pub sql: &'static str,
    /// Columns added to existing tables: (table_name, column_name, column_type)
    pub add_columns: &'static [(&'static str, &'static str, &'static str)],
}

/// All known migrations in ascending version order
pub fn all_migrations() -> Vec<Migration> {
    vec![v1_0_0::migration(), v1_1_0::migration()]
}

/// Check whether a column exists on a table
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Highest applied migration version, or 0 when none have run
pub fn current_version(conn: &Connection) -> Result<i64> {
    ensure_migrations_table(conn)?;
    let version: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Apply every pending migration.
///
/// Returns the number of migrations applied by this call.
pub fn run_migrations(conn: &Connection) -> Result<usize> {
    let current = current_version(conn)?;
    let mut applied = 0;

    for migration in all_migrations() {
        if migration.version <= current {
            continue;
        }

        let tx = conn.unchecked_transaction()?;
        for (table, column, column_type) in migration.add_columns {
            if !column_exists(&tx, table, column)? {
                tx.execute_batch(&format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    table, column, column_type
                ))?;
            }
        }
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;

        info!(
            version = migration.version,
            description = migration.description,
            "Applied schema migration"
        );
        applied += 1;
    }

    Ok(applied)
}

fn ensure_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
          version INTEGER PRIMARY KEY,
          description TEXT NOT NULL,
          applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );
        "#,
    )?;
    Ok(())
}
