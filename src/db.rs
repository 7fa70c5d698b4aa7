//! SQLite connection and schema.
//!
//! Two independent tables live in the same file: `affinity` (one row per
//! endpoint URL, the learning substrate) and `url_cache` (raw catalog
//! responses). Decimal columns are stored as TEXT so no precision is lost
//! across thousands of incremental updates.

use anyhow::{Context, Result};
use log::debug;
use rusqlite::Connection;
use std::path::Path;

/// Open the database at `path`, creating the file and schema if needed.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Rusqlite DB connection refused. DB location: {}", path.display()))?;
    init_schema(&conn)?;
    debug!("Opened database {}", path.display());
    Ok(conn)
}

/// In-memory database with the full schema. Used by tests and benchmarks.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
    init_schema(&conn)?;
    Ok(conn)
}

/// Create both tables. Idempotent.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS affinity (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            url               TEXT    UNIQUE NOT NULL,
            cumulative_reward TEXT    NOT NULL DEFAULT '0',
            run_count         INTEGER NOT NULL DEFAULT 0 CHECK (run_count >= 0),
            m8                TEXT    NOT NULL DEFAULT '0',
            m16               TEXT    NOT NULL DEFAULT '0',
            m32               TEXT    NOT NULL DEFAULT '0'
        );
        CREATE TABLE IF NOT EXISTS url_cache (
            key          TEXT    PRIMARY KEY,
            content      TEXT    NOT NULL,
            last_updated INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_url_cache_updated ON url_cache(last_updated);",
    )
    .context("Invalid SQL command when creating the schema")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() -> Result<()> {
        let conn = open_in_memory()?;
        init_schema(&conn)?;

        let tables: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('affinity', 'url_cache')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(tables, 2);
        Ok(())
    }

    #[test]
    fn test_open_creates_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("radios.db");
        drop(open(&path)?);
        assert!(path.exists());
        // Reopening an existing database keeps working.
        drop(open(&path)?);
        Ok(())
    }
}
