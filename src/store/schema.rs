//! Database schema creation and additive migrations.
//!
//! Safe to run on every start: tables are created only when absent and
//! columns added by later versions are appended with `ALTER TABLE`. Rows
//! written before a column existed read it as `NULL`.

use rusqlite::Connection;
use tracing::info;

/// Base tables. The `email_logs` layout matches the first released version,
/// so databases created by it open unchanged.
const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS email_logs (
    container_id TEXT,
    recipient TEXT,
    subject TEXT,
    status TEXT,
    timestamp REAL,
    body_snippet TEXT,
    PRIMARY KEY (container_id, recipient, subject, timestamp)
);
CREATE INDEX IF NOT EXISTS idx_email_logs_container
    ON email_logs (container_id, timestamp);
CREATE TABLE IF NOT EXISTS templates (
    id TEXT NOT NULL,
    name TEXT PRIMARY KEY,
    html TEXT,
    design TEXT,
    created_at TEXT NOT NULL
);
";

/// Columns added after the first version: `(table, column, declaration)`.
const ADDED_COLUMNS: &[(&str, &str, &str)] = &[("email_logs", "body_html", "TEXT")];

/// Create missing tables and apply additive column migrations.
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLES)?;
    for &(table, column, decl) in ADDED_COLUMNS {
        if !has_column(conn, table, column)? {
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
            info!(table, column, "Added column");
        }
    }
    Ok(())
}

/// Whether `table` already has `column`.
pub fn has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
