//! The delivery-log store: per-recipient delivery records and templates.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use super::schema;
use crate::error::{PoolError, Result};
use crate::model::delivery::{DeliveryRecord, DeliveryStatus};
use crate::model::template::Template;

/// How long a writer waits for a competing writer's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Durable keyed store backed by SQLite.
///
/// Every call goes straight to the database; nothing is cached in memory, so
/// several processes may share one file. Writes are committed (WAL,
/// `synchronous = FULL`) before the call returns.
pub struct LogStore {
    path: PathBuf,
    conn: Connection,
}

impl LogStore {
    /// Open (creating if needed) the database at `path` and bring the schema
    /// up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PoolError::io(parent, e))?;
        }
        let key = path.display().to_string();
        let conn = Connection::open(&path).map_err(|e| PoolError::storage("open", &key, e))?;
        let store = Self { path, conn };
        store.configure(&key)?;
        info!(path = %store.path.display(), "Opened delivery log store");
        Ok(store)
    }

    /// Open a private in-memory database (tests, dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| PoolError::storage("open", ":memory:", e))?;
        let store = Self {
            path: PathBuf::from(":memory:"),
            conn,
        };
        store.configure(":memory:")?;
        Ok(store)
    }

    fn configure(&self, key: &str) -> Result<()> {
        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| PoolError::storage("configure", key, e))?;
        self.conn
            .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
            .map_err(|e| PoolError::storage("configure", key, e))?;
        self.conn
            .pragma_update(None, "synchronous", "FULL")
            .map_err(|e| PoolError::storage("configure", key, e))?;
        schema::ensure_schema(&self.conn).map_err(|e| PoolError::storage("migrate", key, e))
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the connection.
    pub fn close(self) -> Result<()> {
        let key = self.path.display().to_string();
        self.conn
            .close()
            .map_err(|(_, e)| PoolError::storage("close", key, e))
    }

    // ── Delivery records ────────────────────────────────────────

    /// Insert or replace `records` under `container_id`.
    ///
    /// Rows with an existing natural key are replaced. Snippets are cut to
    /// [`crate::model::delivery::MAX_SNIPPET_CHARS`] characters. The batch
    /// commits atomically.
    pub fn upsert_deliveries(&self, container_id: &str, records: &[DeliveryRecord]) -> Result<()> {
        let fail = |e| PoolError::storage("upsert_deliveries", container_id, e);
        let tx = self.conn.unchecked_transaction().map_err(fail)?;
        {
            let mut stmt = tx
                .prepare_cached(
                    "INSERT OR REPLACE INTO email_logs
                     (container_id, recipient, subject, status, timestamp, body_snippet, body_html)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(fail)?;
            for record in records {
                stmt.execute(params![
                    container_id,
                    record.recipient,
                    record.subject,
                    record.status.to_string(),
                    record.timestamp,
                    DeliveryRecord::clamp_snippet(&record.body_snippet),
                    record.body_html,
                ])
                .map_err(fail)?;
            }
        }
        tx.commit().map_err(fail)?;
        debug!(container = %container_id, count = records.len(), "Upserted delivery records");
        Ok(())
    }

    /// Insert or replace a single record under its own container id.
    pub fn upsert_delivery(&self, record: &DeliveryRecord) -> Result<()> {
        self.upsert_deliveries(&record.container_id, std::slice::from_ref(record))
    }

    /// All records for `container_id`, newest first.
    pub fn query_deliveries(&self, container_id: &str) -> Result<Vec<DeliveryRecord>> {
        let fail = |e| PoolError::storage("query_deliveries", container_id, e);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT container_id, recipient, subject, status, timestamp, body_snippet, body_html
                 FROM email_logs
                 WHERE container_id = ?1
                 ORDER BY timestamp DESC",
            )
            .map_err(fail)?;
        let rows = stmt
            .query_map(params![container_id], map_delivery)
            .map_err(fail)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(fail)
    }

    /// Number of records for `container_id`.
    pub fn count_deliveries(&self, container_id: &str) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM email_logs WHERE container_id = ?1",
                params![container_id],
                |row| row.get(0),
            )
            .map_err(|e| PoolError::storage("count_deliveries", container_id, e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Remove every record for `container_id`. Removing nothing is not an error.
    pub fn delete_deliveries(&self, container_id: &str) -> Result<u64> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM email_logs WHERE container_id = ?1",
                params![container_id],
            )
            .map_err(|e| PoolError::storage("delete_deliveries", container_id, e))?;
        info!(container = %container_id, removed, "Deleted delivery records");
        Ok(removed as u64)
    }

    // ── Templates ───────────────────────────────────────────────

    /// Save a template by name, overwriting html and design of an existing one.
    ///
    /// The id and creation time of an existing template are kept.
    pub fn upsert_template(
        &self,
        name: &str,
        html: Option<&str>,
        design: &serde_json::Value,
    ) -> Result<Template> {
        let fail = |e| PoolError::storage("upsert_template", name, e);
        self.conn
            .execute(
                "INSERT INTO templates (id, name, html, design, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(name) DO UPDATE SET html = excluded.html, design = excluded.design",
                params![ulid::Ulid::new().to_string(), name, html, design, Utc::now()],
            )
            .map_err(fail)?;
        let saved = self
            .conn
            .query_row(
                "SELECT id, name, html, design, created_at FROM templates WHERE name = ?1",
                params![name],
                map_template,
            )
            .optional()
            .map_err(fail)?;
        saved.ok_or_else(|| PoolError::NotFound(format!("template '{name}'")))
    }

    /// All templates, oldest first.
    pub fn list_templates(&self) -> Result<Vec<Template>> {
        let fail = |e| PoolError::storage("list_templates", "*", e);
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, name, html, design, created_at FROM templates
                 ORDER BY created_at ASC, name ASC",
            )
            .map_err(fail)?;
        let rows = stmt.query_map([], map_template).map_err(fail)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(fail)
    }
}

/// Rows from the first schema version may hold NULLs anywhere.
fn map_delivery(row: &Row<'_>) -> rusqlite::Result<DeliveryRecord> {
    let status: Option<String> = row.get(3)?;
    Ok(DeliveryRecord {
        container_id: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
        recipient: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
        subject: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        status: status
            .as_deref()
            .unwrap_or("pending")
            .parse()
            .unwrap_or(DeliveryStatus::Pending),
        timestamp: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
        body_snippet: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        body_html: row.get(6)?,
    })
}

fn map_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    let design: Option<serde_json::Value> = row.get(3)?;
    let created_at: DateTime<Utc> = row.get(4)?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        html: row.get(2)?,
        design: design.unwrap_or(serde_json::Value::Null),
        created_at,
    })
}
