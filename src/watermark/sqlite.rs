//! SQLite Watermark Store
//!
//! Persistent watermarks in an embedded SQLite database. Keys are stored
//! under a namespace prefix so the file can be shared with other data.

use std::path::Path;
use std::time::Duration;

use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use super::{WatermarkStore, DEFAULT_KEY_PREFIX};
use crate::config::WatermarkConfig;
use crate::error::Result;
use crate::node::Position;

/// Watermark store backed by SQLite
pub struct SqliteWatermarkStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Record lifetime
    ttl: Duration,
    /// Namespace prepended to every key
    prefix: String,
}

impl SqliteWatermarkStore {
    /// Create or open a watermark database at `path`
    pub fn open(path: &Path, ttl: Duration, prefix: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn, ttl, prefix)
    }

    /// Create a store that lives only as long as this process
    pub fn in_memory(ttl: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ttl, DEFAULT_KEY_PREFIX)
    }

    /// Build the store described by the `[watermark]` config section
    pub fn from_config(config: &WatermarkConfig) -> Result<Self> {
        let ttl = Duration::from_secs(config.ttl_secs);
        match &config.path {
            Some(path) => Self::open(path, ttl, config.key_prefix.as_str()),
            None => Self::with_connection(
                Connection::open_in_memory()?,
                ttl,
                config.key_prefix.as_str(),
            ),
        }
    }

    fn with_connection(conn: Connection, ttl: Duration, prefix: impl Into<String>) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS watermarks (
                key TEXT PRIMARY KEY,
                position TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_watermarks_expires_at
                ON watermarks(expires_at);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            ttl,
            prefix: prefix.into(),
        })
    }

    /// Get the configured TTL
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Delete expired records, returning how many were removed
    pub async fn purge_expired(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM watermarks WHERE substr(key, 1, length(?1)) = ?1 AND expires_at <= ?2",
            params![self.prefix, now_millis()],
        )?;
        Ok(deleted as u64)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[async_trait::async_trait]
impl WatermarkStore for SqliteWatermarkStore {
    async fn get(&self, key: &str) -> Result<Option<Position>> {
        let conn = self.conn.lock().await;
        let result: std::result::Result<String, _> = conn.query_row(
            "SELECT position FROM watermarks WHERE key = ?1 AND expires_at > ?2",
            params![self.key(key), now_millis()],
            |row| row.get(0),
        );

        match result {
            Ok(position) => Ok(Some(Position::from(position))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, position: &Position) -> Result<()> {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);

        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO watermarks (key, position, expires_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET position = ?2, expires_at = ?3
            "#,
            params![self.key(key), position.as_str(), expires_at],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM watermarks WHERE key = ?1", params![self.key(key)])?;
        Ok(())
    }
}
