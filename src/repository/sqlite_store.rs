//! SQLite Key-Value Store

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::traits::{check_quota, KeyValueStore};
use crate::domain::DomainResult;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    quota: Option<usize>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn, quota: None }
    }

    /// Refuse values larger than `bytes`
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota = Some(bytes);
        self
    }
}

fn keys_with_prefix(conn: &Connection, prefix: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT key FROM planning_kv WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key")?;
    let rows = stmt.query_map(params![prefix], |row| row.get::<_, String>(0))?;
    let keys = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(keys)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> DomainResult<Option<String>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row("SELECT value FROM planning_kv WHERE key = ?1", params![key], |row| row.get::<_, String>(0))
            .optional()?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str) -> DomainResult<()> {
        check_quota(key, value, self.quota)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO planning_kv (key, value, updated_at) VALUES (?1, ?2, ?3)",
            params![key, value, chrono::Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> DomainResult<bool> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM planning_kv WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }

    async fn keys(&self, prefix: &str) -> DomainResult<Vec<String>> {
        let conn = self.conn.lock().await;
        Ok(keys_with_prefix(&conn, prefix)?)
    }
}
