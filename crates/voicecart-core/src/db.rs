// SQLite persistence layer: the live list mirror and the add-history log.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};

use crate::shopping::{HistoryRecord, ListEntry};
use crate::store::{HistoryMirror, RemoteListStore};

/// SQLite-backed document store standing in for the hosted mirror.
///
/// Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database (useful
    /// for tests).
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS live_list (
                key         TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                quantity    INTEGER NOT NULL,
                category    TEXT NOT NULL,
                brand       TEXT NOT NULL,
                size        TEXT NOT NULL,
                total_price REAL NOT NULL,
                updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS shopping_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                name        TEXT NOT NULL,
                quantity    INTEGER NOT NULL,
                category    TEXT NOT NULL,
                total_price REAL NOT NULL,
                brand       TEXT NOT NULL,
                size        TEXT NOT NULL,
                timestamp   TEXT NOT NULL
            );
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock). This should never happen in normal operation.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ------------------------------------------------------------------
    // Live list
    // ------------------------------------------------------------------

    /// Insert or overwrite the entry stored under `key`. An overwrite keeps
    /// the row's original position so `load_entries` preserves list order.
    pub fn upsert_entry(&self, key: &str, entry: &ListEntry) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO live_list (key, name, quantity, category, brand, size, total_price)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(key) DO UPDATE SET
                name = excluded.name,
                quantity = excluded.quantity,
                category = excluded.category,
                brand = excluded.brand,
                size = excluded.size,
                total_price = excluded.total_price,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
            params![
                key,
                entry.name,
                entry.quantity,
                entry.category,
                entry.brand,
                entry.size,
                entry.total_price,
            ],
        )
        .with_context(|| format!("failed to upsert list entry '{key}'"))?;
        Ok(())
    }

    /// Delete the entry stored under `key`. Deleting a missing key is a no-op.
    pub fn delete_entry(&self, key: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute("DELETE FROM live_list WHERE key = ?1", params![key])
            .with_context(|| format!("failed to delete list entry '{key}'"))?;
        Ok(())
    }

    /// Load every list entry in insertion order.
    pub fn load_entries(&self) -> Result<Vec<ListEntry>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT name, quantity, category, brand, size, total_price
                 FROM live_list ORDER BY rowid",
            )
            .context("failed to prepare load_entries query")?;

        let entries = stmt
            .query_map([], |row| {
                Ok(ListEntry {
                    name: row.get(0)?,
                    quantity: row.get(1)?,
                    category: row.get(2)?,
                    brand: row.get(3)?,
                    size: row.get(4)?,
                    total_price: row.get(5)?,
                })
            })
            .context("failed to query list entries")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map list entry rows")?;

        Ok(entries)
    }

    // ------------------------------------------------------------------
    // History
    // ------------------------------------------------------------------

    pub fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO shopping_history
                (name, quantity, category, total_price, brand, size, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.name,
                record.quantity,
                record.category,
                record.total_price,
                record.brand,
                record.size,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )
        .context("failed to append history record")?;
        Ok(())
    }

    /// Load the full add-history, oldest first.
    pub fn load_history(&self) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(
                "SELECT name, quantity, category, total_price, brand, size, timestamp
                 FROM shopping_history ORDER BY id",
            )
            .context("failed to prepare load_history query")?;

        let records = stmt
            .query_map([], |row| {
                let timestamp: String = row.get(6)?;
                let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            6,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?;
                Ok(HistoryRecord {
                    name: row.get(0)?,
                    quantity: row.get(1)?,
                    category: row.get(2)?,
                    total_price: row.get(3)?,
                    brand: row.get(4)?,
                    size: row.get(5)?,
                    timestamp,
                })
            })
            .context("failed to query history")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("failed to map history rows")?;

        Ok(records)
    }
}

impl Database {
    /// Run `f` against a clone of this handle on the blocking thread pool.
    async fn off_thread<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("database task failed")?
    }
}

#[async_trait]
impl RemoteListStore for Database {
    async fn set(&self, key: &str, entry: &ListEntry) -> Result<()> {
        let (key, entry) = (key.to_string(), entry.clone());
        self.off_thread(move |db| db.upsert_entry(&key, &entry)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.off_thread(move |db| db.delete_entry(&key)).await
    }

    async fn list_all(&self) -> Result<Vec<ListEntry>> {
        self.off_thread(Database::load_entries).await
    }
}

#[async_trait]
impl HistoryMirror for Database {
    async fn append(&self, record: &HistoryRecord) -> Result<()> {
        let record = record.clone();
        self.off_thread(move |db| db.append_history(&record)).await
    }

    async fn list_all(&self) -> Result<Vec<HistoryRecord>> {
        self.off_thread(Database::load_history).await
    }
}
