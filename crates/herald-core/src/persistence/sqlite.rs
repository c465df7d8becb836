// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SQLite-backed keyspace.
//!
//! A keyspace is one SQLite database file holding a single `records` table of
//! label → encoded bytes. It knows nothing about record types; the typed
//! [`Store`](super::Store) sits on top of it.

use std::path::Path;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use tracing::debug;

use crate::error::{Error, Result};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Outcome of a guarded insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was written.
    Inserted,
    /// The keyspace already holds its maximum number of entries.
    Full,
    /// The key is already present.
    Exists,
}

/// A durable label-keyed byte store.
#[derive(Clone)]
pub struct SqliteKeyspace {
    pool: SqlitePool,
}

impl SqliteKeyspace {
    /// Create a keyspace from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a keyspace file and run migrations.
    ///
    /// Parent directories are created as needed. The connection uses WAL
    /// journaling with `synchronous = FULL`, so a committed write survives a
    /// crash.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| Error::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| Error::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {:?}: {}", path, e),
            })?;

        MIGRATOR.run(&pool).await?;
        debug!(path = %path.display(), "Opened keyspace");

        Ok(Self::new(pool))
    }

    /// Open a private in-memory keyspace.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;

        Ok(Self::new(pool))
    }

    /// Number of entries.
    pub async fn len(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    /// All keys in insertion order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let keys = sqlx::query_scalar("SELECT label FROM records ORDER BY rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    /// Fetch the value stored under `key`.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value = sqlx::query_scalar("SELECT data FROM records WHERE label = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    /// Whether `key` is present.
    pub async fn contains(&self, key: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM records WHERE label = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    /// Insert a new entry unless the keyspace is full or the key exists.
    ///
    /// Both checks and the write happen in one transaction.
    pub async fn insert(&self, key: &str, value: &[u8], max_entries: usize) -> Result<InsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records")
            .fetch_one(&mut *tx)
            .await?;
        if count as usize >= max_entries {
            return Ok(InsertOutcome::Full);
        }

        let existing: Option<i64> = sqlx::query_scalar("SELECT 1 FROM records WHERE label = ?")
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        if existing.is_some() {
            return Ok(InsertOutcome::Exists);
        }

        sqlx::query("INSERT INTO records (label, data) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(InsertOutcome::Inserted)
    }

    /// Overwrite an existing entry. Returns `false` if the key is absent.
    pub async fn replace(&self, key: &str, value: &[u8]) -> Result<bool> {
        let result = sqlx::query("UPDATE records SET data = ? WHERE label = ?")
            .bind(value)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete an entry. Returns `false` if the key is absent.
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM records WHERE label = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every entry, returning how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM records")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Checkpoint the WAL into the main file and close the pool.
    pub async fn close(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn keyspace() -> SqliteKeyspace {
        SqliteKeyspace::in_memory()
            .await
            .expect("Failed to create in-memory keyspace")
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let ks = keyspace().await;

        let outcome = ks.insert("run-1", b"payload", 10).await.expect("insert");
        assert_eq!(outcome, InsertOutcome::Inserted);

        assert_eq!(ks.get("run-1").await.unwrap(), Some(b"payload".to_vec()));
        assert!(ks.contains("run-1").await.unwrap());
        assert_eq!(ks.get("run-2").await.unwrap(), None);
        assert!(!ks.contains("run-2").await.unwrap());
    }

    #[tokio::test]
    async fn test_insert_guards() {
        let ks = keyspace().await;

        ks.insert("a", b"1", 2).await.unwrap();
        assert_eq!(ks.insert("a", b"2", 2).await.unwrap(), InsertOutcome::Exists);
        assert_eq!(ks.get("a").await.unwrap(), Some(b"1".to_vec()));

        ks.insert("b", b"1", 2).await.unwrap();
        assert_eq!(ks.insert("c", b"1", 2).await.unwrap(), InsertOutcome::Full);
        assert_eq!(ks.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_keys_in_insertion_order() {
        let ks = keyspace().await;
        for key in ["zeta", "alpha", "mid"] {
            ks.insert(key, b"x", 10).await.unwrap();
        }
        ks.replace("zeta", b"y").await.unwrap();

        assert_eq!(ks.keys().await.unwrap(), ["zeta", "alpha", "mid"]);
    }

    #[tokio::test]
    async fn test_replace_remove_clear() {
        let ks = keyspace().await;

        assert!(!ks.replace("missing", b"x").await.unwrap());
        assert!(!ks.remove("missing").await.unwrap());

        ks.insert("a", b"1", 10).await.unwrap();
        ks.insert("b", b"1", 10).await.unwrap();
        assert!(ks.replace("a", b"2").await.unwrap());
        assert_eq!(ks.get("a").await.unwrap(), Some(b"2".to_vec()));

        assert!(ks.remove("a").await.unwrap());
        assert_eq!(ks.len().await.unwrap(), 1);

        assert_eq!(ks.clear().await.unwrap(), 1);
        assert_eq!(ks.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("runs.db");

        let ks = SqliteKeyspace::open(&path).await.expect("open keyspace");
        ks.insert("run-1", b"x", 10).await.unwrap();
        ks.close().await.unwrap();

        assert!(path.exists());
        let reopened = SqliteKeyspace::open(&path).await.unwrap();
        assert_eq!(reopened.keys().await.unwrap(), ["run-1"]);
    }
}
