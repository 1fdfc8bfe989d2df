//! SQLite ledger.
//!
//! Stores rooms and messages with SQLx. The schema is created on connect;
//! room names carry a UNIQUE constraint so concurrent creation yields one row.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{info, warn};

use super::{Ledger, RoomRecord, StoredMessage};
use crate::error::LedgerError;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id INTEGER NOT NULL,
        sender TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (room_id) REFERENCES rooms (id)
    )
    "#,
];

/// Ledger backed by a SQLite connection pool
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Connection acquire timeout
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open (creating if missing) a database file and ensure the schema.
    pub async fn connect(path: &str) -> Result<Self, LedgerError> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %parent.display(), error = %e, "Failed to create database directory");
                }
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .connect_with(options)
            .await?;

        info!(path = %path, "Ledger database connected");
        Self::with_pool(pool).await
    }

    /// Private in-memory database, kept alive on a single connection.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, LedgerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn find_room(&self, name: &str) -> Result<Option<RoomRecord>, LedgerError> {
        let row = sqlx::query_as::<_, (i64, String)>("SELECT id, name FROM rooms WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(id, name)| RoomRecord { id, name }))
    }

    async fn create_room(&self, name: &str) -> Result<RoomRecord, LedgerError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let result = sqlx::query("INSERT INTO rooms (name, created_at) VALUES (?, ?)")
            .bind(name)
            .bind(now)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => Ok(RoomRecord {
                id: done.last_insert_rowid(),
                name: name.to_string(),
            }),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::Conflict(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn append_message(
        &self,
        room_id: i64,
        sender: &str,
        content: &str,
    ) -> Result<(), LedgerError> {
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        sqlx::query(
            r#"
            INSERT INTO messages (room_id, sender, content, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(room_id)
        .bind(sender)
        .bind(content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_messages(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, LedgerError> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit = if limit == 0 { -1 } else { limit as i64 };
        let rows = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT sender, content, created_at
            FROM messages
            WHERE room_id = ?
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(room_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .rev()
            .map(|(sender, content, created_at)| StoredMessage {
                sender,
                content,
                created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::find_or_create_room;

    #[tokio::test]
    async fn test_create_and_find_room() {
        let ledger = SqliteLedger::in_memory().await.unwrap();

        let created = ledger.create_room("general").await.unwrap();
        let found = ledger.find_room("general").await.unwrap();
        assert_eq!(found, Some(created));
        assert_eq!(ledger.find_room("random").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_room_is_conflict() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.create_room("general").await.unwrap();

        let err = ledger.create_room("general").await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));

        let record = find_or_create_room(&ledger, "general").await.unwrap();
        assert_eq!(record.name, "general");
    }

    #[tokio::test]
    async fn test_recent_messages_oldest_first() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let room = ledger.create_room("general").await.unwrap();

        for content in ["one", "two", "three"] {
            ledger.append_message(room.id, "alice", content).await.unwrap();
        }

        let recent = ledger.recent_messages(room.id, 2).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
        assert_eq!(ledger.recent_messages(room.id, 0).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_connect_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("nested").join("chat.db");

        let ledger = SqliteLedger::connect(path.to_str().unwrap()).await.unwrap();
        ledger.create_room("general").await.unwrap();

        assert!(path.exists());
    }
}
