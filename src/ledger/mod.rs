//! Durable room and message ledger
//!
//! The live-session core only needs room lookup/creation and message
//! append; the store behind it is pluggable:
//! - [`memory`]: process-local, used by default and in tests
//! - [`sqlite`]: SQLite via SQLx
//!
//! Message appends for a room go through that room's [`RoomWriter`].

use async_trait::async_trait;

use crate::error::LedgerError;

pub mod memory;
pub mod sqlite;
pub mod writer;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use writer::{PendingAppend, RoomWriter};

/// A persisted room row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomRecord {
    pub id: i64,
    pub name: String,
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: String,
    pub content: String,
    /// RFC3339
    pub created_at: String,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Look up a room by its unique name.
    async fn find_room(&self, name: &str) -> Result<Option<RoomRecord>, LedgerError>;

    /// Create a room. Fails with [`LedgerError::Conflict`] if the name exists.
    async fn create_room(&self, name: &str) -> Result<RoomRecord, LedgerError>;

    /// Append a chat message to a room.
    async fn append_message(
        &self,
        room_id: i64,
        sender: &str,
        content: &str,
    ) -> Result<(), LedgerError>;

    /// Most recent messages of a room, oldest first.
    async fn recent_messages(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, LedgerError>;
}

/// Find a room, creating it if absent
///
/// A concurrent creator winning the race surfaces as a conflict, which is
/// resolved by reading the row it created. Exactly one row exists per name.
pub async fn find_or_create_room(
    ledger: &dyn Ledger,
    name: &str,
) -> Result<RoomRecord, LedgerError> {
    if let Some(record) = ledger.find_room(name).await? {
        return Ok(record);
    }

    match ledger.create_room(name).await {
        Ok(record) => Ok(record),
        Err(LedgerError::Conflict(_)) => ledger
            .find_room(name)
            .await?
            .ok_or_else(|| LedgerError::Unavailable(format!("room {name} vanished after conflict"))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let ledger = MemoryLedger::new();

        let first = find_or_create_room(&ledger, "general").await.unwrap();
        let second = find_or_create_room(&ledger, "general").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.room_count(), 1);
    }

    #[tokio::test]
    async fn test_find_or_create_resolves_conflict() {
        let ledger = MemoryLedger::new();
        let existing = ledger.create_room("general").await.unwrap();

        // Second direct create loses the race
        assert!(matches!(
            ledger.create_room("general").await,
            Err(LedgerError::Conflict(_))
        ));
        let record = find_or_create_room(&ledger, "general").await.unwrap();
        assert_eq!(record, existing);
    }
}
