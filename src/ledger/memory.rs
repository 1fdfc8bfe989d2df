//! In-memory ledger.
//!
//! Keeps rooms and messages for the lifetime of the process. Room names are
//! unique, ids are assigned sequentially starting at 1.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;

use super::{Ledger, RoomRecord, StoredMessage};
use crate::error::LedgerError;

#[derive(Debug, Default)]
struct Tables {
    rooms: HashMap<String, RoomRecord>,
    messages: Vec<(i64, StoredMessage)>,
    next_room_id: i64,
}

#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted rooms
    pub fn room_count(&self) -> usize {
        self.tables.lock().rooms.len()
    }

    /// All messages of a room, oldest first
    pub fn messages(&self, room_id: i64) -> Vec<StoredMessage> {
        self.tables
            .lock()
            .messages
            .iter()
            .filter(|(id, _)| *id == room_id)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn find_room(&self, name: &str) -> Result<Option<RoomRecord>, LedgerError> {
        Ok(self.tables.lock().rooms.get(name).cloned())
    }

    async fn create_room(&self, name: &str) -> Result<RoomRecord, LedgerError> {
        let mut tables = self.tables.lock();
        if tables.rooms.contains_key(name) {
            return Err(LedgerError::Conflict(name.to_string()));
        }
        tables.next_room_id += 1;
        let record = RoomRecord {
            id: tables.next_room_id,
            name: name.to_string(),
        };
        tables.rooms.insert(name.to_string(), record.clone());
        Ok(record)
    }

    async fn append_message(
        &self,
        room_id: i64,
        sender: &str,
        content: &str,
    ) -> Result<(), LedgerError> {
        let mut tables = self.tables.lock();
        if !tables.rooms.values().any(|r| r.id == room_id) {
            return Err(LedgerError::Unavailable(format!("no room with id {room_id}")));
        }
        tables.messages.push((
            room_id,
            StoredMessage {
                sender: sender.to_string(),
                content: content.to_string(),
                created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            },
        ));
        Ok(())
    }

    async fn recent_messages(
        &self,
        room_id: i64,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, LedgerError> {
        let mut messages = self.messages(room_id);
        if limit > 0 && messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }
}
