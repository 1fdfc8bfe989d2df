//! Room struct definition
//!
//! Represents a named chat room: its member sessions and an in-memory
//! mirror of recent message history.

use std::collections::{HashSet, VecDeque};

use crate::message::RoomRef;
use crate::types::{Frame, SessionId};

/// Multi-member chat room
///
/// The in-memory room is a cache of the durable room row. Its persisted id
/// is unknown (0) until the first successful join syncs it.
#[derive(Debug)]
pub struct Room {
    /// Unique room name
    pub name: String,
    /// Persisted id from the ledger (0 until synced)
    pub id: i64,
    /// Member sessions
    members: HashSet<SessionId>,
    /// Serialized frames in delivery order
    history: VecDeque<Frame>,
    /// Maximum history entries kept (0 = unbounded)
    history_limit: usize,
}

impl Room {
    /// Create an empty, not yet synced room
    pub fn new(name: impl Into<String>, history_limit: usize) -> Self {
        Self {
            name: name.into(),
            id: 0,
            members: HashSet::new(),
            history: VecDeque::new(),
            history_limit,
        }
    }

    /// Whether the persisted id has been recorded
    pub fn is_synced(&self) -> bool {
        self.id != 0
    }

    /// Record the persisted id and seed history on first sync
    ///
    /// Returns false if an id was already recorded; it is never changed.
    pub fn sync(&mut self, id: i64, seed: Vec<Frame>) -> bool {
        if self.is_synced() {
            return false;
        }
        self.id = id;
        if self.history.is_empty() {
            for frame in seed {
                self.push_history(frame);
            }
        }
        true
    }

    pub fn to_ref(&self) -> RoomRef {
        RoomRef::new(self.id, self.name.clone())
    }

    /// Add a member; returns false if already present
    pub fn add_member(&mut self, session_id: SessionId) -> bool {
        self.members.insert(session_id)
    }

    /// Remove a member; returns false if not present
    pub fn remove_member(&mut self, session_id: SessionId) -> bool {
        self.members.remove(&session_id)
    }

    pub fn members(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.members.iter().copied()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Append a frame, dropping the oldest entry when over the limit
    pub fn push_history(&mut self, frame: Frame) {
        self.history.push_back(frame);
        if self.history_limit > 0 {
            while self.history.len() > self.history_limit {
                self.history.pop_front();
            }
        }
    }

    pub fn history(&self) -> impl Iterator<Item = &Frame> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_creation() {
        let room = Room::new("general", 10);

        assert_eq!(room.name, "general");
        assert!(!room.is_synced());
        assert_eq!(room.member_count(), 0);
        assert_eq!(room.history_len(), 0);
    }

    #[test]
    fn test_room_membership() {
        let alice = SessionId::new();
        let bob = SessionId::new();
        let mut room = Room::new("general", 10);

        assert!(room.add_member(alice));
        assert!(!room.add_member(alice));
        room.add_member(bob);

        assert_eq!(room.member_count(), 2);

        assert!(room.remove_member(alice));
        assert!(!room.remove_member(alice));
        assert_eq!(room.members().collect::<Vec<_>>(), vec![bob]);
    }

    #[test]
    fn test_sync_sets_id_once() {
        let mut room = Room::new("general", 10);

        assert!(room.sync(7, vec!["a".into(), "b".into()]));
        assert_eq!(room.id, 7);
        assert_eq!(room.history_len(), 2);

        // Persisted id never changes, seed ignored
        assert!(!room.sync(9, vec!["c".into()]));
        assert_eq!(room.id, 7);
        assert_eq!(room.history_len(), 2);
        assert_eq!(room.to_ref(), RoomRef::new(7, "general"));
    }

    #[test]
    fn test_history_limit_drops_oldest() {
        let mut room = Room::new("general", 2);
        room.push_history("1".into());
        room.push_history("2".into());
        room.push_history("3".into());

        let history: Vec<&str> = room.history().map(|f| &**f).collect();
        assert_eq!(history, vec!["2", "3"]);
    }

    #[test]
    fn test_unbounded_history() {
        let mut room = Room::new("general", 0);
        for i in 0..100 {
            room.push_history(i.to_string().into());
        }
        assert_eq!(room.history_len(), 100);
    }
}
