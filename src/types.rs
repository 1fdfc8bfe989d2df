//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers and aliases shared across modules:
//! - `SessionId`: UUID-based unique session identifier
//! - `Frame`: one serialized outbound wire message

use std::sync::Arc;

use uuid::Uuid;

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe session identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A serialized outbound message.
///
/// Serialized once and shared between room history and every recipient queue,
/// so all members observe byte-identical frames.
pub type Frame = Arc<str>;

/// Generate an opaque unique message id
pub fn message_id() -> String {
    Uuid::new_v4().to_string()
}
