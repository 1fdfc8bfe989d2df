//! Session struct definition
//!
//! Represents one connected participant: identity, room membership,
//! typing status and the outbound queue to its connection's writer task.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify};
use tracing::warn;

use crate::error::SendError;
use crate::types::{Frame, SessionId};

/// Live session state
///
/// Owned by the registry. The room is referenced by name and resolved
/// through the registry, never held directly.
#[derive(Debug)]
pub struct Session {
    /// Unique identifier for this session
    pub id: SessionId,
    /// Authenticated principal or self-declared handle
    pub identity: String,
    /// Name of the room this session is in, if any
    pub room: Option<String>,
    /// Currently typing flag
    pub is_typing: bool,
    /// When the typing flag last changed
    pub last_typing_at: Option<DateTime<Utc>>,
    /// Registration order, assigned by the registry
    pub(crate) seq: u64,
    /// Registry → connection frame queue (bounded)
    sender: mpsc::Sender<Frame>,
    /// Signalled when the connection should be dropped
    disconnect: Arc<Notify>,
}

impl Session {
    /// Create a new session with the given identity and outbound queue
    pub fn new(
        id: SessionId,
        identity: String,
        sender: mpsc::Sender<Frame>,
        disconnect: Arc<Notify>,
    ) -> Self {
        Self {
            id,
            identity,
            room: None,
            is_typing: false,
            last_typing_at: None,
            seq: 0,
            sender,
            disconnect,
        }
    }

    /// Queue a frame without waiting
    ///
    /// A full queue means the consumer cannot keep up: the connection is
    /// asked to disconnect and the frame is dropped.
    pub fn deliver(&self, frame: &Frame) -> Result<(), SendError> {
        match self.sender.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session = %self.id, identity = %self.identity, "Outbound queue full, disconnecting slow consumer");
                self.disconnect.notify_one();
                Err(SendError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SendError::ChannelClosed),
        }
    }

    /// Queue a frame only if there is room, without penalizing the consumer
    pub fn offer(&self, frame: &Frame) -> Result<(), SendError> {
        self.sender.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// Ask the connection to close; queued frames are still flushed
    pub fn close(&self) {
        self.disconnect.notify_one();
    }

    /// Set typing status
    ///
    /// Returns false (and changes nothing) if the status is unchanged.
    pub fn set_typing(&mut self, is_typing: bool) -> bool {
        if self.is_typing == is_typing {
            return false;
        }
        self.is_typing = is_typing;
        self.last_typing_at = Some(Utc::now());
        true
    }
}
