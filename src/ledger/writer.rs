//! Ordered message appends
//!
//! Each room gets one writer task that applies appends strictly in
//! submission order. The registry submits while it records room history,
//! so a room's ledger rows commit in the same order as its history.

use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::Ledger;
use crate::error::LedgerError;

/// Capacity of each room's append queue
const APPEND_QUEUE_SIZE: usize = 256;

/// A message waiting to be appended, with its commit outcome channel
#[derive(Debug)]
pub struct PendingAppend {
    pub sender: String,
    pub content: String,
    pub done: oneshot::Sender<Result<(), LedgerError>>,
}

impl PendingAppend {
    /// Report an outcome without touching the ledger
    pub fn fail(self, error: LedgerError) {
        let _ = self.done.send(Err(error));
    }
}

/// Handle to a room's writer task
///
/// Dropping the handle lets the task finish what is queued and exit.
#[derive(Debug, Clone)]
pub struct RoomWriter {
    room_id: i64,
    sender: mpsc::Sender<PendingAppend>,
}

impl RoomWriter {
    pub fn spawn(ledger: Arc<dyn Ledger>, room_id: i64) -> Self {
        let (sender, receiver) = mpsc::channel(APPEND_QUEUE_SIZE);
        tokio::spawn(run(ledger, room_id, receiver));
        Self { room_id, sender }
    }

    /// Queue an append without waiting
    ///
    /// A full or stopped queue fails the append at once.
    pub fn submit(&self, append: PendingAppend) {
        match self.sender.try_send(append) {
            Ok(()) => {}
            Err(TrySendError::Full(append)) => {
                warn!("Append queue for room {} is full", self.room_id);
                append.fail(LedgerError::Unavailable("append queue full".to_string()));
            }
            Err(TrySendError::Closed(append)) => {
                append.fail(LedgerError::Unavailable("append writer stopped".to_string()));
            }
        }
    }
}

async fn run(ledger: Arc<dyn Ledger>, room_id: i64, mut receiver: mpsc::Receiver<PendingAppend>) {
    debug!("Append writer for room {} started", room_id);

    while let Some(append) = receiver.recv().await {
        let result = ledger
            .append_message(room_id, &append.sender, &append.content)
            .await;
        if let Err(e) = &result {
            warn!("Append to room {} failed: {}", room_id, e);
        }
        let _ = append.done.send(result);
    }

    debug!("Append writer for room {} stopped", room_id);
}
