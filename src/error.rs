//! Error types for the chat server
//!
//! Defines connection-level errors, registry errors, collaborator errors
//! (authentication and ledger) and per-recipient delivery errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Connection-level errors
///
/// Any of these ends the connection that produced it. None of them
/// terminates the server process.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Credential rejected before the session became active
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// Registry failure the connection cannot recover from
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Registry operation errors
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Handle mode: another live session already holds this identity
    #[error("Handle '{0}' is already taken.")]
    IdentityTaken(String),

    /// The session is not (or no longer) registered
    #[error("Unknown session")]
    UnknownSession,

    /// Room lookup or creation in the ledger failed
    #[error("{0}")]
    Directory(#[from] LedgerError),

    /// The registry task has shut down
    #[error("Registry closed")]
    Closed,
}

/// Credential verification errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token supplied with the connection
    #[error("missing token")]
    MissingToken,

    /// Token not recognized
    #[error("invalid token")]
    InvalidToken,

    /// Self-declared handle failed validation
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
}

/// Durable ledger errors
///
/// Covers both directory failures (room lookup/creation) and persistence
/// failures (message append).
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A room with this name already exists (lost a creation race)
    #[error("room already exists: {0}")]
    Conflict(String),

    /// Ledger could not be reached
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// SQLite backend error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Message send errors
///
/// Occurs when a frame cannot be queued for a recipient.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,

    /// The recipient's outbound queue is full (slow consumer)
    #[error("Outbound queue full")]
    QueueFull,
}
