//! Multi-room WebSocket Chat Server Library
//!
//! Live-session core of a room-based chat service built with
//! tokio-tungstenite, using the Actor pattern for shared state.
//!
//! # Features
//! - Token or handle authentication at connect time
//! - Named rooms, created on first join and recorded in a ledger
//! - Room broadcast with bounded in-memory history and join-time replay
//! - Direct messages, typing indicators, `/help` `/users` `/join` commands
//! - Persistence of room messages in history order (in-memory or SQLite)
//! - Disconnect of slow consumers instead of blocking fan-out
//!
//! # Architecture
//! Uses the Actor pattern with `mpsc` channels:
//! - `Registry` is the central actor owning sessions and rooms
//! - Each connection runs a `handler` with a reader task driving a `Router`
//!   and a writer task draining the session's bounded outbound queue
//! - No locks needed for live state - all access goes through message passing
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use roomchat::{serve, AppState, HandleValidator, MemoryLedger, Registry, RegistrySettings};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let ledger = Arc::new(MemoryLedger::new());
//!     let registry = Registry::spawn(RegistrySettings::default(), ledger);
//!
//!     serve(listener, AppState {
//!         registry,
//!         auth: Arc::new(HandleValidator),
//!         outbound_queue: 256,
//!         default_room: None,
//!     })
//!     .await;
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handler;
pub mod ledger;
pub mod message;
pub mod registry;
pub mod room;
pub mod router;
pub mod session;
pub mod types;

// Re-export main types for convenience
pub use auth::{Authenticator, HandleValidator, TokenTable};
pub use config::{Config, ConfigError, IdentityMode};
pub use error::{AppError, AuthError, LedgerError, RegistryError, SendError};
pub use handler::{handle_connection, serve, serve_with_shutdown, AppState};
pub use ledger::{Ledger, MemoryLedger, RoomWriter, SqliteLedger};
pub use message::{parse_message, Inbound, MessageType, RoomRef, WireMessage};
pub use registry::{Registry, RegistryCommand, RegistryHandle, RegistrySettings};
pub use room::Room;
pub use router::Router;
pub use session::Session;
pub use types::{Frame, SessionId};
