//! Message protocol definitions
//!
//! One JSON object per WebSocket text frame. Inbound frames are classified
//! by [`parse_message`] into an [`Inbound`] value; outbound frames are built
//! as [`WireMessage`] and serialized once into a [`Frame`].

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{message_id, Frame};

/// Sender name used on server-originated messages
pub const SYSTEM_SENDER: &str = "system";

pub const INVALID_FORMAT: &str = "Invalid message format. Ensure your message is valid JSON.";
pub const INVALID_DM: &str = "Invalid DM format.";
pub const INVALID_ROOM: &str =
    "Invalid room format. Use: {\"type\": \"command\", \"content\": \"join\", \"room\": \"roomName\"}";
pub const UNKNOWN_COMMAND: &str = "Unknown command.";
pub const EMPTY_CHAT: &str = "Chat message cannot be empty.";
pub const UNKNOWN_TYPE: &str = "Unknown message type.";

/// Reply to the help command
pub const HELP_TEXT: &str = "Available commands:\n\
    /join <room> - Join or create a room\n\
    /dm <user> <message> - Send a direct message\n\
    /users - List connected users\n\
    /help - Show this help";

/// Top-level message kind (`type` field on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Regular,
    Direct,
    Invalid,
    Command,
    System,
    Typing,
    /// Missing or unrecognized `type` on an inbound frame
    #[default]
    #[serde(other)]
    Unknown,
}

/// Room reference carried on the wire
///
/// Accepts either `{"id": 1, "name": "general"}` or a bare `"general"`
/// on input; always serializes as the object form.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RoomRepr")]
pub struct RoomRef {
    pub id: i64,
    pub name: String,
}

impl RoomRef {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RoomRepr {
    Name(String),
    Full {
        #[serde(default)]
        id: i64,
        #[serde(default)]
        name: String,
    },
}

impl From<RoomRepr> for RoomRef {
    fn from(repr: RoomRepr) -> Self {
        match repr {
            RoomRepr::Name(name) => RoomRef { id: 0, name },
            RoomRepr::Full { id, name } => RoomRef { id, name },
        }
    }
}

/// A single wire message, both directions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub sender: String,
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// RFC3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Sub-command discriminator (1 = help, 2 = users, 3 = join)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<u8>,
}

impl WireMessage {
    /// Build an outbound message with a fresh id and the current timestamp
    pub fn outbound(
        kind: MessageType,
        content: impl Into<String>,
        sender: impl Into<String>,
        room: Option<RoomRef>,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            sender: sender.into(),
            id: message_id(),
            room,
            target: None,
            timestamp: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            command: None,
        }
    }

    /// Server-originated notice
    pub fn system(content: impl Into<String>, room: Option<RoomRef>) -> Self {
        Self::outbound(MessageType::System, content, SYSTEM_SENDER, room)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Serialize into a frame shared by history and all recipients
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        Ok(serde_json::to_string(self)?.into())
    }
}

/// Command sub-kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Users,
    Join { room: String },
}

/// A classified inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Posted to the sender's current room, whatever `room` the frame names
    Regular {
        content: String,
    },
    Direct {
        target: String,
        content: String,
    },
    Command(Command),
    Typing {
        content: String,
    },
    /// Malformed or semantically invalid; `reason` is echoed to the client
    Invalid {
        reason: String,
    },
}

impl Inbound {
    fn invalid(reason: &str) -> Self {
        Inbound::Invalid {
            reason: reason.to_string(),
        }
    }

    /// The message kind this value was classified as
    pub fn kind(&self) -> MessageType {
        match self {
            Inbound::Regular { .. } => MessageType::Regular,
            Inbound::Direct { .. } => MessageType::Direct,
            Inbound::Command(_) => MessageType::Command,
            Inbound::Typing { .. } => MessageType::Typing,
            Inbound::Invalid { .. } => MessageType::Invalid,
        }
    }
}

/// Parse and classify a raw inbound frame
///
/// Pure: the same input always yields the same classification.
pub fn parse_message(raw: &str) -> Inbound {
    let message: WireMessage = match serde_json::from_str(raw) {
        Ok(message) => message,
        Err(_) => return Inbound::invalid(INVALID_FORMAT),
    };

    match message.kind {
        MessageType::Regular => {
            if message.content.is_empty() {
                return Inbound::invalid(EMPTY_CHAT);
            }
            Inbound::Regular {
                content: message.content,
            }
        }
        MessageType::Direct => match message.target {
            Some(target) if !target.is_empty() && !message.content.is_empty() => Inbound::Direct {
                target,
                content: message.content,
            },
            _ => Inbound::invalid(INVALID_DM),
        },
        MessageType::Command => parse_command(message),
        MessageType::Typing => Inbound::Typing {
            content: message.content,
        },
        // Server-only kinds are not accepted from clients
        MessageType::System | MessageType::Invalid | MessageType::Unknown => {
            Inbound::invalid(UNKNOWN_TYPE)
        }
    }
}

fn parse_command(message: WireMessage) -> Inbound {
    let name = match (message.content.as_str(), message.command) {
        ("", Some(1)) => "help",
        ("", Some(2)) => "users",
        ("", Some(3)) => "join",
        (name, _) => name,
    };

    match name {
        "help" => Inbound::Command(Command::Help),
        "users" => Inbound::Command(Command::Users),
        "join" => match message.room {
            Some(room) if !room.name.is_empty() => {
                Inbound::Command(Command::Join { room: room.name })
            }
            _ => Inbound::invalid(INVALID_ROOM),
        },
        _ => Inbound::invalid(UNKNOWN_COMMAND),
    }
}

/// Interpret a typing frame's content as a typing flag
pub fn typing_flag(content: &str) -> bool {
    matches!(
        content.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "start" | "typing" | "is typing..."
    )
}
