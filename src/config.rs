//! Configuration loading
//!
//! TOML file with four sections, every field defaulted:
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1:8080"
//! outbound_queue = 256
//! default_room = "general"
//!
//! [rooms]
//! history_limit = 500
//! replay_history = true
//! departure = "room"        # or "server"
//!
//! [identity]
//! mode = "handle"           # or "authenticated"
//! [identity.tokens]
//! "secret-token" = "alice@example.com"
//!
//! [ledger]
//! backend = "memory"        # or "sqlite"
//! path = "roomchat.db"
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub rooms: RoomsConfig,
    pub identity: IdentityConfig,
    pub ledger: LedgerConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind.trim().is_empty() {
            return Err(ConfigError::Invalid("server.bind is empty".to_string()));
        }
        if self.server.outbound_queue == 0 {
            return Err(ConfigError::Invalid(
                "server.outbound_queue must be at least 1".to_string(),
            ));
        }
        if self.identity.mode == IdentityMode::Authenticated && self.identity.tokens.is_empty() {
            return Err(ConfigError::Invalid(
                "identity.mode = \"authenticated\" requires identity.tokens".to_string(),
            ));
        }
        Ok(())
    }
}

/// Listener and per-connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
    /// Capacity of each session's outbound frame queue
    pub outbound_queue: usize,
    /// Room joined automatically after connecting
    pub default_room: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            outbound_queue: 256,
            default_room: None,
        }
    }
}

/// Room behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    /// Per-room in-memory history cap (0 = unbounded)
    pub history_limit: usize,
    /// Replay room history to a session when it joins
    pub replay_history: bool,
    /// Who hears that a session left
    pub departure: Departure,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            history_limit: 500,
            replay_history: true,
            departure: Departure::Room,
        }
    }
}

/// Scope of the departure notice sent when a session disconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Departure {
    /// Remaining members of the session's room
    #[default]
    Room,
    /// Every live session
    Server,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub mode: IdentityMode,
    /// token → principal, used in authenticated mode
    pub tokens: HashMap<String, String>,
}

/// How identities are established, and whether they must be unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityMode {
    /// Self-declared handles, one live session per handle
    #[default]
    Handle,
    /// Verified principals, several sessions per identity allowed
    Authenticated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    /// SQLite database file
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            path: "roomchat.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    #[default]
    Memory,
    Sqlite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
        assert_eq!(config.server.outbound_queue, 256);
        assert!(config.server.default_room.is_none());
        assert_eq!(config.rooms.history_limit, 500);
        assert!(config.rooms.replay_history);
        assert_eq!(config.rooms.departure, Departure::Room);
        assert_eq!(config.identity.mode, IdentityMode::Handle);
        assert_eq!(config.ledger.backend, LedgerBackend::Memory);
    }

    #[test]
    fn test_full_config() {
        let config = Config::from_toml(
            r#"
            [server]
            bind = "0.0.0.0:9000"
            default_room = "general"

            [rooms]
            history_limit = 0
            departure = "server"

            [identity]
            mode = "authenticated"
            [identity.tokens]
            "t1" = "alice@example.com"

            [ledger]
            backend = "sqlite"
            path = "/tmp/chat.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.default_room.as_deref(), Some("general"));
        assert_eq!(config.rooms.history_limit, 0);
        assert_eq!(config.rooms.departure, Departure::Server);
        assert_eq!(config.identity.mode, IdentityMode::Authenticated);
        assert_eq!(
            config.identity.tokens.get("t1").map(String::as_str),
            Some("alice@example.com")
        );
        assert_eq!(config.ledger.backend, LedgerBackend::Sqlite);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            Config::from_toml("[server]\noutbound_queue = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[identity]\nmode = \"authenticated\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_toml("[ledger]\nbackend = \"postgres\""),
            Err(ConfigError::Parse(_))
        ));
    }
}
