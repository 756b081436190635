//! Server configuration
//!
//! Loaded from environment variables, with defaults for everything.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Default bind address
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3301";

/// Default maximum members per room
pub const DEFAULT_ROOM_CAPACITY: usize = 251;

/// Largest room capacity whose listings still fit in one frame
pub const MAX_ROOM_CAPACITY: usize = 750;

/// Default number of rooms in the popular-rooms advert
pub const DEFAULT_POPULAR_ROOMS: usize = 10;

/// Default number of connections allowed in onboarding at once
pub const DEFAULT_MAX_HANDSHAKES: usize = 1024;

/// Default deadline for a connection to finish onboarding, in seconds
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// Wire transport for client connections
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Raw TCP, 2-byte length-prefixed messages
    Tcp,
    /// WebSocket, one text frame per message
    WebSocket,
}

impl FromStr for Transport {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Transport::Tcp),
            "websocket" | "ws" => Ok(Transport::WebSocket),
            other => Err(ConfigError::InvalidValue(format!(
                "CHAT_TRANSPORT must be 'tcp' or 'websocket', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Chat server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Listener bind address (default: "0.0.0.0:3301").
    pub bind_address: String,

    /// Client transport (default: tcp).
    pub transport: Transport,

    /// Maximum members per room (default: 251).
    pub room_capacity: usize,

    /// Rooms listed in the popular-rooms advert (default: 10).
    pub popular_rooms: usize,

    /// Connections allowed in onboarding at once (default: 1024).
    /// Connections beyond this are closed on accept.
    pub max_handshakes: usize,

    /// Deadline for one connection's onboarding (default: 60s).
    pub handshake_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            transport: Transport::Tcp,
            room_capacity: DEFAULT_ROOM_CAPACITY,
            popular_rooms: DEFAULT_POPULAR_ROOMS,
            max_handshakes: DEFAULT_MAX_HANDSHAKES,
            handshake_timeout: Duration::from_secs(DEFAULT_HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("CHAT_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let transport = match vars.get("CHAT_TRANSPORT") {
            Some(value) => value.parse()?,
            None => Transport::Tcp,
        };

        let room_capacity = parse_count(vars, "CHAT_ROOM_CAPACITY", DEFAULT_ROOM_CAPACITY)?;
        let popular_rooms = parse_count(vars, "CHAT_POPULAR_ROOMS", DEFAULT_POPULAR_ROOMS)?;
        let max_handshakes = parse_count(vars, "CHAT_MAX_HANDSHAKES", DEFAULT_MAX_HANDSHAKES)?;
        let timeout_secs = parse_count(
            vars,
            "CHAT_HANDSHAKE_TIMEOUT_SECS",
            DEFAULT_HANDSHAKE_TIMEOUT_SECS as usize,
        )?;

        if room_capacity > MAX_ROOM_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_ROOM_CAPACITY must be at most {}, got {}",
                MAX_ROOM_CAPACITY, room_capacity
            )));
        }

        Ok(Self {
            bind_address,
            transport,
            room_capacity,
            popular_rooms,
            max_handshakes,
            handshake_timeout: Duration::from_secs(timeout_secs as u64),
        })
    }
}

/// Parse a positive count, falling back to `default` when unset
fn parse_count(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(value) = vars.get(key) else {
        return Ok(default);
    };
    match value.parse::<usize>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(ConfigError::InvalidValue(format!(
            "{} must be a positive integer, got '{}'",
            key, value
        ))),
    }
}
