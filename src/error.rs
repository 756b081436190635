//! Error types for the chat server
//!
//! Defines application-level errors raised while onboarding a connection
//! and while running a room session. Uses thiserror for ergonomic error
//! definitions.

use thiserror::Error;

use crate::crypto::CryptoError;

/// Application-level errors
///
/// Transport, protocol and crypto errors are fatal for the connection they
/// occur on. Room errors describe why a handoff did not happen.
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// IO error (fatal)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame payload was not valid UTF-8 (fatal)
    #[error("Invalid UTF-8 in frame: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Key parsing, encryption or decryption failed (fatal)
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Peer closed the connection mid-protocol
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Onboarding did not finish within the handshake deadline
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// A room name or username exceeded its byte limit (fatal)
    #[error("{field} is {len} bytes, limit is {limit}")]
    NameTooLong {
        field: &'static str,
        len: usize,
        limit: usize,
    },

    /// Another connection created a room with this name first
    #[error("Room already exists: {0}")]
    RoomExists(String),

    /// Room is at capacity
    #[error("Room is full")]
    RoomFull,

    /// Room was emptied and removed from the registry before the join
    #[error("Room is closed: {0}")]
    RoomClosed(String),
}

impl AppError {
    /// Whether the error ends the connection without being a server fault
    ///
    /// Capacity and closed-room refusals drop the client silently.
    pub fn is_refusal(&self) -> bool {
        matches!(self, AppError::RoomFull | AppError::RoomClosed(_))
    }
}
