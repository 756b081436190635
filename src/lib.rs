//! Multi-room Chat Server Library
//!
//! A tokio chat server where every connection is onboarded through an
//! encrypted handshake before it joins a named room.
//!
//! # Features
//! - X25519 key exchange, every later message sealed to its recipient
//! - Popular-rooms advert ranked by population
//! - Room selection or creation, with optional password hash
//! - Unlimited password retries with constant-time comparison
//! - Bounded rooms (251 members by default)
//! - Raw TCP (length-prefixed) or WebSocket transport
//!
//! # Architecture
//! - `Server` accepts connections and spawns one `handle_connection` task
//!   per connection, bounded by a handshake semaphore
//! - `RoomRegistry` is the shared directory of rooms; creation is an
//!   atomic check-and-insert
//! - Each `Room` runs a session actor, started by its first member, that
//!   relays messages between members and unregisters the room when it
//!   empties
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use chatroom_server::{Config, SealedBoxProvider, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let crypto = Arc::new(SealedBoxProvider::generate());
//!     Server::new(Config::default(), crypto).run().await.unwrap();
//! }
//! ```

pub mod config;
pub mod connection;
pub mod crypto;
pub mod error;
pub mod handler;
pub mod message;
pub mod registry;
pub mod room;
pub mod server;
pub mod types;

// Re-export main types for convenience
pub use config::{Config, ConfigError, Transport};
pub use connection::Connection;
pub use crypto::{CryptoError, CryptoProvider, PublicKey, SealedBoxProvider};
pub use error::AppError;
pub use handler::{handle_connection, ServerContext};
pub use message::Reply;
pub use registry::RoomRegistry;
pub use room::Room;
pub use server::Server;
pub use types::{ClientId, PasswordHash};
