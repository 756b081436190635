//! Basic type definitions for the chat server
//!
//! Provides newtype wrappers for type safety:
//! - `ClientId`: UUID-based unique identifier for a connection
//! - `PasswordHash`: client-computed room password hash

use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Unique client identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe client identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Room password hash as sent by the creating client
///
/// The server never sees the password itself. An empty hash is the
/// "no password" sentinel.
#[derive(Clone, Default)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    /// Whether the room requires a password
    pub fn is_set(&self) -> bool {
        !self.0.is_empty()
    }

    /// Constant-time comparison against a hash offered by a joining client
    pub fn matches(&self, offered: &str) -> bool {
        self.0.as_bytes().ct_eq(offered.as_bytes()).into()
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_set() {
            f.write_str("PasswordHash([REDACTED])")
        } else {
            f.write_str("PasswordHash(<none>)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_unique() {
        let id1 = ClientId::new();
        let id2 = ClientId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_empty_hash_means_no_password() {
        assert!(!PasswordHash::new(String::new()).is_set());
        assert!(PasswordHash::new("5e884898".to_string()).is_set());
    }

    #[test]
    fn test_hash_matches_exactly() {
        let hash = PasswordHash::new("5e884898".to_string());
        assert!(hash.matches("5e884898"));
        assert!(!hash.matches("5e88489"));
        assert!(!hash.matches("5e8848980"));
        assert!(!hash.matches("5E884898"));
        assert!(!hash.matches(""));
    }

    #[test]
    fn test_debug_redacts_hash() {
        let hash = PasswordHash::new("5e884898".to_string());
        assert!(!format!("{:?}", hash).contains("5e884898"));
    }
}
