//! Asymmetric encryption for the onboarding channel
//!
//! The server holds one long-lived X25519 keypair for the lifetime of the
//! process. Each message is sealed to its recipient's public key:
//!
//! - a fresh ephemeral X25519 key is generated per message
//! - ECDH(ephemeral, recipient) is expanded with HKDF-SHA256 into a
//!   ChaCha20-Poly1305 key, salted with both public keys
//! - the sealed message is `base64(ephemeral_pub || nonce || ciphertext)`
//!
//! Public keys travel as standard base64 of their 32 raw bytes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, SharedSecret, StaticSecret};
use zeroize::Zeroizing;

/// HKDF info label binding derived keys to this protocol
const KDF_INFO: &[u8] = b"chatroom-server sealed message v1";

/// Length of an X25519 public key and of the derived symmetric key
const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 nonce length
const NONCE_LEN: usize = 12;

/// Poly1305 tag length
const TAG_LEN: usize = 16;

/// Errors raised by key parsing and message sealing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Peer key is not base64 of a 32-byte X25519 key
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Sealed message is not base64 or is too short
    #[error("malformed ciphertext")]
    Malformed,

    /// HKDF expansion failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// AEAD encryption failed
    #[error("encryption failed")]
    Encrypt,

    /// AEAD authentication failed
    #[error("decryption failed")]
    Decrypt,

    /// Decrypted bytes are not UTF-8
    #[error("decrypted text is not valid UTF-8")]
    InvalidUtf8,
}

/// A peer's X25519 public key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey(x25519_dalek::PublicKey);

impl PublicKey {
    /// Parse a key from its base64 wire form
    pub fn from_base64(text: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(text.trim())
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self(x25519_dalek::PublicKey::from(bytes)))
    }

    /// Encode the key in its base64 wire form
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0.as_bytes())
    }
}

/// Asymmetric encryption over the server's keypair
///
/// Implementations are shared read-only by every connection task.
pub trait CryptoProvider: Send + Sync {
    /// The server's public key in wire form
    fn public_key(&self) -> String;

    /// Encrypt `text` so that only the holder of `recipient` can read it
    fn encrypt(&self, text: &str, recipient: &PublicKey) -> Result<String, CryptoError>;

    /// Decrypt a message sealed to the server's own public key
    fn decrypt(&self, sealed: &str) -> Result<String, CryptoError>;

    /// Parse a peer's public key from its wire form
    fn parse_public_key(&self, text: &str) -> Result<PublicKey, CryptoError> {
        PublicKey::from_base64(text)
    }
}

/// X25519 + HKDF-SHA256 + ChaCha20-Poly1305 sealed-box provider
pub struct SealedBoxProvider {
    secret: StaticSecret,
    public: x25519_dalek::PublicKey,
}

impl SealedBoxProvider {
    /// Generate a fresh keypair from the OS random source
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = x25519_dalek::PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The server's public key as a typed value
    pub fn key(&self) -> PublicKey {
        PublicKey(self.public)
    }
}

impl std::fmt::Debug for SealedBoxProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedBoxProvider")
            .field("public", &self.key().to_base64())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl CryptoProvider for SealedBoxProvider {
    fn public_key(&self) -> String {
        self.key().to_base64()
    }

    fn encrypt(&self, text: &str, recipient: &PublicKey) -> Result<String, CryptoError> {
        let ephemeral = EphemeralSecret::random_from_rng(OsRng);
        let ephemeral_public = x25519_dalek::PublicKey::from(&ephemeral);
        let shared = ephemeral.diffie_hellman(&recipient.0);
        let key = derive_key(&shared, &ephemeral_public, &recipient.0)?;

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), text.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(KEY_LEN + NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(ephemeral_public.as_bytes());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let sealed = STANDARD.decode(sealed).map_err(|_| CryptoError::Malformed)?;
        if sealed.len() < KEY_LEN + NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }

        let (ephemeral, rest) = sealed.split_at(KEY_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
        let ephemeral: [u8; KEY_LEN] = ephemeral.try_into().map_err(|_| CryptoError::Malformed)?;
        let ephemeral_public = x25519_dalek::PublicKey::from(ephemeral);

        let shared = self.secret.diffie_hellman(&ephemeral_public);
        if !shared.was_contributory() {
            return Err(CryptoError::Malformed);
        }
        let key = derive_key(&shared, &ephemeral_public, &self.public)?;

        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }
}

/// Expand an ECDH secret into a one-message AEAD key
fn derive_key(
    shared: &SharedSecret,
    ephemeral: &x25519_dalek::PublicKey,
    recipient: &x25519_dalek::PublicKey,
) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mut salt = [0u8; 2 * KEY_LEN];
    salt[..KEY_LEN].copy_from_slice(ephemeral.as_bytes());
    salt[KEY_LEN..].copy_from_slice(recipient.as_bytes());

    let hk = Hkdf::<Sha256>::new(Some(&salt), shared.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(KDF_INFO, &mut key[..])
        .map_err(|_| CryptoError::KeyDerivation)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_key_wire_form() {
        let provider = SealedBoxProvider::generate();
        let parsed = provider.parse_public_key(&provider.public_key()).unwrap();
        assert_eq!(parsed, provider.key());
    }

    #[test]
    fn test_invalid_public_keys_rejected() {
        let provider = SealedBoxProvider::generate();
        assert_eq!(
            provider.parse_public_key("not base64!"),
            Err(CryptoError::InvalidPublicKey)
        );
        // Valid base64, wrong length
        assert_eq!(
            provider.parse_public_key(&STANDARD.encode([7u8; 16])),
            Err(CryptoError::InvalidPublicKey)
        );
    }

    #[test]
    fn test_sealed_to_recipient() {
        let server = SealedBoxProvider::generate();
        let client = SealedBoxProvider::generate();

        let sealed = client.encrypt("lobby", &server.key()).unwrap();
        assert_eq!(server.decrypt(&sealed).unwrap(), "lobby");

        // Empty strings are valid protocol messages
        let sealed = server.encrypt("", &client.key()).unwrap();
        assert_eq!(client.decrypt(&sealed).unwrap(), "");
    }

    #[test]
    fn test_wrong_recipient_cannot_decrypt() {
        let server = SealedBoxProvider::generate();
        let client = SealedBoxProvider::generate();
        let eavesdropper = SealedBoxProvider::generate();

        let sealed = server.encrypt("ACK", &client.key()).unwrap();
        assert_eq!(eavesdropper.decrypt(&sealed), Err(CryptoError::Decrypt));
    }

    #[test]
    fn test_each_message_uses_fresh_ephemeral_key() {
        let server = SealedBoxProvider::generate();
        let client = SealedBoxProvider::generate();

        let first = server.encrypt("NACK", &client.key()).unwrap();
        let second = server.encrypt("NACK", &client.key()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_tampered_or_truncated_ciphertext() {
        let server = SealedBoxProvider::generate();
        let client = SealedBoxProvider::generate();

        let sealed = client.encrypt("hash", &server.key()).unwrap();
        let mut bytes = STANDARD.decode(&sealed).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert_eq!(
            server.decrypt(&STANDARD.encode(&bytes)),
            Err(CryptoError::Decrypt)
        );

        assert_eq!(server.decrypt("AAAA"), Err(CryptoError::Malformed));
        assert_eq!(server.decrypt("%%%"), Err(CryptoError::Malformed));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let provider = SealedBoxProvider::generate();
        let debug = format!("{:?}", provider);
        assert!(debug.contains("[REDACTED]"));
        assert!(debug.contains(&provider.public_key()));
    }
}
