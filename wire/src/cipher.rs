//! Authenticated envelope for tunnel payloads.
//!
//! Every message and every response chunk crosses the DNS channel inside
//! the same envelope:
//!
//! ```text
//! +---------+----------------+----------------------+
//! | version | nonce (12 B)   | ciphertext + tag     |
//! +---------+----------------+----------------------+
//! ```
//!
//! ChaCha20-Poly1305 under a single pre-shared 256-bit key provides
//! confidentiality and integrity; the random nonce makes envelopes for
//! identical plaintext distinct. The key travels out of band as base64
//! in the environment, never over the tunnel.

use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;

use crate::error::CipherError;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Envelope format version. Bumped if the framing ever changes;
/// mismatches fail decryption like any other corruption.
pub const VERSION: u8 = 1;

/// Fixed bytes an envelope adds on top of its plaintext.
pub const ENVELOPE_OVERHEAD: usize = 1 + NONCE_LEN + TAG_LEN;

/// The pre-shared tunnel key.
///
/// `Debug` is implemented by hand so key bytes cannot leak through a
/// formatting path.
#[derive(Clone)]
pub struct Key([u8; KEY_LEN]);

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Key(..)")
    }
}

impl Key {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Key(bytes)
    }

    /// Parse a key from its base64 environment representation.
    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|_| CipherError)?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| CipherError)?;
        Ok(Key(bytes))
    }

    /// Encode the key for hand-off through the environment.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.0)
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(chacha20poly1305::Key::from_slice(&self.0))
    }
}

/// Encrypt `plaintext` into a self-contained envelope.
pub fn seal(key: &Key, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(chacha20poly1305::Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError)?;

    let mut envelope = Vec::with_capacity(ENVELOPE_OVERHEAD + plaintext.len());
    envelope.push(VERSION);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&ciphertext);
    Ok(envelope)
}

/// Authenticate and decrypt an envelope produced by [`seal`].
///
/// Version mismatch, truncation, and tag failure are indistinguishable
/// to the caller.
pub fn open(key: &Key, envelope: &[u8]) -> Result<Vec<u8>, CipherError> {
    if envelope.len() < ENVELOPE_OVERHEAD || envelope[0] != VERSION {
        return Err(CipherError);
    }
    let nonce = &envelope[1..1 + NONCE_LEN];
    key.cipher()
        .decrypt(
            chacha20poly1305::Nonce::from_slice(nonce),
            &envelope[1 + NONCE_LEN..],
        )
        .map_err(|_| CipherError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let key = Key::generate();
        let sealed = seal(&key, b"the quick brown fox").unwrap();
        assert_eq!(open(&key, &sealed).unwrap(), b"the quick brown fox");
    }

    #[test]
    fn round_trip_empty_plaintext() {
        let key = Key::generate();
        let sealed = seal(&key, b"").unwrap();
        assert_eq!(sealed.len(), ENVELOPE_OVERHEAD);
        assert_eq!(open(&key, &sealed).unwrap(), b"");
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = seal(&Key::generate(), b"secret").unwrap();
        assert_eq!(open(&Key::generate(), &sealed), Err(CipherError));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = Key::generate();
        let mut sealed = seal(&key, b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_eq!(open(&key, &sealed), Err(CipherError));
    }

    #[test]
    fn version_mismatch_fails() {
        let key = Key::generate();
        let mut sealed = seal(&key, b"secret").unwrap();
        sealed[0] = VERSION + 1;
        assert_eq!(open(&key, &sealed), Err(CipherError));
    }

    #[test]
    fn truncated_envelope_fails() {
        let key = Key::generate();
        let sealed = seal(&key, b"secret").unwrap();
        assert_eq!(open(&key, &sealed[..ENVELOPE_OVERHEAD - 1]), Err(CipherError));
    }

    #[test]
    fn key_survives_base64() {
        let key = Key::generate();
        let restored = Key::from_base64(&key.to_base64()).unwrap();
        let sealed = seal(&key, b"hello").unwrap();
        assert_eq!(open(&restored, &sealed).unwrap(), b"hello");
    }

    #[test]
    fn short_key_material_rejected() {
        assert!(Key::from_base64("c2hvcnQ=").is_err());
    }

    #[test]
    fn key_debug_is_redacted() {
        assert_eq!(format!("{:?}", Key::generate()), "Key(..)");
    }
}
