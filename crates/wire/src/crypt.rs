//! Payload encryption derived from the pre-shared connection key.
//!
//! The symmetric key is SHA-256 of the connection key; each frame gets a
//! fresh random 96-bit nonce, prepended to the ChaCha20-Poly1305 ciphertext.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::WireError;

const NONCE_LEN: usize = 12;

/// Hex SHA-256 digest of the connection key, advertised during handshake.
pub fn key_digest(connection_key: &str) -> String {
    use std::fmt::Write;

    let digest = Sha256::digest(connection_key.as_bytes());
    digest.iter().fold(String::with_capacity(64), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Symmetric frame cipher shared by both ends of a session.
pub struct FrameCipher {
    cipher: ChaCha20Poly1305,
}

impl FrameCipher {
    pub fn new(connection_key: &str) -> Self {
        let key = Sha256::digest(connection_key.as_bytes());
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key.as_slice())),
        }
    }

    /// Encrypts `plain`; output is `nonce || ciphertext`.
    pub fn seal(&self, plain: &[u8]) -> Result<Vec<u8>, WireError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plain)
            .map_err(|_| WireError::DecryptFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Reverses [`seal`](Self::seal). Tampering or a wrong key fails.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>, WireError> {
        if data.len() < NONCE_LEN {
            return Err(WireError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| WireError::DecryptFailed)
    }
}
