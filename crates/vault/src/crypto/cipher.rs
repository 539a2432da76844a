//! AES-256-GCM encryption and decryption of individual string fields.
//!
//! Every call draws a fresh 96-bit nonce from the OS CSPRNG, so encrypting the
//! same plaintext twice yields different blobs. Never reuse a nonce under the
//! same key: GCM nonce reuse breaks both confidentiality and authentication.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use super::keys::{SecretKey, KEY_LEN};

/// Byte length of an AES-GCM nonce (12 bytes = 96 bits).
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag (16 bytes = 128 bits).
pub const TAG_LEN: usize = 16;

/// Errors produced by the cipher layer.
///
/// Messages never include ciphertext, plaintext, or key bytes.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CipherError {
    /// The key is the wrong length (must be [`KEY_LEN`] bytes).
    #[error("invalid encryption key: expected {KEY_LEN} bytes")]
    Key,

    /// The stored value is not valid base64, or the opened bytes are not UTF-8.
    #[error("stored ciphertext could not be decoded")]
    Decode,

    /// The integrity tag did not verify (tampered data or wrong key).
    #[error("ciphertext failed authentication")]
    Authentication,

    /// The decoded blob is shorter than one nonce.
    #[error("ciphertext is truncated")]
    Truncation,

    /// AES-GCM refused to seal the input (beyond the algorithm's length limit).
    #[error("plaintext too large to encrypt")]
    Oversized,
}

/// A parsed, encrypted field value.
///
/// The stored representation is `base64(nonce ‖ ciphertext ‖ tag)` using the
/// standard alphabet with padding, so it fits a plain text column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBlob {
    /// Raw nonce bytes.
    pub nonce: [u8; NONCE_LEN],
    /// Raw ciphertext + authentication tag bytes.
    pub sealed: Vec<u8>,
}

impl SealedBlob {
    /// Encode this value to its stored text form.
    pub fn encode(&self) -> String {
        let mut raw = Vec::with_capacity(NONCE_LEN + self.sealed.len());
        raw.extend_from_slice(&self.nonce);
        raw.extend_from_slice(&self.sealed);
        STANDARD.encode(raw)
    }

    /// Parse a stored text value back into a [`SealedBlob`].
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decode`] if the text is not base64, or
    /// [`CipherError::Truncation`] if it decodes to fewer than [`NONCE_LEN`] bytes.
    pub fn parse(s: &str) -> Result<Self, CipherError> {
        let raw = STANDARD.decode(s).map_err(|_| CipherError::Decode)?;
        if raw.len() < NONCE_LEN {
            return Err(CipherError::Truncation);
        }
        let (nonce_bytes, sealed) = raw.split_at(NONCE_LEN);
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(nonce_bytes);
        Ok(Self {
            nonce,
            sealed: sealed.to_vec(),
        })
    }
}

/// The cipher engine. Cheap to clone; holds only the expanded key schedule.
#[derive(Clone)]
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Build a cipher from a validated key.
    pub fn new(key: &SecretKey) -> Self {
        Self {
            aead: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.expose())),
        }
    }

    /// Build a cipher from raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Key`] if `key` is not [`KEY_LEN`] bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != KEY_LEN {
            return Err(CipherError::Key);
        }
        let aead = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::Key)?;
        Ok(Self { aead })
    }

    /// Encrypt a plaintext field. The empty string passes through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Oversized`] only for inputs beyond the AES-GCM
    /// length limit; never for ordinary strings.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        Ok(self.seal(plaintext.as_bytes())?.encode())
    }

    /// Decrypt a stored field. The empty string passes through unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`CipherError::Decode`], [`CipherError::Truncation`], or
    /// [`CipherError::Authentication`]; callers must abort rather than
    /// substitute a default.
    pub fn decrypt(&self, ciphertext: &str) -> Result<String, CipherError> {
        if ciphertext.is_empty() {
            return Ok(String::new());
        }
        let blob = SealedBlob::parse(ciphertext)?;
        let opened = self.open(&blob)?;
        String::from_utf8(opened).map_err(|_| CipherError::Decode)
    }

    /// Returns `true` if `value` is non-empty and authenticates under this key.
    ///
    /// Used to recognise values that are already ciphertext.
    pub fn probe(&self, value: &str) -> bool {
        !value.is_empty() && self.decrypt(value).is_ok()
    }

    fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob, CipherError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .aead
            .encrypt(&nonce, plaintext)
            .map_err(|_| CipherError::Oversized)?;
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce.as_slice());
        Ok(SealedBlob {
            nonce: nonce_bytes,
            sealed,
        })
    }

    fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>, CipherError> {
        self.aead
            .decrypt(Nonce::from_slice(&blob.nonce), blob.sealed.as_ref())
            .map_err(|_| CipherError::Authentication)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cipher([REDACTED])")
    }
}
