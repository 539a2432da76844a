//! [`KeyMaterial`]: the two process-wide secrets, validated once at startup.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Byte length of both the encryption key and the blind-index key (256 bits).
pub const KEY_LEN: usize = 32;

/// Prefix marking a base64-encoded key value in configuration.
const BASE64_PREFIX: &str = "base64:";

/// Errors produced while validating key material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The configuration value is absent or blank.
    #[error("{name} is required and must not be empty")]
    Missing { name: &'static str },

    /// The decoded key does not have exactly [`KEY_LEN`] bytes.
    #[error("{name} must be exactly {KEY_LEN} bytes, got {len}")]
    InvalidLength { name: &'static str, len: usize },

    /// A `base64:` key could not be decoded.
    #[error("{name} is not valid base64")]
    InvalidEncoding { name: &'static str },

    /// Both purposes were configured with the same secret.
    #[error("ENCRYPTION_KEY and BLIND_INDEX_KEY must be different keys")]
    NotIndependent,
}

/// A key value as it arrives from configuration.
///
/// Accepts either a raw string of exactly [`KEY_LEN`] bytes or
/// `base64:<standard base64>`. The text is zeroed on drop and never printed.
#[derive(Clone, Default, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct KeySecret(String);

impl KeySecret {
    /// Wrap a configured key string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Decode into exactly [`KEY_LEN`] bytes. `name` is only used in errors.
    fn decode(&self, name: &'static str) -> Result<SecretKey, KeyError> {
        let trimmed = self.0.trim();
        if trimmed.is_empty() {
            return Err(KeyError::Missing { name });
        }

        let bytes: Zeroizing<Vec<u8>> = match trimmed.strip_prefix(BASE64_PREFIX) {
            Some(encoded) => Zeroizing::new(
                STANDARD
                    .decode(encoded)
                    .map_err(|_| KeyError::InvalidEncoding { name })?,
            ),
            None => Zeroizing::new(trimmed.as_bytes().to_vec()),
        };

        SecretKey::from_slice(&bytes).ok_or(KeyError::InvalidLength {
            name,
            len: bytes.len(),
        })
    }
}

impl std::fmt::Debug for KeySecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeySecret([REDACTED])")
    }
}

/// Fixed-size key buffer, overwritten with zeroes when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct SecretKey([u8; KEY_LEN]);

impl SecretKey {
    fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    /// Raw key bytes. Callers must not log or persist them.
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// The encryption key and the independent blind-index key.
///
/// Built once from configuration; immutable for the life of the process.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    encryption_key: SecretKey,
    index_key: SecretKey,
}

impl KeyMaterial {
    /// Validate raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidLength`] if either slice is not [`KEY_LEN`]
    /// bytes, or [`KeyError::NotIndependent`] if both are identical.
    pub fn from_bytes(encryption_key: &[u8], index_key: &[u8]) -> Result<Self, KeyError> {
        let encryption_key = SecretKey::from_slice(encryption_key).ok_or(KeyError::InvalidLength {
            name: "ENCRYPTION_KEY",
            len: encryption_key.len(),
        })?;
        let index_key = SecretKey::from_slice(index_key).ok_or(KeyError::InvalidLength {
            name: "BLIND_INDEX_KEY",
            len: index_key.len(),
        })?;
        Self::checked(encryption_key, index_key)
    }

    /// Decode and validate both keys from their configured string forms.
    ///
    /// # Errors
    ///
    /// Returns a [`KeyError`] naming the offending variable.
    pub fn from_secrets(encryption_key: &KeySecret, index_key: &KeySecret) -> Result<Self, KeyError> {
        let encryption_key = encryption_key.decode("ENCRYPTION_KEY")?;
        let index_key = index_key.decode("BLIND_INDEX_KEY")?;
        Self::checked(encryption_key, index_key)
    }

    fn checked(encryption_key: SecretKey, index_key: SecretKey) -> Result<Self, KeyError> {
        if encryption_key == index_key {
            return Err(KeyError::NotIndependent);
        }
        Ok(Self {
            encryption_key,
            index_key,
        })
    }

    /// Key for authenticated encryption.
    pub fn encryption_key(&self) -> &SecretKey {
        &self.encryption_key
    }

    /// Key for the blind-index MAC.
    pub fn index_key(&self) -> &SecretKey {
        &self.index_key
    }
}
