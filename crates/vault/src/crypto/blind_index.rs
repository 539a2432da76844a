//! Deterministic HMAC-SHA256 blind indexes for equality lookup.
//!
//! The index key is independent from the encryption key. An index reveals
//! only whether two plaintexts are equal; it cannot be reversed.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Encoded length of a non-empty blind index (base64 of 32 bytes).
pub const INDEX_ENCODED_LEN: usize = 44;

/// Computes blind indexes under a fixed key.
///
/// Holds a keyed MAC state that is cloned per call, so a shared instance is
/// safe to use from any number of threads.
#[derive(Clone)]
pub struct BlindIndexer {
    mac: HmacSha256,
}

impl BlindIndexer {
    /// Build an indexer from the blind-index key.
    pub fn new(key: &SecretKey) -> Self {
        Self {
            mac: keyed_mac(key.expose()),
        }
    }

    /// Blind index of `plaintext`.
    ///
    /// Pure and total. The empty string maps to the empty sentinel, which
    /// never equals a real digest.
    pub fn index_of(&self, plaintext: &str) -> String {
        if plaintext.is_empty() {
            return String::new();
        }
        let mut mac = self.mac.clone();
        mac.update(plaintext.as_bytes());
        STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Returns `true` if `index` is the blind index of `plaintext`.
    ///
    /// The digest comparison runs in constant time.
    pub fn verify(&self, plaintext: &str, index: &str) -> bool {
        if plaintext.is_empty() {
            return index.is_empty();
        }
        let Ok(expected) = STANDARD.decode(index) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(plaintext.as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for BlindIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlindIndexer([REDACTED])")
    }
}

fn keyed_mac(key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail.
    match <HmacSha256 as Mac>::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of every length"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyMaterial;

    fn indexer(seed: u8) -> BlindIndexer {
        let keys = KeyMaterial::from_bytes(&[0xAA; 32], &[seed; 32]).unwrap();
        BlindIndexer::new(keys.index_key())
    }

    #[test]
    fn deterministic_for_same_input() {
        let idx = indexer(1);
        assert_eq!(idx.index_of("a@x.com"), idx.index_of("a@x.com"));
        assert_eq!(idx.index_of("a@x.com").len(), INDEX_ENCODED_LEN);
    }

    #[test]
    fn distinct_inputs_distinct_indexes() {
        let idx = indexer(1);
        assert_ne!(idx.index_of("a@x.com"), idx.index_of("b@x.com"));
    }

    #[test]
    fn key_changes_index() {
        assert_ne!(indexer(1).index_of("a@x.com"), indexer(2).index_of("a@x.com"));
    }

    #[test]
    fn empty_maps_to_sentinel() {
        let idx = indexer(1);
        assert_eq!(idx.index_of(""), "");
        assert!(idx.verify("", ""));
        assert!(!idx.verify("", &idx.index_of("a@x.com")));
    }

    #[test]
    fn matches_indexes_written_by_existing_tooling() {
        let keys = KeyMaterial::from_bytes(
            b"0123456789abcdef0123456789abcdef",
            b"fedcba9876543210fedcba9876543210",
        )
        .unwrap();
        let idx = BlindIndexer::new(keys.index_key());
        assert_eq!(
            idx.index_of("a@x.com"),
            "V6NcuNW0sxizgjyAmW0wNdmDPqHH9HIxdqwsoP4gsLU="
        );
    }

    #[test]
    fn verify_accepts_own_index_only() {
        let idx = indexer(1);
        let stored = idx.index_of("a@x.com");
        assert!(idx.verify("a@x.com", &stored));
        assert!(!idx.verify("b@x.com", &stored));
        assert!(!idx.verify("a@x.com", "not base64!"));
        assert!(!indexer(2).verify("a@x.com", &stored));
    }
}
