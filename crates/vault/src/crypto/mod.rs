//! Field encryption primitives: AES-256-GCM cipher and HMAC-SHA256 blind index.
//!
//! This module is free of storage and HTTP dependencies.
//!
//! # Stored formats
//!
//! ```text
//! ciphertext  = base64(nonce[12] ‖ ciphertext ‖ tag[16])
//! blind index = base64(HMAC-SHA256(index_key, utf8(plaintext)))
//! ```
//!
//! Empty plaintext is stored as the empty string and its blind index is unset.

pub mod blind_index;
pub mod cipher;
pub mod keys;

pub use blind_index::BlindIndexer;
pub use cipher::{Cipher, CipherError};
pub use keys::{KeyError, KeyMaterial, KeySecret, KEY_LEN};
