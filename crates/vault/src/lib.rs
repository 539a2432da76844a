//! Encrypted-at-rest data layer for the journaling service.
//!
//! - [`crypto`]: AES-256-GCM field cipher, HMAC-SHA256 blind indexes, and
//!   key validation.
//! - [`fields`]: the policy table and the orchestrator that applies it to
//!   entities on every read and write.
//! - [`backfill`]: one-time, resumable migration of plaintext rows.

pub mod backfill;
pub mod crypto;
pub mod fields;

pub use crypto::{KeyError, KeyMaterial, KeySecret};
pub use fields::{DecryptFailurePolicy, EntityKind, FieldCrypto, FieldError};
