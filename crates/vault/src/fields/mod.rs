//! Field encryption orchestration: applies the policy table on every write
//! and read path.
//!
//! # Invariants
//!
//! - An entity is sealed or opened in a single pass: every new value is
//!   computed first and only then written back, so a failure leaves the
//!   entity exactly as it was.
//! - An indexed field's blind index is derived from the same plaintext that
//!   was sealed, in the same call, after the field's [`Normalize`] rule.
//! - Decryption failures propagate. Ciphertext is never surfaced as
//!   plaintext and never replaced by a blank value.

pub mod entities;
pub mod policy;

pub use entities::{
    Goal, GoalUpdate, IndexedCiphertext, JournalEntry, SealedGoalUpdate, SealedUserUpdate,
    SensitiveEntity, User, UserUpdate,
};
pub use policy::{EntityKind, FieldPolicy, Normalize, Treatment};

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::crypto::{BlindIndexer, Cipher, CipherError, KeyMaterial};

/// Errors produced by the orchestrator.
///
/// Only field names appear in messages, never values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The cipher rejected a field.
    #[error("{kind}.{field}: {source}")]
    Cipher {
        kind: EntityKind,
        field: &'static str,
        #[source]
        source: CipherError,
    },

    /// The entity does not expose a field its policy table names.
    #[error("{kind} has no field or column named {field}")]
    UnknownField { kind: EntityKind, field: String },

    /// Lookup was requested on a field that carries no blind index.
    #[error("{kind}.{field} is not an indexed field")]
    NotIndexed { kind: EntityKind, field: String },
}

/// What a list read does with a row that fails to decrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecryptFailurePolicy {
    /// Fail the whole listing.
    #[default]
    Abort,
    /// Drop the row, log a warning with its id, and report it.
    Skip,
}

/// Result of a list read under [`DecryptFailurePolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecryptedRows<E> {
    /// Rows that decrypted successfully, in input order.
    pub rows: Vec<E>,
    /// Ids of rows dropped under [`DecryptFailurePolicy::Skip`].
    pub skipped: Vec<i64>,
}

/// The field encryption orchestrator.
///
/// Built once at startup from validated [`KeyMaterial`] and handed to every
/// component that needs it. Cloning is cheap and the instance holds no
/// mutable state, so it may be shared freely across tasks.
#[derive(Clone, Debug)]
pub struct FieldCrypto {
    inner: Arc<Engines>,
}

#[derive(Debug)]
struct Engines {
    cipher: Cipher,
    indexer: BlindIndexer,
}

impl FieldCrypto {
    /// Build the orchestrator from both keys.
    pub fn new(keys: &KeyMaterial) -> Self {
        Self {
            inner: Arc::new(Engines {
                cipher: Cipher::new(keys.encryption_key()),
                indexer: BlindIndexer::new(keys.index_key()),
            }),
        }
    }

    /// The underlying cipher engine.
    pub fn cipher(&self) -> &Cipher {
        &self.inner.cipher
    }

    /// The underlying blind-index generator.
    pub fn indexer(&self) -> &BlindIndexer {
        &self.inner.indexer
    }

    /// Replace every sensitive plaintext on `entity` with ciphertext, setting
    /// sibling blind indexes from the pre-encryption plaintext.
    ///
    /// # Errors
    ///
    /// On any error `entity` is left untouched.
    pub fn encrypt_for_write<E>(&self, entity: &mut E) -> Result<(), FieldError>
    where
        E: SensitiveEntity + ?Sized,
    {
        let kind = entity.kind();
        let mut staged = Vec::new();

        for policy in kind.sensitive_fields() {
            let index_field = match policy.treatment {
                Treatment::EncryptAndIndex { index_field } => {
                    if entity.index_mut(index_field).is_none() {
                        return Err(unknown(kind, index_field));
                    }
                    Some(index_field)
                }
                _ => None,
            };
            let plaintext = entity
                .sensitive_mut(policy.field)
                .ok_or_else(|| unknown(kind, policy.field))?;
            let sealed = self.seal(kind, policy, plaintext)?;
            staged.push((policy.field, index_field, sealed));
        }

        for (field, index_field, sealed) in staged {
            if let Some(slot) = entity.sensitive_mut(field) {
                *slot = sealed.ciphertext;
            }
            if let Some(slot) = index_field.and_then(|f| entity.index_mut(f)) {
                *slot = sealed.blind_index;
            }
        }
        Ok(())
    }

    /// Replace every sensitive ciphertext on `entity` with plaintext.
    ///
    /// # Errors
    ///
    /// Propagates the first cipher failure; `entity` is left untouched.
    pub fn decrypt_for_read<E>(&self, entity: &mut E) -> Result<(), FieldError>
    where
        E: SensitiveEntity + ?Sized,
    {
        let kind = entity.kind();
        let mut staged = Vec::new();

        for policy in kind.sensitive_fields() {
            let ciphertext = entity
                .sensitive_mut(policy.field)
                .ok_or_else(|| unknown(kind, policy.field))?;
            let plaintext = self
                .cipher()
                .decrypt(ciphertext)
                .map_err(|source| FieldError::Cipher {
                    kind,
                    field: policy.field,
                    source,
                })?;
            staged.push((policy.field, plaintext));
        }

        for (field, plaintext) in staged {
            if let Some(slot) = entity.sensitive_mut(field) {
                *slot = plaintext;
            }
        }
        Ok(())
    }

    /// Decrypt a list of rows under `policy`.
    ///
    /// # Errors
    ///
    /// Under [`DecryptFailurePolicy::Abort`], the first failure is returned and
    /// no rows are. Under [`DecryptFailurePolicy::Skip`] this never fails.
    pub fn decrypt_all<E>(
        &self,
        rows: Vec<E>,
        policy: DecryptFailurePolicy,
    ) -> Result<DecryptedRows<E>, FieldError>
    where
        E: SensitiveEntity,
    {
        let mut out = DecryptedRows {
            rows: Vec::with_capacity(rows.len()),
            skipped: Vec::new(),
        };
        for mut row in rows {
            match self.decrypt_for_read(&mut row) {
                Ok(()) => out.rows.push(row),
                Err(e) => match policy {
                    DecryptFailurePolicy::Abort => return Err(e),
                    DecryptFailurePolicy::Skip => {
                        warn!(kind = %row.kind(), id = row.id(), error = %e, "skipping undecryptable row");
                        out.skipped.push(row.id());
                    }
                },
            }
        }
        Ok(out)
    }

    /// Blind index for an equality lookup on an indexed field. The value is
    /// normalized the same way the write path normalizes it.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::NotIndexed`] if `field` carries no blind index.
    pub fn lookup_index_for(
        &self,
        kind: EntityKind,
        field: &str,
        plaintext: &str,
    ) -> Result<String, FieldError> {
        match kind.field(field) {
            Some(policy) if matches!(policy.treatment, Treatment::EncryptAndIndex { .. }) => {
                Ok(self.indexer().index_of(&policy.normalize.apply(plaintext)))
            }
            _ => Err(FieldError::NotIndexed {
                kind,
                field: field.to_owned(),
            }),
        }
    }

    /// Returns `true` if every blind index on a decrypted `entity` matches
    /// its plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnknownField`] if the entity does not expose a
    /// column its policy names.
    pub fn indexes_match<E>(&self, entity: &mut E) -> Result<bool, FieldError>
    where
        E: SensitiveEntity + ?Sized,
    {
        let kind = entity.kind();
        for (field, index_field) in kind.indexed_fields() {
            let normalize = kind.field(field).map_or(Normalize::Verbatim, |p| p.normalize);
            let plaintext = entity
                .sensitive_mut(field)
                .map(|v| normalize.apply(v).into_owned())
                .ok_or_else(|| unknown(kind, field))?;
            let stored = entity
                .index_mut(index_field)
                .ok_or_else(|| unknown(kind, index_field))?;
            let stored = stored.as_deref().unwrap_or_default();
            if !self.indexer().verify(&plaintext, stored) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Seal the sensitive fields of a user update.
    ///
    /// # Errors
    ///
    /// Propagates cipher failures.
    pub fn seal_user_update(&self, update: UserUpdate) -> Result<SealedUserUpdate, FieldError> {
        let email = match update.email {
            Some(email) => Some(self.seal_named(EntityKind::User, "email", &email)?),
            None => None,
        };
        Ok(SealedUserUpdate {
            email,
            first_name: update.first_name,
            last_name: update.last_name,
        })
    }

    /// Seal the sensitive fields of a goal update.
    ///
    /// # Errors
    ///
    /// Propagates cipher failures.
    pub fn seal_goal_update(&self, update: GoalUpdate) -> Result<SealedGoalUpdate, FieldError> {
        let goal = match update.goal {
            Some(goal) => Some(self.seal_named(EntityKind::Goal, "goal", &goal)?.ciphertext),
            None => None,
        };
        Ok(SealedGoalUpdate {
            goal,
            start_date: update.start_date,
            end_date: update.end_date,
        })
    }

    fn seal_named(
        &self,
        kind: EntityKind,
        field: &str,
        plaintext: &str,
    ) -> Result<IndexedCiphertext, FieldError> {
        let policy = kind.field(field).ok_or_else(|| unknown(kind, field))?;
        self.seal(kind, policy, plaintext)
    }

    fn seal(
        &self,
        kind: EntityKind,
        policy: &FieldPolicy,
        plaintext: &str,
    ) -> Result<IndexedCiphertext, FieldError> {
        let plaintext = policy.normalize.apply(plaintext);
        let ciphertext = match policy.treatment {
            Treatment::Plain => plaintext.to_string(),
            Treatment::EncryptOnly | Treatment::EncryptAndIndex { .. } => self
                .cipher()
                .encrypt(&plaintext)
                .map_err(|source| FieldError::Cipher {
                    kind,
                    field: policy.field,
                    source,
                })?,
        };
        let blind_index = match policy.treatment {
            Treatment::EncryptAndIndex { .. } => {
                Some(self.indexer().index_of(&plaintext)).filter(|i| !i.is_empty())
            }
            _ => None,
        };
        Ok(IndexedCiphertext {
            ciphertext,
            blind_index,
        })
    }
}

fn unknown(kind: EntityKind, field: &str) -> FieldError {
    FieldError::UnknownField {
        kind,
        field: field.to_owned(),
    }
}
