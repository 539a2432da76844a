//! Storage seam consumed by the migrator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::fields::{EntityKind, SensitiveEntity};

/// Errors from a [`BackfillStore`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure reported by a non-SQL backend.
    #[error("store error: {0}")]
    Backend(String),
}

/// The sensitive and index columns of one row, as stored.
///
/// Only the columns named by the kind's policy are carried; plain columns
/// are never read or rewritten by the migrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub kind: EntityKind,
    pub id: i64,
    /// Sensitive column → stored value (`NULL` reads as empty).
    pub fields: BTreeMap<&'static str, String>,
    /// Blind-index column → stored value.
    pub indexes: BTreeMap<&'static str, Option<String>>,
}

impl RawRow {
    /// A row with every sensitive column empty and every index unset.
    pub fn empty(kind: EntityKind, id: i64) -> Self {
        Self {
            kind,
            id,
            fields: kind
                .sensitive_fields()
                .map(|p| (p.field, String::new()))
                .collect(),
            indexes: kind.indexed_fields().map(|(_, index)| (index, None)).collect(),
        }
    }

    /// Set a sensitive column. Names outside the policy are ignored.
    pub fn with_field(mut self, field: &str, value: impl Into<String>) -> Self {
        if let Some(slot) = self.fields.get_mut(field) {
            *slot = value.into();
        }
        self
    }

    /// Set a blind-index column. Names outside the policy are ignored.
    pub fn with_index(mut self, index_field: &str, value: Option<String>) -> Self {
        if let Some(slot) = self.indexes.get_mut(index_field) {
            *slot = value;
        }
        self
    }

    /// Returns `true` if any blind-index column holds a non-empty value.
    pub fn has_index(&self) -> bool {
        self.indexes
            .values()
            .any(|v| v.as_deref().is_some_and(|s| !s.is_empty()))
    }
}

impl SensitiveEntity for RawRow {
    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn id(&self) -> i64 {
        self.id
    }

    fn sensitive_mut(&mut self, field: &str) -> Option<&mut String> {
        self.fields.get_mut(field)
    }

    fn index_mut(&mut self, index_field: &str) -> Option<&mut Option<String>> {
        self.indexes.get_mut(index_field)
    }
}

/// Row source and sink for the migrator.
#[async_trait]
pub trait BackfillStore: Send + Sync {
    /// Up to `limit` unmigrated candidate rows with `id > after`, ascending by id.
    ///
    /// For indexed kinds a candidate is a row whose blind index is unset or
    /// empty. For other kinds it is a row with any non-empty sensitive value.
    async fn scan(&self, kind: EntityKind, after: i64, limit: u32) -> Result<Vec<RawRow>, StoreError>;

    /// Open a transaction scoped to a single row.
    async fn begin(&self) -> Result<Box<dyn RowTransaction>, StoreError>;

    /// Up to `limit` rows that already carry ciphertext, for verification.
    async fn sample_migrated(&self, kind: EntityKind, limit: u32) -> Result<Vec<RawRow>, StoreError>;
}

/// One row's read-compute-write boundary.
#[async_trait]
pub trait RowTransaction: Send {
    /// Re-read the row and hold a write lock on it until commit or rollback.
    /// `None` if the row no longer exists.
    async fn lock_row(&mut self, kind: EntityKind, id: i64) -> Result<Option<RawRow>, StoreError>;

    /// Write every sensitive and index column of `row` in one statement.
    async fn write_row(&mut self, row: &RawRow) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
