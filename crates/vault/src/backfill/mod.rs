//! One-time backfill of plaintext rows into the encrypted representation.
//!
//! Each table is walked by keyset pagination. Every candidate row is handled
//! in its own transaction: the row is re-read under a write lock, classified,
//! encrypted through [`FieldCrypto`], written in one statement, and
//! committed. A failure rolls back that row only and the walk continues.
//!
//! Re-running is safe. Rows that already carry a blind index are excluded by
//! the scan; rows whose sensitive values already authenticate under the
//! current key are classified as already encrypted and left untouched.
//!
//! Only one migrator may run against a table at a time.

#[cfg(test)]
mod memory;
pub mod postgres;
pub mod report;
pub mod store;

pub use postgres::PgBackfillStore;
pub use report::{MigrationReport, RowFailure, RowOutcome, TableReport, VerifyReport};
pub use store::{BackfillStore, RawRow, RowTransaction, StoreError};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::fields::{EntityKind, FieldCrypto, FieldError};

/// Default number of rows fetched per scan.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Why a single row could not be migrated.
#[derive(Debug, Error)]
pub enum MigrationFailure {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Field(#[from] FieldError),

    /// Some sensitive values are ciphertext and some are not.
    #[error("row holds both plaintext and ciphertext values")]
    MixedState,
}

/// A row that failed to migrate. The job continues past it.
#[derive(Debug, Error)]
#[error("{kind} row {id}: {cause}")]
pub struct RowMigrationError {
    pub kind: EntityKind,
    pub id: i64,
    #[source]
    pub cause: MigrationFailure,
}

/// Run options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigratorOptions {
    /// Report what would change without writing.
    pub dry_run: bool,
    /// Rows per scan. Zero is treated as one.
    pub batch_size: u32,
}

impl Default for MigratorOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

enum Plan {
    Encrypt,
    Skip(RowOutcome),
}

/// Drives the backfill over a [`BackfillStore`].
pub struct Migrator<S> {
    store: S,
    crypto: FieldCrypto,
    options: MigratorOptions,
}

impl<S: BackfillStore> Migrator<S> {
    pub fn new(store: S, crypto: FieldCrypto, options: MigratorOptions) -> Self {
        Self {
            store,
            crypto,
            options,
        }
    }

    pub fn options(&self) -> MigratorOptions {
        self.options
    }

    /// Lazy, restartable sequence of candidate rows for `kind`.
    pub fn scan(&self, kind: EntityKind) -> Scanner<'_> {
        Scanner {
            store: &self.store,
            kind,
            after: 0,
            batch_size: self.options.batch_size.max(1),
            exhausted: false,
        }
    }

    /// Migrate one scanned row.
    ///
    /// In a dry run the row is classified and encrypted in memory only. In a
    /// live run the work happens inside a fresh transaction that is rolled
    /// back on any error.
    ///
    /// # Errors
    ///
    /// Returns a [`RowMigrationError`] naming the row; nothing was written.
    pub async fn migrate_row(&self, row: &RawRow) -> Result<RowOutcome, RowMigrationError> {
        let fail = |cause| RowMigrationError {
            kind: row.kind,
            id: row.id,
            cause,
        };

        if self.options.dry_run {
            return self.preview(row).map_err(fail);
        }

        let mut tx = self.store.begin().await.map_err(|e| fail(e.into()))?;
        match self.apply(tx.as_mut(), row.kind, row.id).await {
            Ok(outcome) => {
                tx.commit().await.map_err(|e| fail(e.into()))?;
                Ok(outcome)
            }
            Err(cause) => {
                if let Err(e) = tx.rollback().await {
                    warn!(table = %row.kind, id = row.id, error = %e, "rollback failed");
                }
                Err(fail(cause))
            }
        }
    }

    /// Walk every candidate row of `kind`, stopping between batches once
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Only a failed scan aborts the table; per-row failures are recorded in
    /// the report.
    pub async fn migrate_table(
        &self,
        kind: EntityKind,
        cancel: &CancellationToken,
    ) -> Result<TableReport, StoreError> {
        let mut report = TableReport::new(kind, self.options.dry_run);
        let mut scanner = self.scan(kind);
        info!(
            table = %kind,
            dry_run = self.options.dry_run,
            batch_size = scanner.batch_size,
            "backfill started"
        );

        loop {
            if cancel.is_cancelled() {
                warn!(table = %kind, scanned = report.scanned, "backfill cancelled; re-run to resume");
                report.cancelled = true;
                break;
            }
            let Some(batch) = scanner.next_batch().await? else {
                break;
            };

            for row in &batch {
                report.scanned += 1;
                match self.migrate_row(row).await {
                    Ok(outcome) => {
                        debug!(table = %kind, id = row.id, ?outcome, "row processed");
                        report.record(outcome);
                    }
                    Err(e) => {
                        error!(table = %kind, id = row.id, error = %e.cause, "row migration failed");
                        report.errors.push(RowFailure {
                            id: row.id,
                            error: e.cause.to_string(),
                        });
                    }
                }
            }
            debug!(table = %kind, scanned = report.scanned, "batch complete");
        }

        info!(
            table = %kind,
            scanned = report.scanned,
            migrated = report.migrated,
            skipped = report.skipped,
            errors = report.error_count(),
            "backfill finished"
        );
        Ok(report)
    }

    /// Re-read up to `sample` rows that carry ciphertext, decrypt them, and
    /// re-derive their blind indexes. Never writes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the sample cannot be read.
    pub async fn verify(&self, kind: EntityKind, sample: u32) -> Result<VerifyReport, StoreError> {
        let mut report = VerifyReport::new(kind);
        for mut row in self.store.sample_migrated(kind, sample).await? {
            report.sampled += 1;
            let checked = self
                .crypto
                .decrypt_for_read(&mut row)
                .and_then(|()| self.crypto.indexes_match(&mut row));
            match checked {
                Ok(true) => report.passed += 1,
                Ok(false) => {
                    warn!(table = %kind, id = row.id, "blind index does not match decrypted value");
                    report.failed.push(row.id);
                }
                Err(e) => {
                    warn!(table = %kind, id = row.id, error = %e, "sampled row failed to decrypt");
                    report.failed.push(row.id);
                }
            }
        }
        info!(
            table = %kind,
            sampled = report.sampled,
            passed = report.passed,
            failed = report.failed.len(),
            "verification finished"
        );
        Ok(report)
    }

    /// Migrate `kinds` in order, then verify each when the run was live and
    /// completed.
    ///
    /// # Errors
    ///
    /// Returns the first scan or sampling failure.
    pub async fn run(
        &self,
        kinds: &[EntityKind],
        verify_sample: Option<u32>,
        cancel: &CancellationToken,
    ) -> Result<MigrationReport, StoreError> {
        let mut report = MigrationReport::default();
        for &kind in kinds {
            let table = self.migrate_table(kind, cancel).await?;
            let cancelled = table.cancelled;
            report.tables.push(table);
            if cancelled {
                return Ok(report);
            }
        }

        if let Some(sample) = verify_sample.filter(|_| !self.options.dry_run) {
            for &kind in kinds {
                report.verification.push(self.verify(kind, sample).await?);
            }
        }
        Ok(report)
    }

    fn preview(&self, row: &RawRow) -> Result<RowOutcome, MigrationFailure> {
        match self.classify(row)? {
            Plan::Skip(outcome) => Ok(outcome),
            Plan::Encrypt => {
                self.crypto.encrypt_for_write(&mut row.clone())?;
                Ok(RowOutcome::WouldMigrate)
            }
        }
    }

    async fn apply(
        &self,
        tx: &mut dyn RowTransaction,
        kind: EntityKind,
        id: i64,
    ) -> Result<RowOutcome, MigrationFailure> {
        let Some(mut row) = tx.lock_row(kind, id).await? else {
            debug!(table = %kind, id, "row vanished before lock");
            return Ok(RowOutcome::Vanished);
        };
        if let Plan::Skip(outcome) = self.classify(&row)? {
            return Ok(outcome);
        }
        self.crypto.encrypt_for_write(&mut row)?;
        tx.write_row(&row).await?;
        Ok(RowOutcome::Migrated)
    }

    fn classify(&self, row: &RawRow) -> Result<Plan, MigrationFailure> {
        if row.has_index() {
            return Ok(Plan::Skip(RowOutcome::SkippedAlreadyEncrypted));
        }

        let present: Vec<&String> = row.fields.values().filter(|v| !v.is_empty()).collect();
        if present.is_empty() {
            return Ok(Plan::Skip(RowOutcome::SkippedEmpty));
        }

        let sealed = present.iter().filter(|v| self.crypto.cipher().probe(v)).count();
        if sealed == 0 {
            return Ok(Plan::Encrypt);
        }
        if sealed < present.len() {
            return Err(MigrationFailure::MixedState);
        }
        if !row.indexes.is_empty() {
            warn!(table = %row.kind, id = row.id, "ciphertext present without blind index; left unchanged");
        }
        Ok(Plan::Skip(RowOutcome::SkippedAlreadyEncrypted))
    }
}

/// Keyset-paginated walk over candidate rows.
///
/// Advances past every returned id, so rows left unmigrated by a dry run or
/// an error are not fetched again within the same walk.
pub struct Scanner<'a> {
    store: &'a dyn BackfillStore,
    kind: EntityKind,
    after: i64,
    batch_size: u32,
    exhausted: bool,
}

impl Scanner<'_> {
    /// Next batch, or `None` once the table is exhausted.
    ///
    /// # Errors
    ///
    /// Propagates storage failures.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<RawRow>>, StoreError> {
        if self.exhausted {
            return Ok(None);
        }
        let batch = self.store.scan(self.kind, self.after, self.batch_size).await?;
        if batch.len() < self.batch_size as usize {
            self.exhausted = true;
        }
        match batch.last() {
            Some(last) => {
                self.after = last.id;
                Ok(Some(batch))
            }
            None => Ok(None),
        }
    }
}
