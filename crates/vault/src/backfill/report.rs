//! Migration outcomes and the summary report.

use serde::Serialize;

use crate::fields::EntityKind;

/// Terminal state of one row in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOutcome {
    /// Dry run: the row would have been encrypted.
    WouldMigrate,
    /// Ciphertext and blind index were written and committed.
    Migrated,
    /// The row already carries ciphertext; nothing was written.
    SkippedAlreadyEncrypted,
    /// Every sensitive value is empty; nothing to encrypt.
    SkippedEmpty,
    /// The row was deleted between scan and lock.
    Vanished,
}

/// A row that failed, by id. The message never contains field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowFailure {
    pub id: i64,
    pub error: String,
}

/// Per-table counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableReport {
    pub table: EntityKind,
    pub dry_run: bool,
    pub scanned: u64,
    /// Rows migrated, or in a dry run rows that would be.
    pub migrated: u64,
    pub skipped: u64,
    pub errors: Vec<RowFailure>,
    /// Set when the run stopped early on cancellation.
    pub cancelled: bool,
}

impl TableReport {
    pub fn new(table: EntityKind, dry_run: bool) -> Self {
        Self {
            table,
            dry_run,
            scanned: 0,
            migrated: 0,
            skipped: 0,
            errors: Vec::new(),
            cancelled: false,
        }
    }

    pub fn record(&mut self, outcome: RowOutcome) {
        match outcome {
            RowOutcome::WouldMigrate | RowOutcome::Migrated => self.migrated += 1,
            RowOutcome::SkippedAlreadyEncrypted | RowOutcome::SkippedEmpty | RowOutcome::Vanished => {
                self.skipped += 1
            }
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

/// Result of re-reading a sample of migrated rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub table: EntityKind,
    pub sampled: u64,
    pub passed: u64,
    /// Ids of rows that failed to decrypt or whose index diverged.
    pub failed: Vec<i64>,
}

impl VerifyReport {
    pub fn new(table: EntityKind) -> Self {
        Self {
            table,
            sampled: 0,
            passed: 0,
            failed: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Whole-run summary, printed by the CLI as JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub tables: Vec<TableReport>,
    pub verification: Vec<VerifyReport>,
}

impl MigrationReport {
    pub fn migrated(&self) -> u64 {
        self.tables.iter().map(|t| t.migrated).sum()
    }

    pub fn skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    pub fn errors(&self) -> usize {
        self.tables.iter().map(TableReport::error_count).sum()
    }

    pub fn verify_failures(&self) -> usize {
        self.verification.iter().map(|v| v.failed.len()).sum()
    }

    pub fn cancelled(&self) -> bool {
        self.tables.iter().any(|t| t.cancelled)
    }

    /// `true` if no row errored and every verified sample passed.
    pub fn is_success(&self) -> bool {
        self.errors() == 0 && self.verify_failures() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_are_tallied() {
        let mut t = TableReport::new(EntityKind::User, false);
        for o in [
            RowOutcome::Migrated,
            RowOutcome::Migrated,
            RowOutcome::SkippedAlreadyEncrypted,
            RowOutcome::SkippedEmpty,
            RowOutcome::Vanished,
        ] {
            t.record(o);
        }
        assert_eq!((t.migrated, t.skipped), (2, 3));
    }

    #[test]
    fn success_requires_no_errors_and_clean_verification() {
        let mut report = MigrationReport::default();
        assert!(report.is_success());

        let mut v = VerifyReport::new(EntityKind::Goal);
        v.failed.push(3);
        report.verification.push(v);
        assert!(!report.is_success());
        assert_eq!(report.verify_failures(), 1);
    }

    #[test]
    fn serialises_table_names() {
        let json = serde_json::to_value(TableReport::new(EntityKind::JournalEntry, true)).unwrap();
        assert_eq!(json["table"], "journal_entry");
        assert_eq!(json["dry_run"], true);
    }
}
