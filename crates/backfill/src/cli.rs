//! Command-line flags.

use clap::{Parser, ValueEnum};
use vault::backfill::DEFAULT_BATCH_SIZE;
use vault::EntityKind;

/// Encrypt legacy plaintext rows in place. Safe to re-run; only one instance
/// may run at a time.
#[derive(Debug, Parser)]
#[command(name = "backfill", version, about)]
pub struct Args {
    /// Report what would be migrated without writing anything.
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Which table to migrate.
    #[arg(long, value_enum, default_value_t = Table::All)]
    pub table: Table,

    /// Rows fetched per scan.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    pub batch_size: u32,

    /// Migrated rows per table to re-read and check after a live run.
    #[arg(long, default_value_t = 10)]
    pub verify_sample: u32,

    /// Skip the post-migration check.
    #[arg(long)]
    pub no_verify: bool,

    /// Log every row decision at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Sample size for verification, or `None` when disabled.
    pub fn verify(&self) -> Option<u32> {
        (!self.no_verify && self.verify_sample > 0).then_some(self.verify_sample)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Table {
    Users,
    Goals,
    Journal,
    All,
}

impl Table {
    /// Entity kinds to migrate, in order.
    pub fn kinds(self) -> Vec<EntityKind> {
        match self {
            Table::Users => vec![EntityKind::User],
            Table::Goals => vec![EntityKind::Goal],
            Table::Journal => vec![EntityKind::JournalEntry],
            Table::All => EntityKind::ALL.to_vec(),
        }
    }
}
