//! `backfill`: one-shot plaintext-to-ciphertext migration.
//!
//! Startup sequence:
//! 1. Parse flags and load [`Config`](config::Config) from environment variables.
//! 2. Initialise structured JSON logging (stderr).
//! 3. Connect to the database and build the migrator.
//! 4. Migrate the selected tables, cancelling between batches on Ctrl-C.
//! 5. Print the JSON summary to stdout and exit 0 (clean), 1 (row errors,
//!    verification mismatches, or cancelled), or 2 (configuration / startup).

mod cli;
mod config;
mod telemetry;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vault::backfill::{MigrationReport, Migrator, MigratorOptions, PgBackfillStore, TableReport, VerifyReport};
use vault::FieldCrypto;

const EXIT_INCOMPLETE: u8 = 1;
const EXIT_STARTUP: u8 = 2;

/// Top-level JSON summary.
#[derive(Serialize)]
struct Summary<'a> {
    dry_run: bool,
    migrated: u64,
    skipped: u64,
    errors: usize,
    verify_failures: usize,
    cancelled: bool,
    tables: &'a [TableReport],
    verification: &'a [VerifyReport],
}

impl<'a> Summary<'a> {
    fn new(dry_run: bool, report: &'a MigrationReport) -> Self {
        Self {
            dry_run,
            migrated: report.migrated(),
            skipped: report.skipped(),
            errors: report.errors(),
            verify_failures: report.verify_failures(),
            cancelled: report.cancelled(),
            tables: &report.tables,
            verification: &report.verification,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = cli::Args::parse();

    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = match config::Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ERROR: backfill configuration invalid: {e:#}");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    if let Err(e) = telemetry::init(&cfg.log_level, args.verbose) {
        eprintln!("ERROR: {e:#}");
        return ExitCode::from(EXIT_STARTUP);
    }

    // -----------------------------------------------------------------------
    // 3-4. Migration
    // -----------------------------------------------------------------------
    let report = match run(&args, &cfg).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %format!("{e:#}"), "backfill aborted");
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    // -----------------------------------------------------------------------
    // 5. Summary
    // -----------------------------------------------------------------------
    match serde_json::to_string_pretty(&Summary::new(args.dry_run, &report)) {
        Ok(json) => println!("{json}"),
        Err(e) => error!(error = %e, "failed to render summary"),
    }

    if report.is_success() && !report.cancelled() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(EXIT_INCOMPLETE)
    }
}

async fn run(args: &cli::Args, cfg: &config::Config) -> Result<MigrationReport> {
    let crypto = FieldCrypto::new(&cfg.key_material()?);

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;

    let migrator = Migrator::new(
        PgBackfillStore::new(pool.clone()),
        crypto,
        MigratorOptions {
            dry_run: args.dry_run,
            batch_size: args.batch_size,
        },
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current batch");
            on_signal.cancel();
        }
    });

    let kinds = args.table.kinds();
    info!(
        dry_run = args.dry_run,
        tables = ?kinds,
        batch_size = args.batch_size,
        verify_sample = ?args.verify(),
        "backfill starting"
    );
    let report = migrator
        .run(&kinds, args.verify(), &cancel)
        .await
        .context("backfill failed")?;

    pool.close().await;
    Ok(report)
}
