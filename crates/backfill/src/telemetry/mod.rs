//! Logging for the backfill job.
//!
//! JSON lines on stderr; stdout is reserved for the final summary.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Filter directive for the configured level. `verbose` turns on per-row
/// events from the migrator without raising the level of sqlx and friends.
fn directive(log_level: &str, verbose: bool) -> String {
    if verbose {
        format!("{log_level},vault=debug,backfill=debug")
    } else {
        log_level.to_owned()
    }
}

/// Install the subscriber. `RUST_LOG` wins over both arguments.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn init(log_level: &str, verbose: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(log_level, verbose)));

    tracing_subscriber::fmt()
        .json()
        .with_current_span(false)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install backfill log subscriber: {e}"))
}
