//! Tracing setup: structured JSON logs, plus optional OTLP span export.
//!
//! # Telemetry invariants
//!
//! - **No sensitive plaintext, ciphertext, or key material** may appear in any
//!   span attribute or log field. Row ids, table names, and field names may.
//! - Log level is configurable via `RUST_LOG`, falling back to `LOG_LEVEL`
//!   (default: `info`).

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
