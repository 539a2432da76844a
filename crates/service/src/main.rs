//! `journal-svc`: HTTP service entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables, including both keys.
//! 2. Initialise the telemetry pipeline (JSON logs, optional OTLP).
//! 3. Build the field encryption orchestrator from the validated keys.
//! 4. Connect the database pool and apply the embedded schema migration.
//! 5. Build the Axum router and serve until Ctrl-C / SIGTERM.

mod config;
mod repo;
mod server;
mod telemetry;

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use vault::FieldCrypto;

use config::Config;
use repo::PgRepository;
use server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otlp_endpoint(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = cfg.port,
        list_decrypt_failure_policy = ?cfg.list_decrypt_failure_policy,
        otlp = cfg.otlp_endpoint().is_some(),
        "journal-svc starting"
    );

    // -----------------------------------------------------------------------
    // 3. Field encryption
    // -----------------------------------------------------------------------
    let crypto = FieldCrypto::new(&cfg.key_material()?);

    // -----------------------------------------------------------------------
    // 4. Database
    // -----------------------------------------------------------------------
    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_max_connections)
        .connect(&cfg.database_url)
        .await
        .context("failed to connect to database")?;
    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to apply schema migration")?;
    info!(max_connections = cfg.db_max_connections, "database ready");

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let state = AppState::new(
        Arc::new(PgRepository::new(pool.clone())),
        crypto,
        cfg.list_decrypt_failure_policy,
    );
    let router = server::router::build(state);

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    pool.close().await;
    telemetry::shutdown_telemetry();
    info!("journal-svc stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
