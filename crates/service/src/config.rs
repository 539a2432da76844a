//! Configuration loading and validation for the journal service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use anyhow::{Context, Result};
use serde::Deserialize;
use vault::{DecryptFailurePolicy, KeyMaterial, KeySecret};

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// PostgreSQL connection string. **Required.**
    pub database_url: String,

    /// Port the HTTP server listens on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Upper bound on pooled database connections.
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// 32-byte AES-256-GCM key, raw or `base64:`-prefixed. **Required.**
    #[serde(default)]
    pub encryption_key: KeySecret,

    /// 32-byte HMAC key for blind indexes, independent of the encryption key. **Required.**
    #[serde(default)]
    pub blind_index_key: KeySecret,

    /// What a list read does with an entry that fails to decrypt.
    #[serde(default)]
    pub list_decrypt_failure_policy: DecryptFailurePolicy,

    /// OTLP/gRPC endpoint for span export. Disabled when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_port() -> u16 {
    8080
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Decode and check both keys.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending variable.
    pub fn key_material(&self) -> Result<KeyMaterial> {
        KeyMaterial::from_secrets(&self.encryption_key, &self.blind_index_key)
            .context("invalid key configuration")
    }

    /// OTLP endpoint, if one is configured.
    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.otel_exporter_otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.database_url, "DATABASE_URL")?;
        if self.db_max_connections == 0 {
            anyhow::bail!("DB_MAX_CONNECTIONS must be > 0");
        }
        self.key_material()?;
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
