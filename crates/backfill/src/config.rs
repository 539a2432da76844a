//! Environment configuration for the backfill job.

use anyhow::{Context, Result};
use serde::Deserialize;
use vault::{KeyMaterial, KeySecret};

/// Validated backfill configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// PostgreSQL connection string. **Required.**
    pub database_url: String,

    /// Must be the key the service encrypts with. **Required.**
    #[serde(default)]
    pub encryption_key: KeySecret,

    /// Must be the key the service indexes with. **Required.**
    #[serde(default)]
    pub blind_index_key: KeySecret,

    /// Tracing log level.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load and validate configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build backfill configuration")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise backfill configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Decode and check both keys.
    pub fn key_material(&self) -> Result<KeyMaterial> {
        KeyMaterial::from_secrets(&self.encryption_key, &self.blind_index_key)
            .context("invalid key configuration")
    }

    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("DATABASE_URL is required and must not be empty");
        }
        self.key_material()?;
        Ok(())
    }
}
