//! Runtime configuration for sync sessions and the SQLite collections.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use utils::logging::{self, LoggingError};

use super::sync::{OverlapPolicy, SyncOptions};

pub const DATABASE_URL_ENV: &str = "SITEBOOK_DATABASE_URL";
pub const REMOTE_TIMEOUT_ENV: &str = "SITEBOOK_REMOTE_TIMEOUT_MS";
pub const OVERLAP_POLICY_ENV: &str = "SITEBOOK_OVERLAP_POLICY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub overlap_policy: OverlapPolicy,
    /// Unset means remote writes may take as long as they take.
    pub remote_timeout_ms: Option<u64>,
    /// Change events buffered per subscriber before it lags.
    pub event_buffer: usize,
    pub database_url: String,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            overlap_policy: OverlapPolicy::Queue,
            remote_timeout_ms: None,
            event_buffer: 256,
            database_url: "sqlite::memory:".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`. Blank or unparsable values are ignored with a warning.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        if let Some(url) = value(DATABASE_URL_ENV) {
            self.database_url = url;
        }

        if let Some(raw) = value(REMOTE_TIMEOUT_ENV) {
            match raw.parse::<u64>() {
                Ok(0) => self.remote_timeout_ms = None,
                Ok(ms) => self.remote_timeout_ms = Some(ms),
                Err(e) => warn!(key = REMOTE_TIMEOUT_ENV, value = %raw, error = %e, "Ignoring invalid override"),
            }
        }

        if let Some(raw) = value(OVERLAP_POLICY_ENV) {
            match raw.to_lowercase().parse::<OverlapPolicy>() {
                Ok(policy) => self.overlap_policy = policy,
                Err(e) => warn!(key = OVERLAP_POLICY_ENV, value = %raw, error = %e, "Ignoring invalid override"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be at least 1".to_string(),
            ));
        }
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Invalid("database_url is empty".to_string()));
        }
        Ok(())
    }

    /// Install the global tracing subscriber with `log_filter` as the fallback directive.
    pub fn init_logging(&self) -> Result<(), LoggingError> {
        logging::init_tracing(&self.log_filter)
    }

    pub fn remote_timeout(&self) -> Option<Duration> {
        self.remote_timeout_ms.map(Duration::from_millis)
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            overlap_policy: self.overlap_policy,
            remote_timeout: self.remote_timeout(),
            ..Default::default()
        }
    }
}
