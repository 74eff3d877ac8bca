//! Settings loader with layered sources.

use crate::{format_validation_errors, ConfigValidator, RedisSettings};
use config::{Config, ConfigError, Environment, File};
use redlab_core::{CacheError, CacheResult};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable prefix for Redis settings (`REDIS_HOST`, ...).
pub const ENV_PREFIX: &str = "REDIS";

/// Loads [`RedisSettings`] from layered sources.
///
/// Sources in increasing precedence:
/// 1. Built-in defaults
/// 2. `{config_dir}/default.toml`
/// 3. `{config_dir}/local.toml` (not committed to version control)
/// 4. Environment variables with the `REDIS_` prefix, including those
///    loaded from a `.env` file
/// 5. Explicit overrides passed to [`with_override`](Self::with_override)
#[derive(Debug, Clone)]
pub struct SettingsLoader {
    config_dir: PathBuf,
    env_prefix: String,
    load_dotenv: bool,
    overrides: Vec<(String, String)>,
}

impl SettingsLoader {
    /// Creates a loader reading files from `config_dir`.
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            env_prefix: ENV_PREFIX.to_string(),
            load_dotenv: true,
            overrides: Vec::new(),
        }
    }

    /// Loader for the default location (`./config`).
    pub fn from_default_location() -> Self {
        Self::new("./config")
    }

    /// Uses a different environment variable prefix.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skips reading the `.env` file.
    #[must_use]
    pub fn without_dotenv(mut self) -> Self {
        self.load_dotenv = false;
        self
    }

    /// Sets a value that wins over every other source.
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.push((key.into(), value.into()));
        self
    }

    /// Loads and validates the settings.
    ///
    /// Any missing required key, malformed value or failed validation rule
    /// is reported as [`CacheError::Configuration`].
    pub fn load(&self) -> CacheResult<RedisSettings> {
        if self.load_dotenv {
            if let Err(e) = dotenvy::dotenv() {
                debug!("No .env file found or error loading it: {}", e);
            }
        }

        info!(
            "Loading Redis settings from {} and {}_* environment variables",
            self.config_dir.display(),
            self.env_prefix
        );

        let mut builder = Config::builder();

        for name in ["default.toml", "local.toml"] {
            let path = self.config_dir.join(name);
            if Path::new(&path).exists() {
                debug!("Loading settings file: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        // Values stay strings; numeric fields are converted on deserialize.
        builder = builder.add_source(Environment::with_prefix(&self.env_prefix).prefix_separator("_"));

        for (key, value) in &self.overrides {
            builder = builder
                .set_override(key.as_str(), value.as_str())
                .map_err(config_error_to_cache_error)?;
        }

        let settings: RedisSettings = builder
            .build()
            .map_err(config_error_to_cache_error)?
            .try_deserialize()
            .map_err(config_error_to_cache_error)?;

        ConfigValidator::validate(&settings)
            .map_err(|errors| CacheError::Configuration(format_validation_errors(&errors)))?;

        info!(
            url = %settings.redacted_url(),
            ttl_fast = settings.ttl_fast,
            ttl_slow = settings.ttl_slow,
            "Redis settings loaded"
        );

        Ok(settings)
    }
}

fn config_error_to_cache_error(err: ConfigError) -> CacheError {
    CacheError::Configuration(err.to_string())
}
