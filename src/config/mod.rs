// Configuration module
// Author: kelexine (https://github.com/kelexine)

mod models;

pub use models::*;

use crate::error::{ResilienceError, Result};
use config::{Config, Environment, File};
use std::path::{Path, PathBuf};

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest, `RESILIENCE__SECTION__KEY`)
    /// 2. Config file
    /// 3. Defaults (lowest)
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(&Self::default_config_path()), false)
    }

    /// Same layering as [`AppConfig::load`] with an explicit file path.
    pub fn load_from(path: &Path, required: bool) -> Result<Self> {
        let config = Config::builder()
            // Start with defaults
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.to_path_buf()).required(required))
            // Double underscore keeps snake_case keys intact
            .add_source(
                Environment::with_prefix("RESILIENCE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ResilienceError::Config(e.to_string()))?;

        let loaded: Self = config
            .try_deserialize()
            .map_err(|e| ResilienceError::Config(e.to_string()))?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject settings that would make a component misbehave silently.
    pub fn validate(&self) -> Result<()> {
        if self.breaker.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.breaker.half_open_max_calls == 0 {
            return Err(ResilienceError::Config(
                "breaker.half_open_max_calls must be at least 1".to_string(),
            ));
        }
        if self.cache.providers.is_empty() {
            return Err(ResilienceError::Config(
                "cache.providers must name at least one provider".to_string(),
            ));
        }
        if !self.cache.providers.contains(&self.cache.primary_provider) {
            return Err(ResilienceError::Config(format!(
                "cache.primary_provider '{}' is not listed in cache.providers",
                self.cache.primary_provider
            )));
        }
        if self.cache.max_entry_bytes == 0 {
            return Err(ResilienceError::Config(
                "cache.max_entry_bytes must be positive".to_string(),
            ));
        }
        if self.embeddings.max_entries == 0 {
            return Err(ResilienceError::Config(
                "embeddings.max_entries must be positive".to_string(),
            ));
        }
        if self.embeddings.emergency_limit_mb < self.embeddings.pre_insert_limit_mb {
            return Err(ResilienceError::Config(format!(
                "embeddings.emergency_limit_mb ({}) is below pre_insert_limit_mb ({})",
                self.embeddings.emergency_limit_mb, self.embeddings.pre_insert_limit_mb
            )));
        }
        if self.storage.failure_threshold == 0 {
            return Err(ResilienceError::Config(
                "storage.failure_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_config_path() -> String {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".resilience-core")
            .join("config.toml")
            .to_string_lossy()
            .to_string()
    }
}
