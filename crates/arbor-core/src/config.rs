//! Engine configuration, loaded from TOML.
//!
//! ```toml
//! [cache]
//! high_water_mark = 256
//! eviction_fraction = 0.25
//! max_entry_age_secs = 1800
//! sweep_interval_secs = 60
//!
//! [sessions]
//! idle_timeout_secs = 3600
//! idle_sweep_interval_secs = 300
//! prewarm = true
//!
//! [edits]
//! include_analyzers = true
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors that can occur when loading or validating engine configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheSettings,
    pub sessions: SessionSettings,
    pub edits: EditSettings,
}

/// Compilation cache limits and eviction cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Entry count above which the capacity sweep runs.
    pub high_water_mark: usize,
    /// Fraction of entries (least recently used first) removed by the capacity sweep.
    pub eviction_fraction: f64,
    /// Entries untouched for longer than this are removed by the periodic sweep.
    pub max_entry_age_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        CacheSettings {
            high_water_mark: 256,
            eviction_fraction: 0.25,
            max_entry_age_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheSettings {
    pub fn max_entry_age(&self) -> Duration {
        Duration::from_secs(self.max_entry_age_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub idle_timeout_secs: u64,
    pub idle_sweep_interval_secs: u64,
    /// Compile leaf projects in the background when a session starts.
    pub prewarm: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            idle_timeout_secs: 60 * 60,
            idle_sweep_interval_secs: 5 * 60,
            prewarm: true,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn idle_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.idle_sweep_interval_secs)
    }
}

/// Virtual edit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditSettings {
    /// Run analyzers when computing before/after diagnostics for edits.
    pub include_analyzers: bool,
}

impl Default for EditSettings {
    fn default() -> Self {
        EditSettings {
            include_analyzers: true,
        }
    }
}

impl EngineConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fraction = self.cache.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "cache.eviction_fraction must be in (0, 1], got {fraction}"
            )));
        }
        if self.cache.high_water_mark == 0 {
            return Err(ConfigError::ValidationError(
                "cache.high_water_mark must be at least 1".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 || self.sessions.idle_sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sweep intervals must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
