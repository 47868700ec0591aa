use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RecoveryError;
use crate::logging::LogConfig;

/// Shortest provider timeout accepted by [`EngineConfig::validate`]
pub const MIN_PROVIDER_TIMEOUT_SECS: u64 = 10;

/// Longest provider timeout accepted by [`EngineConfig::validate`]
pub const MAX_PROVIDER_TIMEOUT_SECS: u64 = 30;

/// Main engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Provider sync policy settings
    pub sync: SyncSettings,

    /// Profile store location
    pub storage: StorageSettings,

    /// Logging settings
    pub logging: LogConfig,
}

/// Provider sync policy settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Minimum age of the last sync before the provider is queried again
    pub staleness_window_minutes: i64,

    /// Trailing window fetched on every sync pass
    pub lookback_days: i64,

    /// Per-category provider query timeout
    pub provider_timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            staleness_window_minutes: 60,
            lookback_days: 7,
            provider_timeout_secs: 20,
        }
    }
}

impl SyncSettings {
    pub fn staleness_window(&self) -> Duration {
        Duration::minutes(self.staleness_window_minutes)
    }

    pub fn lookback(&self) -> Duration {
        Duration::days(self.lookback_days)
    }

    pub fn provider_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Profile store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite database holding health records and connections
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("recoveryrs")
                .join("health.db"),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("recoveryrs")
            .join("config.toml")
    }

    /// Load configuration from the default location, or use defaults if missing or invalid
    pub fn load_or_default() -> Self {
        let path = Self::default_config_path();
        if !path.exists() {
            return Self::default();
        }

        match Self::load_from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Falling back to default configuration");
                Self::default()
            }
        }
    }

    /// Check value ranges that the sync policy relies on
    pub fn validate(&self) -> std::result::Result<(), RecoveryError> {
        if self.sync.staleness_window_minutes <= 0 {
            return Err(RecoveryError::Configuration(
                "sync.staleness_window_minutes must be positive".to_string(),
            ));
        }
        if self.sync.lookback_days <= 0 {
            return Err(RecoveryError::Configuration(
                "sync.lookback_days must be positive".to_string(),
            ));
        }
        if !(MIN_PROVIDER_TIMEOUT_SECS..=MAX_PROVIDER_TIMEOUT_SECS).contains(&self.sync.provider_timeout_secs) {
            return Err(RecoveryError::Configuration(format!(
                "sync.provider_timeout_secs must be between {} and {}",
                MIN_PROVIDER_TIMEOUT_SECS, MAX_PROVIDER_TIMEOUT_SECS
            )));
        }
        Ok(())
    }
}
