//! Configuration management (qcwatch.toml).
//!
//! All engine tunables live here: correlation windows, retention policy,
//! storage location, and logging. Every section is optional in the file;
//! missing fields fall back to defaults so an empty file is a valid config.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Default grace window after a Complete event before a session finalizes.
pub const DEFAULT_GRACE_WINDOW_MS: i64 = 15_000;

/// Default multiple of `max_time` after which a session is abandoned.
pub const DEFAULT_TIMEOUT_MULTIPLIER: f64 = 3.0;

/// Default absolute abandonment cutoff for sessions without a known
/// `max_time` (8 hours).
pub const DEFAULT_FALLBACK_ABANDON_MS: i64 = 8 * 60 * 60 * 1_000;

/// Default retention window for finalized entries (days).
pub const DEFAULT_RETENTION_MAX_AGE_DAYS: u64 = 90;

/// Default cap on the number of finalized entries kept.
pub const DEFAULT_RETENTION_MAX_ENTRIES: usize = 5_000;

/// Top-level configuration for qcwatch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QcwatchConfig {
    /// Session correlation tunables.
    pub correlator: CorrelatorConfig,
    /// Retention policy for finalized entries.
    pub retention: RetentionConfig,
    /// Storage backend settings.
    pub storage: StorageConfig,
    /// Logging settings.
    pub log: LogConfig,
}

/// Session correlator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelatorConfig {
    /// Time allowed after a Complete event for a trailing Transition (ms).
    pub grace_window_ms: i64,
    /// Sessions older than `max_time * timeout_multiplier` are canceled.
    pub timeout_multiplier: f64,
    /// Absolute abandonment cutoff when a session has no known max_time (ms).
    pub fallback_abandon_ms: i64,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            grace_window_ms: DEFAULT_GRACE_WINDOW_MS,
            timeout_multiplier: DEFAULT_TIMEOUT_MULTIPLIER,
            fallback_abandon_ms: DEFAULT_FALLBACK_ABANDON_MS,
        }
    }
}

/// Retention policy for finalized dashboard entries.
///
/// Setting a knob to 0 disables that policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Delete finalized entries older than this many days (0 = keep forever).
    pub max_age_days: u64,
    /// Keep at most this many finalized entries (0 = unlimited).
    pub max_entries: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: DEFAULT_RETENTION_MAX_AGE_DAYS,
            max_entries: DEFAULT_RETENTION_MAX_ENTRIES,
        }
    }
}

/// Storage backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("qcwatch.db"),
        }
    }
}

impl QcwatchConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        let config: Self =
            toml::from_str(&raw).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a path if given, from the default location if it exists,
    /// or fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::load(p),
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::load(&default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Validate config values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.correlator.grace_window_ms < 0 {
            return Err(ConfigError::ValidationError(
                "correlator.grace_window_ms must be >= 0".to_string(),
            ));
        }
        if self.correlator.timeout_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(
                "correlator.timeout_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.correlator.fallback_abandon_ms <= 0 {
            return Err(ConfigError::ValidationError(
                "correlator.fallback_abandon_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Default config file location: `$QCWATCH_CONFIG`, else `./qcwatch.toml`.
pub fn default_config_path() -> PathBuf {
    std::env::var_os("QCWATCH_CONFIG")
        .map_or_else(|| PathBuf::from("qcwatch.toml"), PathBuf::from)
}
