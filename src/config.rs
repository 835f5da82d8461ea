use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::enums::CheckInFrequency;
use crate::models::{CircleConfig, DEFAULT_ESCALATION_THRESHOLD, DEFAULT_MISSED_CHECK_IN_THRESHOLD_HOURS};

/// Application-level constants
pub const APP_NAME: &str = "CareCircle";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the engine configuration inside the data directory.
pub const CONFIG_FILE_NAME: &str = "engine.json";

/// File name of the care database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "care.db";

/// Get the application data directory.
/// ~/CareCircle/ on all platforms; the working directory when no home
/// directory can be determined.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

pub fn database_path() -> PathBuf {
    app_data_dir().join(DATABASE_FILE_NAME)
}

pub fn config_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "info,carecircle_lib=debug"
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine settings, read from `engine.json`. Every field may be omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between background monitor passes.
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// Threshold given to circles created without explicit settings.
    #[serde(default = "default_missed_threshold")]
    pub default_missed_check_in_threshold_hours: u32,

    #[serde(default = "default_escalation")]
    pub default_escalation_threshold: u32,

    #[serde(default)]
    pub default_check_in_frequency: CheckInFrequency,

    /// How long a writer waits for another connection's lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Overrides [`default_log_filter`]; `RUST_LOG` still wins.
    #[serde(default)]
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            default_missed_check_in_threshold_hours: default_missed_threshold(),
            default_escalation_threshold: default_escalation(),
            default_check_in_frequency: CheckInFrequency::default(),
            busy_timeout_ms: default_busy_timeout(),
            log_filter: None,
        }
    }
}

// Defaults
fn default_scan_interval() -> u64 { 60 * 60 }
fn default_missed_threshold() -> u32 { DEFAULT_MISSED_CHECK_IN_THRESHOLD_HOURS }
fn default_escalation() -> u32 { DEFAULT_ESCALATION_THRESHOLD }
fn default_busy_timeout() -> u64 { 5_000 }

impl EngineConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`EngineConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no engine config, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid("scan_interval_secs must be positive".into()));
        }
        if self.default_escalation_threshold == 0 {
            return Err(ConfigError::Invalid(
                "default_escalation_threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(default_log_filter())
    }

    /// Monitoring settings for a circle created without explicit ones.
    pub fn circle_defaults(&self) -> CircleConfig {
        CircleConfig {
            check_in_frequency: self.default_check_in_frequency,
            missed_check_in_threshold: self.default_missed_check_in_threshold_hours,
            escalation_threshold: self.default_escalation_threshold,
            ..CircleConfig::default()
        }
    }
}
