//! Application settings

use crate::core::session::CalibrationSettings;
use crate::core::simulator::SimulatorConfig;
use crate::core::statustext::DEFAULT_MARKER;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home or config directory on this platform
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// Reading or writing the file failed
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File is not valid TOML for this config
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be encoded
    #[error("Failed to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Calibration parameters
    pub calibration: CalibrationConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Simulated vehicle
    pub simulator: SimulatorConfig,
}

impl AppConfig {
    /// Load config from the default location
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        Self::load_from(&path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = super::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Save config to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Settings for a calibration session
    pub fn calibration_settings(&self) -> CalibrationSettings {
        CalibrationSettings {
            marker: self.calibration.marker.clone(),
            param_changed: self.calibration.param_changed.clone(),
            target_component: self.calibration.target_component,
        }
    }
}

/// Calibration parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Tag that marks calibration status lines
    pub marker: String,
    /// Parameter reported as changed after a calibration ends
    pub param_changed: String,
    /// Component the calibration command is addressed to
    pub target_component: u8,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        let settings = CalibrationSettings::default();
        Self {
            marker: DEFAULT_MARKER.to_string(),
            param_changed: settings.param_changed,
            target_component: settings.target_component,
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    /// Emit JSON instead of human-readable lines
    pub json: bool,
    /// Also write to a daily log file
    pub file_logging: bool,
    /// Log directory
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
            file_logging: false,
            directory: super::log_dir(),
        }
    }
}
