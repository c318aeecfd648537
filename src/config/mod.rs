//! Configuration module
//!
//! Handles application settings: calibration parameters, logging and the
//! simulated vehicle used by the command-line front-end.

mod settings;

pub use settings::{AppConfig, CalibrationConfig, ConfigError, LoggingConfig};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "radiocal", "Radiocal").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "radiocal", "Radiocal").map(|dirs| dirs.data_dir().to_path_buf())
}

/// Get the default config file path
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE_NAME))
}

/// Get the log directory
pub fn log_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("logs"))
}
