//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/optrack/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/optrack/` (~/.config/optrack/)
//! - State/Logs: `$XDG_STATE_HOME/optrack/` (~/.local/state/optrack/)
//!
//! Nothing else is written to disk; tracked operations live in memory only.

use crate::error::{Error, Result};
use crate::notifications::NotificationConfig;
use crate::tracker::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// History archive configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// User-facing notification settings
    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

/// History archive configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryConfig {
    /// Maximum number of terminated operations kept
    #[serde(default = "default_history_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.history.capacity == 0 {
            return Err(Error::Config(
                "history.capacity must be at least 1".to_string(),
            ));
        }
        if self.notifications.progress_interval == 0 {
            return Err(Error::Config(
                "notifications.progress_interval must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/optrack/config.toml` (~/.config/optrack/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("optrack").join("config.toml")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/optrack/` (~/.local/state/optrack/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("optrack")
    }

    /// Returns the log file prefix path; rotated files get a date suffix
    ///
    /// `$XDG_STATE_HOME/optrack/optrack.log` (~/.local/state/optrack/optrack.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("optrack.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.history.capacity, 100);
        assert!(config.notifications.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[logging]
level = "debug"

[history]
capacity = 25

[notifications]
on_progress = true
progress_interval = 2
sound = true
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.max_files, 5);
        assert_eq!(config.history.capacity, 25);
        assert!(config.notifications.on_progress);
        assert!(config.notifications.sound);
        assert_eq!(config.notifications.progress_interval, 2);
        // untouched keys keep their defaults
        assert!(config.notifications.on_complete);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = Config::default();
        config.history.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history]\ncapacity = 7\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.history.capacity, 7);
    }

    #[test]
    fn test_load_from_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[history]\ncapacity = 0\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_log_path_under_state_dir() {
        assert!(Config::log_path().starts_with(Config::state_dir()));
        assert!(Config::config_path().ends_with("optrack/config.toml"));
    }
}
