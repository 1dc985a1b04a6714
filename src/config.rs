//! Configuration management for Keyboard RepeatKit
//!
//! Configuration is stored as TOML in a platform-specific config file.
//!
//! ## Config File Locations
//!
//! | Platform | Path |
//! |----------|------|
//! | Linux | `~/.config/keyboard-repeatkit/config.toml` |
//! | macOS | `~/Library/Application Support/keyboard-repeatkit/config.toml` |
//! | Windows | `%APPDATA%\keyboard-repeatkit\config.toml` |
//!
//! ## Example
//!
//! ```no_run
//! use keyboard_repeatkit::Config;
//!
//! let mut config = Config::load().unwrap_or_default();
//! config.repeat.interval_ms = 30;
//! config.save().expect("Failed to save config");
//! ```

use crate::dispatch::UnbindPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}

/// Returns the path to the config file, creating its directory if needed.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
    let app_dir = config_dir.join("keyboard-repeatkit");

    if !app_dir.exists() {
        fs::create_dir_all(&app_dir)?;
    }

    Ok(app_dir.join("config.toml"))
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub repeat: RepeatConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub input: InputConfig,
}

/// Session repeat settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepeatConfig {
    /// Repeat cadence in milliseconds
    pub interval_ms: u64,
    pub unbind_policy: UnbindPolicy,
}

impl Default for RepeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 33,
            unbind_policy: UnbindPolicy::PreserveInFlight,
        }
    }
}

impl RepeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Repeat-rate calibration settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Presses skipped before sampling starts (covers the initial repeat delay)
    pub warmup: u32,
    /// Presses sampled after warmup
    pub window: u32,
    /// Delay before the first completion check, in milliseconds
    pub first_check_ms: u64,
    /// Delay between later completion checks, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            warmup: 100,
            window: 1000,
            first_check_ms: 40_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl CalibrationConfig {
    pub fn first_check(&self) -> Duration {
        Duration::from_millis(self.first_check_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Give up after twice the first-check delay
    pub fn fail_safe(&self) -> Duration {
        self.first_check() * 2
    }

    /// Presses needed to finish the window
    pub fn needed(&self) -> u32 {
        self.warmup.saturating_add(self.window)
    }
}

/// Where physical key events come from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Evdev on Linux when accessible, device_query otherwise
    #[default]
    Auto,
    Evdev,
    DeviceQuery,
}

/// Input source settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub backend: Backend,
    /// How often hardware listeners are polled, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Auto,
            poll_interval_ms: 1,
        }
    }
}

impl InputConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Config {
    /// Load configuration from the default config file.
    ///
    /// Returns the default configuration if the file doesn't exist.
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values no session or calibrator can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.repeat.interval_ms == 0 {
            return Err(ConfigError::Invalid("repeat.interval_ms must be at least 1"));
        }
        let c = &self.calibration;
        if c.warmup == 0 || c.window == 0 {
            return Err(ConfigError::Invalid("calibration warmup and window must be at least 1"));
        }
        if c.first_check_ms == 0 || c.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("calibration check intervals must be non-zero"));
        }
        Ok(())
    }

    /// Save configuration to the default config file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_path()?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn repeat_interval(&self) -> Duration {
        self.repeat.interval()
    }

    pub fn poll_interval(&self) -> Duration {
        self.input.poll_interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default_values() {
        let config = Config::default();
        assert_eq!(config.repeat.interval_ms, 33);
        assert_eq!(config.repeat.unbind_policy, UnbindPolicy::PreserveInFlight);
        assert_eq!(config.calibration.warmup, 100);
        assert_eq!(config.calibration.window, 1000);
        assert_eq!(config.calibration.needed(), 1100);
        assert_eq!(config.input.backend, Backend::Auto);
    }

    #[test]
    fn fail_safe_is_twice_first_check() {
        let config = CalibrationConfig::default();
        assert_eq!(config.first_check(), Duration::from_secs(40));
        assert_eq!(config.fail_safe(), Duration::from_secs(80));
    }

    #[test]
    fn poll_interval_never_zero() {
        let mut config = Config::default();
        config.input.poll_interval_ms = 0;
        assert_eq!(config.poll_interval(), Duration::from_millis(1));
    }

    #[test]
    fn config_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.repeat.interval_ms = 25;
        config.repeat.unbind_policy = UnbindPolicy::Interrupt;
        config.input.backend = Backend::DeviceQuery;

        config.save_to(&path).expect("Failed to save config");
        let loaded = Config::load_from(&path).expect("Failed to load config");

        assert_eq!(loaded, config);
    }

    #[test]
    fn config_load_missing_file_is_io_error() {
        let result = Config::load_from(Path::new("/nonexistent/path/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn config_deserializes_partial_toml() {
        let toml_str = r#"
[repeat]
interval_ms = 30
unbind_policy = "interrupt"

[input]
backend = "evdev"
"#;

        let config: Config = toml::from_str(toml_str).expect("Failed to deserialize");

        assert_eq!(config.repeat.interval(), Duration::from_millis(30));
        assert_eq!(config.repeat.unbind_policy, UnbindPolicy::Interrupt);
        assert_eq!(config.input.backend, Backend::Evdev);
        assert_eq!(config.input.poll_interval_ms, 1);
        assert_eq!(config.calibration, CalibrationConfig::default());
    }

    #[test]
    fn config_serializes_sections() {
        let toml_str = toml::to_string_pretty(&Config::default()).expect("Failed to serialize");
        assert!(toml_str.contains("[repeat]"));
        assert!(toml_str.contains("[calibration]"));
        assert!(toml_str.contains("[input]"));
        assert!(toml_str.contains("unbind_policy = \"preserve_in_flight\""));
    }

    #[test]
    fn config_rejects_zero_repeat_interval() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[repeat]\ninterval_ms = 0\n").expect("Failed to write config");

        let result = Config::load_from(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn config_rejects_empty_calibration_window() {
        let mut config = Config::default();
        config.calibration.window = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn config_parse_error_display() {
        let err = toml::from_str::<Config>("[repeat]\ninterval_ms = \"fast\"").unwrap_err();
        let err = ConfigError::from(err);
        assert!(err.to_string().starts_with("Parse error"));
        assert_eq!(ConfigError::NoConfigDir.to_string(), "Could not determine config directory");
    }
}
