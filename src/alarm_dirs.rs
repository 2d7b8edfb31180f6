//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/alarm-clock/` | `~/.local/share/alarm-clock/` |
//! | Config | `~/Library/Application Support/alarm-clock/` | `~/.config/alarm-clock/` |
//!
//! # Environment Overrides
//!
//! - `ALARM_CLOCK_DATA_DIR` overrides [`data_dir`]
//! - `ALARM_CLOCK_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

const APP_DIR: &str = "alarm-clock";

/// Persistent data root (settings file, logs).
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ALARM_CLOCK_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/alarm-clock-data"))
}

/// Configuration directory holding `config.toml`.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("ALARM_CLOCK_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("/tmp/alarm-clock-config"))
}

/// Default settings store file (`data_dir()/alarm_clock.json`).
#[must_use]
pub fn settings_file() -> PathBuf {
    data_dir().join("alarm_clock.json")
}

/// Default config file (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_file_lives_under_data_dir() {
        assert!(settings_file().starts_with(data_dir()));
        assert_eq!(
            settings_file().file_name().and_then(|n| n.to_str()),
            Some("alarm_clock.json")
        );
    }

    #[test]
    fn config_file_lives_under_config_dir() {
        assert!(config_file().starts_with(config_dir()));
        assert!(config_file().ends_with("config.toml"));
    }
}
