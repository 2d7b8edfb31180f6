//! Configuration types for the alarm clock host.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmClockConfig {
    /// Persistent settings store location.
    pub storage: StorageConfig,
    /// How fired alarms are presented.
    pub notification: NotificationConfig,
    /// Wake timer tuning.
    pub scheduler: SchedulerConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Settings store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON file backing the settings store.
    pub path: PathBuf,
    /// Namespace holding the alarm keys.
    pub namespace: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: crate::alarm_dirs::settings_file(),
            namespace: crate::alarm::codec::NAMESPACE.to_owned(),
        }
    }
}

/// Notification presentation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// How long the alarm label stays on screen, in milliseconds.
    pub display_ms: u64,
    /// Label shown for alarms without a name.
    pub fallback_label: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            display_ms: 5000,
            fallback_label: "Alarm".to_owned(),
        }
    }
}

impl NotificationConfig {
    /// Display duration as a [`Duration`].
    #[must_use]
    pub fn display_duration(&self) -> Duration {
        Duration::from_millis(self.display_ms)
    }
}

/// Wake timer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Delay used when the earliest alarm is already due, in milliseconds.
    ///
    /// Values below 1 are raised to 1 so the timer never fires synchronously.
    pub min_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { min_delay_ms: 1 }
    }
}

impl SchedulerConfig {
    /// Minimum arming delay, never zero.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms.max(1))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for daily log files. `None` or an empty path disables file logging.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            log_dir: None,
        }
    }
}

impl AlarmClockConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::AlarmError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::AlarmError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load the config at `path`, or defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &std::path::Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns the default config file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        crate::alarm_dirs::config_file()
    }
}
