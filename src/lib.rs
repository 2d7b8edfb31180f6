//! Alarm clock core for an embedded voice assistant.
//!
//! Keeps user alarms in memory and in a transactional key/value settings
//! store, and drives them from a single shared wake timer:
//!
//! - **Store**: [`AlarmManager`] owns the alarm table, id allocation and the lock
//! - **Codec**: alarms map to short settings keys, with one-time migration
//!   from the legacy long-key scheme
//! - **Scheduler**: one timer, always armed for the earliest alarm
//! - **Dispatcher**: on wake, hands due alarms to the notification worker
//!   and re-arms repeating alarms or deletes one-shot ones

pub mod alarm;
pub mod alarm_dirs;
pub mod config;
pub mod error;
pub mod host;
pub mod settings;

pub use alarm::{
    Alarm, AlarmId, AlarmManager, AlarmManagerBuilder, AlarmNotification, AlarmSound,
    NotificationSink, NotificationWorker,
};
pub use config::AlarmClockConfig;
pub use error::{AlarmError, Result};
pub use settings::{FileSettings, MemorySettings, SettingsStore};
