//! Namespaced key/value settings storage.
//!
//! [`SettingsStore`] is the boundary to the device's persistent settings
//! partition: typed string/int/bool values per key, buffered writes and an
//! explicit [`commit`](SettingsStore::commit) that makes all pending writes
//! durable at once.
//!
//! Two implementations are provided:
//!
//! - [`MemorySettings`]: shared in-memory map, used by tests and as a volatile store
//! - [`FileSettings`]: JSON file, committed via write-to-temp + rename

mod file;
mod memory;

pub use file::FileSettings;
pub use memory::MemorySettings;

use serde::{Deserialize, Serialize};

/// A typed settings value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Str(String),
    Int(i32),
    Bool(bool),
}

impl SettingValue {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

/// Transactional string/int/bool storage.
///
/// Reads observe pending writes. Getters return `None` when the key is
/// absent or holds a value of another type.
pub trait SettingsStore: Send {
    /// Returns `true` if any value is stored under `key`.
    fn contains_key(&self, key: &str) -> bool;

    fn get_string(&self, key: &str) -> Option<String>;
    fn get_int(&self, key: &str) -> Option<i32>;
    fn get_bool(&self, key: &str) -> Option<bool>;

    fn set_string(&mut self, key: &str, value: &str);
    fn set_int(&mut self, key: &str, value: i32);
    fn set_bool(&mut self, key: &str, value: bool);

    /// Remove `key`. Erasing an absent key is a no-op.
    fn erase(&mut self, key: &str);

    /// Flush all pending writes and erasures.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Settings`](crate::AlarmError::Settings) or
    /// [`AlarmError::Io`](crate::AlarmError::Io) if the backing storage
    /// cannot be written. Pending state is kept so a later commit can retry.
    fn commit(&mut self) -> crate::Result<()>;

    fn int_or(&self, key: &str, default: i32) -> i32 {
        self.get_int(key).unwrap_or(default)
    }
}
