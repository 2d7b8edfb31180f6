//! In-memory settings store.

use super::{SettingValue, SettingsStore};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct MemoryState {
    working: BTreeMap<String, SettingValue>,
    committed: BTreeMap<String, SettingValue>,
    commits: usize,
    fail_commits: bool,
}

/// Volatile settings store with commit tracking.
///
/// Clones share the same underlying map, so a test can hand one clone to an
/// [`AlarmManager`](crate::AlarmManager) and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MemorySettings {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySettings {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of the last committed values.
    #[must_use]
    pub fn committed(&self) -> BTreeMap<String, SettingValue> {
        self.state().committed.clone()
    }

    /// Keys currently visible (committed or pending), in order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.state().working.keys().cloned().collect()
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.state().commits
    }

    /// Make subsequent commits fail (simulates a flash write error).
    pub fn set_fail_commits(&self, fail: bool) {
        self.state().fail_commits = fail;
    }

    /// Discard pending writes, reverting to the last committed state.
    pub fn rollback(&self) {
        let mut state = self.state();
        state.working = state.committed.clone();
    }

    fn get(&self, key: &str) -> Option<SettingValue> {
        self.state().working.get(key).cloned()
    }

    fn put(&self, key: &str, value: SettingValue) {
        self.state().working.insert(key.to_owned(), value);
    }
}

impl SettingsStore for MemorySettings {
    fn contains_key(&self, key: &str) -> bool {
        self.state().working.contains_key(key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.as_str().map(str::to_owned))
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(|v| v.as_int())
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.put(key, SettingValue::Str(value.to_owned()));
    }

    fn set_int(&mut self, key: &str, value: i32) {
        self.put(key, SettingValue::Int(value));
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.put(key, SettingValue::Bool(value));
    }

    fn erase(&mut self, key: &str) {
        self.state().working.remove(key);
    }

    fn commit(&mut self) -> crate::Result<()> {
        let mut state = self.state();
        if state.fail_commits {
            return Err(crate::AlarmError::Settings(
                "simulated commit failure".to_owned(),
            ));
        }
        state.committed = state.working.clone();
        state.commits += 1;
        Ok(())
    }
}
