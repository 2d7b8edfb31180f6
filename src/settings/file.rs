//! JSON-file settings store.

use super::{SettingValue, SettingsStore};
use crate::error::{AlarmError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const DOCUMENT_VERSION: u32 = 1;

type Namespace = BTreeMap<String, SettingValue>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    namespaces: BTreeMap<String, Namespace>,
}

fn default_version() -> u32 {
    DOCUMENT_VERSION
}

/// Settings store persisted as one JSON document.
///
/// Each store instance owns a single namespace of the document; other
/// namespaces are preserved across commits. Commits write a sibling temp
/// file and rename it over the target, so readers never observe a partial
/// document.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    namespace: String,
    document: SettingsDocument,
    working: Namespace,
}

impl FileSettings {
    /// Open `namespace` inside the document at `path`.
    ///
    /// A missing file opens as empty. A file that cannot be parsed is
    /// logged and treated as empty; it is replaced on the next commit.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Io`] if the file exists but cannot be read.
    pub fn open(path: impl Into<PathBuf>, namespace: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let namespace = namespace.into();

        let document = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<SettingsDocument>(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), "cannot parse settings file, starting empty: {e}");
                    SettingsDocument::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsDocument::default(),
            Err(e) => return Err(AlarmError::Io(e)),
        };

        let working = document
            .namespaces
            .get(&namespace)
            .cloned()
            .unwrap_or_default();
        debug!(
            path = %path.display(),
            namespace = %namespace,
            keys = working.len(),
            "opened settings namespace"
        );

        Ok(Self {
            path,
            namespace,
            document,
            working,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Namespace this store reads and writes.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SettingsStore for FileSettings {
    fn contains_key(&self, key: &str) -> bool {
        self.working.contains_key(key)
    }

    fn get_string(&self, key: &str) -> Option<String> {
        self.working
            .get(key)
            .and_then(|v| v.as_str().map(str::to_owned))
    }

    fn get_int(&self, key: &str) -> Option<i32> {
        self.working.get(key).and_then(SettingValue::as_int)
    }

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.working.get(key).and_then(SettingValue::as_bool)
    }

    fn set_string(&mut self, key: &str, value: &str) {
        self.working
            .insert(key.to_owned(), SettingValue::Str(value.to_owned()));
    }

    fn set_int(&mut self, key: &str, value: i32) {
        self.working.insert(key.to_owned(), SettingValue::Int(value));
    }

    fn set_bool(&mut self, key: &str, value: bool) {
        self.working.insert(key.to_owned(), SettingValue::Bool(value));
    }

    fn erase(&mut self, key: &str) {
        self.working.remove(key);
    }

    fn commit(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        self.document.version = DOCUMENT_VERSION;
        self.document
            .namespaces
            .insert(self.namespace.clone(), self.working.clone());

        let json = serde_json::to_vec_pretty(&self.document)
            .map_err(|e| AlarmError::Settings(format!("cannot serialize settings: {e}")))?;

        let temp = self.temp_path();
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn missing_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSettings::open(dir.path().join("absent.json"), "alarm_clock").unwrap();
        assert!(!store.contains_key("alarm_ids"));
        assert_eq!(store.namespace(), "alarm_clock");
    }

    #[test]
    fn committed_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = FileSettings::open(&path, "alarm_clock").unwrap();
        store.set_string("alarm_ids", "1,2");
        store.set_int("next_alarm_id", 3);
        store.set_bool("ar_1", true);
        store.commit().unwrap();

        let reopened = FileSettings::open(&path, "alarm_clock").unwrap();
        assert_eq!(reopened.get_string("alarm_ids").as_deref(), Some("1,2"));
        assert_eq!(reopened.get_int("next_alarm_id"), Some(3));
        assert_eq!(reopened.get_bool("ar_1"), Some(true));
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[test]
    fn uncommitted_writes_are_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut store = FileSettings::open(&path, "alarm_clock").unwrap();
        store.set_int("next_alarm_id", 5);
        drop(store);

        let reopened = FileSettings::open(&path, "alarm_clock").unwrap();
        assert_eq!(reopened.get_int("next_alarm_id"), None);
    }

    #[test]
    fn other_namespaces_are_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let mut wifi = FileSettings::open(&path, "wifi").unwrap();
        wifi.set_string("ssid", "home");
        wifi.commit().unwrap();

        let mut alarms = FileSettings::open(&path, "alarm_clock").unwrap();
        alarms.set_string("alarm_ids", "1");
        alarms.commit().unwrap();

        let wifi = FileSettings::open(&path, "wifi").unwrap();
        assert_eq!(wifi.get_string("ssid").as_deref(), Some("home"));
        assert!(!wifi.contains_key("alarm_ids"));
    }

    #[test]
    fn corrupt_file_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();

        let mut store = FileSettings::open(&path, "alarm_clock").unwrap();
        assert!(!store.contains_key("alarm_ids"));
        store.set_string("alarm_ids", "");
        store.commit().unwrap();

        let reopened = FileSettings::open(&path, "alarm_clock").unwrap();
        assert!(reopened.contains_key("alarm_ids"));
    }
}
