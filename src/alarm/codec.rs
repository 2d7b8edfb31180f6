//! Alarm persistence in the settings store.
//!
//! Each alarm is written as five short keys (`an_N`, `at_N`, `ar_N`, `ai_N`,
//! `as_N`). Older firmware wrote long keys (`alarm_N`, `alarm_time_N`, ...)
//! that do not fit the 15-byte key limit for large ids; [`load_alarms`]
//! moves any such value to its short key the first time it is read and
//! erases the long key, then commits once.

use crate::alarm::model::{Alarm, AlarmId, AlarmSound, EXHAUSTED_ID};
use crate::settings::SettingsStore;
use chrono::DateTime;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Settings namespace holding all alarm keys.
pub const NAMESPACE: &str = "alarm_clock";
/// Comma-joined list of persisted alarm ids.
pub const ALARM_IDS_KEY: &str = "alarm_ids";
/// Next id to allocate.
pub const NEXT_ID_KEY: &str = "next_alarm_id";

/// A persisted alarm field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Time,
    Repeat,
    Interval,
    Sound,
}

impl Field {
    pub const ALL: [Self; 5] = [
        Self::Name,
        Self::Time,
        Self::Repeat,
        Self::Interval,
        Self::Sound,
    ];

    fn prefix(self) -> &'static str {
        match self {
            Self::Name => "an_",
            Self::Time => "at_",
            Self::Repeat => "ar_",
            Self::Interval => "ai_",
            Self::Sound => "as_",
        }
    }

    fn legacy_prefix(self) -> &'static str {
        match self {
            Self::Name => "alarm_",
            Self::Time => "alarm_time_",
            Self::Repeat => "alarm_repeat_",
            Self::Interval => "alarm_interval_",
            Self::Sound => "alarm_sound_",
        }
    }

    /// Current key for this field of alarm `id`.
    #[must_use]
    pub fn key(self, id: AlarmId) -> String {
        format!("{}{id}", self.prefix())
    }

    /// Legacy long key for this field of alarm `id`.
    #[must_use]
    pub fn legacy_key(self, id: AlarmId) -> String {
        format!("{}{id}", self.legacy_prefix())
    }
}

/// A value type that can live under a settings key.
pub trait FieldValue: Sized {
    fn read(store: &dyn SettingsStore, key: &str) -> Option<Self>;
    fn write(&self, store: &mut dyn SettingsStore, key: &str);
}

impl FieldValue for String {
    fn read(store: &dyn SettingsStore, key: &str) -> Option<Self> {
        store.get_string(key)
    }

    fn write(&self, store: &mut dyn SettingsStore, key: &str) {
        store.set_string(key, self);
    }
}

impl FieldValue for i32 {
    fn read(store: &dyn SettingsStore, key: &str) -> Option<Self> {
        store.get_int(key)
    }

    fn write(&self, store: &mut dyn SettingsStore, key: &str) {
        store.set_int(key, *self);
    }
}

impl FieldValue for bool {
    fn read(store: &dyn SettingsStore, key: &str) -> Option<Self> {
        store.get_bool(key)
    }

    fn write(&self, store: &mut dyn SettingsStore, key: &str) {
        store.set_bool(key, *self);
    }
}

/// Tracks settings writes made while reading, so the load pass knows
/// whether it has to commit.
pub struct Migrator<'a> {
    store: &'a mut dyn SettingsStore,
    writes: usize,
}

impl<'a> Migrator<'a> {
    pub fn new(store: &'a mut dyn SettingsStore) -> Self {
        Self { store, writes: 0 }
    }

    /// Number of writes/erasures performed so far.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Read `field` of alarm `id`, migrating a legacy value if needed.
    ///
    /// - current key present: use it, erase any legacy key
    /// - only legacy key present: copy it to the current key, erase the legacy key
    /// - neither: `None`, and any legacy key of the wrong type is erased
    pub fn field<T: FieldValue>(&mut self, field: Field, id: AlarmId) -> Option<T> {
        let key = field.key(id);
        let legacy_key = field.legacy_key(id);

        let value = match T::read(&*self.store, &key) {
            Some(value) => Some(value),
            None => {
                let legacy = T::read(&*self.store, &legacy_key);
                if let Some(value) = &legacy {
                    debug!(alarm_id = id, key = %legacy_key, "migrating legacy alarm key");
                    value.write(&mut *self.store, &key);
                    self.writes += 1;
                }
                legacy
            }
        };

        if self.store.contains_key(&legacy_key) {
            self.store.erase(&legacy_key);
            self.writes += 1;
        }
        value
    }

    /// [`field`](Self::field) with a default for absent values.
    pub fn field_or<T: FieldValue>(&mut self, field: Field, id: AlarmId, default: T) -> T {
        self.field(field, id).unwrap_or(default)
    }

    fn set<T: FieldValue>(&mut self, field: Field, id: AlarmId, value: &T) {
        value.write(&mut *self.store, &field.key(id));
        self.writes += 1;
    }

    fn erase_alarm(&mut self, id: AlarmId) {
        erase_alarm(&mut *self.store, id);
        self.writes += 1;
    }

    fn set_ids<'i>(&mut self, ids: impl IntoIterator<Item = &'i AlarmId>) {
        self.store.set_string(ALARM_IDS_KEY, &join_ids(ids));
        self.writes += 1;
    }
}

/// Write all fields of `alarm` under the current key scheme.
pub fn persist_alarm(store: &mut dyn SettingsStore, alarm: &Alarm) {
    store.set_string(&Field::Name.key(alarm.id), &alarm.name);
    store.set_string(&Field::Time.key(alarm.id), &alarm.time.to_string());
    store.set_bool(&Field::Repeat.key(alarm.id), alarm.repeat);
    store.set_int(&Field::Interval.key(alarm.id), alarm.interval);
    store.set_string(&Field::Sound.key(alarm.id), alarm.sound.as_str());
}

/// Erase every key of alarm `id`, in both key schemes.
pub fn erase_alarm(store: &mut dyn SettingsStore, id: AlarmId) {
    for field in Field::ALL {
        store.erase(&field.key(id));
        store.erase(&field.legacy_key(id));
    }
}

/// Rewrite the id list from `ids`.
pub fn persist_ids<'i>(store: &mut dyn SettingsStore, ids: impl IntoIterator<Item = &'i AlarmId>) {
    store.set_string(ALARM_IDS_KEY, &join_ids(ids));
}

/// Join ids with commas, in iteration order.
pub fn join_ids<'i>(ids: impl IntoIterator<Item = &'i AlarmId>) -> String {
    ids.into_iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-joined id list.
///
/// Empty tokens are skipped; tokens that are not positive integers are
/// dropped with a warning.
#[must_use]
pub fn parse_id_list(raw: &str) -> Vec<AlarmId> {
    raw.split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<AlarmId>() {
            Ok(id) if id > 0 => Some(id),
            _ => {
                warn!(token, "invalid alarm id entry");
                None
            }
        })
        .collect()
}

/// Parse a persisted fire time.
///
/// Accepts a decimal integer with surrounding whitespace; rejects values
/// outside the range of a UTC timestamp.
#[must_use]
pub fn parse_time(raw: &str) -> Option<i64> {
    let seconds = raw.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(seconds, 0).map(|_| seconds)
}

/// Alarms restored from storage.
#[derive(Debug, Clone, Default)]
pub struct LoadedAlarms {
    /// Valid alarms by id.
    pub alarms: BTreeMap<AlarmId, Alarm>,
    /// Next id to allocate, greater than every loaded id.
    pub next_id: AlarmId,
    /// Ids dropped because their time was missing or invalid, or the id is reserved.
    pub dropped: Vec<AlarmId>,
}

/// Load every alarm listed in the id list.
///
/// Migrates legacy keys, drops records without a valid time, normalizes
/// invalid sounds, repairs the id counter and commits any writes it made.
/// Never fails: a commit error is logged and the loaded data is returned.
pub fn load_alarms(store: &mut dyn SettingsStore) -> LoadedAlarms {
    let ids = store
        .get_string(ALARM_IDS_KEY)
        .map(|raw| parse_id_list(&raw))
        .unwrap_or_default();

    let mut loaded = LoadedAlarms::default();
    let mut migrator = Migrator::new(store);

    for id in ids {
        if loaded.alarms.contains_key(&id) {
            continue;
        }
        if id >= EXHAUSTED_ID {
            warn!(alarm_id = id, "reserved alarm id, dropping it");
            migrator.erase_alarm(id);
            loaded.dropped.push(id);
            continue;
        }
        match load_alarm(&mut migrator, id) {
            Some(alarm) => {
                loaded.alarms.insert(id, alarm);
            }
            None => {
                migrator.erase_alarm(id);
                loaded.dropped.push(id);
            }
        }
    }

    if !loaded.dropped.is_empty() {
        migrator.set_ids(loaded.alarms.keys());
    }

    let stored_next = migrator.store.int_or(NEXT_ID_KEY, 1);
    let mut next_id = stored_next.max(1);
    if let Some(max_id) = loaded.alarms.keys().next_back()
        && next_id <= *max_id
    {
        next_id = max_id + 1;
    }
    if next_id != stored_next {
        warn!(stored = stored_next, repaired = next_id, "repairing alarm id counter");
        migrator.store.set_int(NEXT_ID_KEY, next_id);
        migrator.writes += 1;
    }
    loaded.next_id = next_id;

    if migrator.writes() > 0 {
        info!(writes = migrator.writes(), "committing alarm storage repairs");
        if let Err(e) = migrator.store.commit() {
            warn!("cannot commit alarm storage migration: {e}");
        }
    }

    debug!(
        count = loaded.alarms.len(),
        next_id = loaded.next_id,
        "loaded alarms"
    );
    loaded
}

fn load_alarm(migrator: &mut Migrator<'_>, id: AlarmId) -> Option<Alarm> {
    let name: String = migrator.field_or(Field::Name, id, String::new());
    let repeat = migrator.field_or(Field::Repeat, id, false);
    let interval = migrator.field_or(Field::Interval, id, 0);
    let stored_sound: Option<String> = migrator.field(Field::Sound, id);
    let raw_time: Option<String> = migrator.field(Field::Time, id);

    let time = match raw_time.as_deref().map(parse_time) {
        Some(Some(time)) => time,
        Some(None) => {
            warn!(alarm_id = id, raw = ?raw_time, "invalid time for alarm, dropping it");
            return None;
        }
        None => {
            warn!(alarm_id = id, "missing time for alarm, dropping it");
            return None;
        }
    };

    let sound = match stored_sound.as_deref() {
        Some(raw) => match AlarmSound::parse(raw) {
            Some(sound) => sound,
            None => {
                warn!(alarm_id = id, sound = raw, "invalid sound for alarm");
                let sound = AlarmSound::default();
                migrator.set(Field::Sound, id, &sound.as_str().to_owned());
                sound
            }
        },
        None => AlarmSound::default(),
    };

    Some(Alarm {
        id,
        time,
        repeat,
        interval,
        name,
        sound,
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::settings::{MemorySettings, SettingValue};

    fn seed_legacy(store: &mut MemorySettings, id: AlarmId, time: &str, name: &str) {
        store.set_string(&format!("alarm_{id}"), name);
        store.set_string(&format!("alarm_time_{id}"), time);
        store.set_bool(&format!("alarm_repeat_{id}"), true);
        store.set_int(&format!("alarm_interval_{id}"), 15);
        store.set_string(&format!("alarm_sound_{id}"), "ALARM2");
    }

    #[test]
    fn keys_fit_the_short_scheme() {
        assert_eq!(Field::Time.key(42), "at_42");
        assert_eq!(Field::Time.legacy_key(42), "alarm_time_42");
        assert_eq!(Field::Name.legacy_key(7), "alarm_7");
        assert!(Field::Interval.key(AlarmId::MAX).len() <= 15);
    }

    #[test]
    fn id_list_tolerates_noise() {
        assert_eq!(parse_id_list("1,2,3"), vec![1, 2, 3]);
        assert_eq!(parse_id_list(",,4, ,5,"), vec![4, 5]);
        assert_eq!(parse_id_list("6,abc,7x,-1,0,8"), vec![6, 8]);
        assert!(parse_id_list("").is_empty());
        assert_eq!(join_ids(&[3, 1, 2]), "3,1,2");
        assert_eq!(join_ids(&[]), "");
    }

    #[test]
    fn time_parsing_is_strict() {
        assert_eq!(parse_time(" 1700000000 "), Some(1_700_000_000));
        assert_eq!(parse_time("-5"), Some(-5));
        assert_eq!(parse_time(""), None);
        assert_eq!(parse_time("12abc"), None);
        assert_eq!(parse_time("99999999999999999999999"), None);
        assert_eq!(parse_time(&i64::MAX.to_string()), None);
    }

    #[test]
    fn persist_then_load_round_trips() {
        let mut store = MemorySettings::new();
        let alarm = Alarm::repeating(1_700_000_000, 10, "Standup")
            .with_id(3)
            .with_sound(AlarmSound::Alarm3);
        persist_alarm(&mut store, &alarm);
        persist_ids(&mut store, &[3]);
        store.set_int(NEXT_ID_KEY, 4);

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms.get(&3), Some(&alarm));
        assert_eq!(loaded.next_id, 4);
        assert!(loaded.dropped.is_empty());
        assert_eq!(store.commit_count(), 0, "clean load must not commit");
    }

    #[test]
    fn legacy_keys_migrate_once() {
        let mut store = MemorySettings::new();
        seed_legacy(&mut store, 5, "1700000000", "Pills");
        store.set_string(ALARM_IDS_KEY, "5");

        let first = load_alarms(&mut store);
        let alarm = first.alarms.get(&5).expect("migrated alarm");
        assert_eq!(alarm.name, "Pills");
        assert_eq!(alarm.time, 1_700_000_000);
        assert!(alarm.repeat);
        assert_eq!(alarm.interval, 15);
        assert_eq!(alarm.sound, AlarmSound::Alarm2);
        assert_eq!(store.commit_count(), 1);

        let committed = store.committed();
        assert!(committed.keys().all(|k| !k.starts_with("alarm_") || k == ALARM_IDS_KEY));
        assert_eq!(
            committed.get("at_5"),
            Some(&SettingValue::Str("1700000000".to_owned()))
        );

        let second = load_alarms(&mut store);
        assert_eq!(second.alarms, first.alarms);
        assert_eq!(second.next_id, first.next_id);
        assert_eq!(store.commit_count(), 1, "second load finds nothing to migrate");
    }

    #[test]
    fn current_key_wins_over_legacy() {
        let mut store = MemorySettings::new();
        seed_legacy(&mut store, 1, "100", "old");
        store.set_string("an_1", "new");
        store.set_string(ALARM_IDS_KEY, "1");

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms[&1].name, "new");
        assert!(!store.contains_key("alarm_1"));
    }

    #[test]
    fn missing_or_corrupt_time_drops_the_record() {
        let mut store = MemorySettings::new();
        persist_alarm(&mut store, &Alarm::once(500, "good").with_id(1));
        persist_alarm(&mut store, &Alarm::once(0, "bad").with_id(2));
        store.set_string(&Field::Time.key(2), "soon");
        persist_alarm(&mut store, &Alarm::once(0, "gone").with_id(3));
        store.erase(&Field::Time.key(3));
        store.set_string(ALARM_IDS_KEY, "1,2,3");

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(loaded.dropped, vec![2, 3]);
        assert_eq!(store.get_string(ALARM_IDS_KEY).as_deref(), Some("1"));
        assert!(!store.contains_key("an_2"));
        assert!(!store.contains_key("an_3"));
    }

    #[test]
    fn invalid_sound_is_normalized_and_kept() {
        let mut store = MemorySettings::new();
        persist_alarm(&mut store, &Alarm::once(500, "x").with_id(1));
        store.set_string(&Field::Sound.key(1), "FOGHORN");
        store.set_string(ALARM_IDS_KEY, "1");

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms[&1].sound, AlarmSound::Alarm1);
        assert_eq!(store.get_string("as_1").as_deref(), Some("ALARM1"));
    }

    #[test]
    fn next_id_is_repaired_past_max_id() {
        let mut store = MemorySettings::new();
        persist_alarm(&mut store, &Alarm::once(1, "a").with_id(9));
        store.set_string(ALARM_IDS_KEY, "9");
        store.set_int(NEXT_ID_KEY, 2);

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.next_id, 10);
        assert_eq!(store.get_int(NEXT_ID_KEY), Some(10));
    }

    #[test]
    fn next_id_defaults_and_clamps() {
        let mut empty = MemorySettings::new();
        assert_eq!(load_alarms(&mut empty).next_id, 1);

        let mut negative = MemorySettings::new();
        negative.set_int(NEXT_ID_KEY, -4);
        assert_eq!(load_alarms(&mut negative).next_id, 1);
    }

    #[test]
    fn reserved_id_is_dropped_and_counter_stays_usable() {
        let mut store = MemorySettings::new();
        persist_alarm(&mut store, &Alarm::once(1, "low").with_id(3));
        persist_alarm(&mut store, &Alarm::once(1, "top").with_id(EXHAUSTED_ID));
        store.set_string(ALARM_IDS_KEY, &format!("3,{EXHAUSTED_ID}"));
        store.set_int(NEXT_ID_KEY, EXHAUSTED_ID);

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms.keys().copied().collect::<Vec<_>>(), vec![3]);
        assert_eq!(loaded.dropped, vec![EXHAUSTED_ID]);
        assert_eq!(store.get_string(ALARM_IDS_KEY).as_deref(), Some("3"));
        assert!(!store.contains_key(&Field::Name.key(EXHAUSTED_ID)));
        assert!(loaded.alarms.keys().all(|id| *id < loaded.next_id));
    }

    #[test]
    fn duplicate_ids_load_once() {
        let mut store = MemorySettings::new();
        persist_alarm(&mut store, &Alarm::once(1, "a").with_id(2));
        store.set_string(ALARM_IDS_KEY, "2,2");

        let loaded = load_alarms(&mut store);
        assert_eq!(loaded.alarms.len(), 1);
        assert!(loaded.dropped.is_empty());
    }

    #[test]
    fn erase_removes_both_schemes() {
        let mut store = MemorySettings::new();
        seed_legacy(&mut store, 4, "1", "x");
        persist_alarm(&mut store, &Alarm::once(1, "x").with_id(4));
        erase_alarm(&mut store, 4);
        assert!(store.keys().is_empty());
    }
}
