//! Alarm record and alert sounds.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Alarm identifier. Values `<= 0` ask the store to allocate one.
pub type AlarmId = i32;

/// Counter value meaning the id space is used up. Never a stored id.
pub const EXHAUSTED_ID: AlarmId = AlarmId::MAX;

/// Seconds in one repeat-interval unit.
pub const SECONDS_PER_MINUTE: i64 = 60;

/// Permitted alert sounds.
///
/// Unknown names normalize to [`AlarmSound::Alarm1`], both when alarms are
/// added through the API and when they are read back from storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlarmSound {
    #[default]
    Alarm1,
    Alarm2,
    Alarm3,
}

impl AlarmSound {
    /// All sounds, default first.
    pub const ALL: [Self; 3] = [Self::Alarm1, Self::Alarm2, Self::Alarm3];

    /// Stored name of the sound.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alarm1 => "ALARM1",
            Self::Alarm2 => "ALARM2",
            Self::Alarm3 => "ALARM3",
        }
    }

    /// Parse an exact stored name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|sound| sound.as_str() == raw)
    }

    /// Parse a stored name, falling back to the default sound.
    #[must_use]
    pub fn normalize(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|| {
            warn!(sound = raw, "unknown alarm sound, using {}", Self::default());
            Self::default()
        })
    }

    /// Playable clip for this sound.
    #[must_use]
    pub fn clip(self) -> SoundClip {
        SoundClip(match self {
            Self::Alarm1 => "sounds/alarm1.ogg",
            Self::Alarm2 => "sounds/alarm2.ogg",
            Self::Alarm3 => "sounds/alarm3.ogg",
        })
    }
}

impl fmt::Display for AlarmSound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for AlarmSound {
    fn from(raw: String) -> Self {
        Self::normalize(&raw)
    }
}

impl From<AlarmSound> for String {
    fn from(sound: AlarmSound) -> Self {
        sound.as_str().to_owned()
    }
}

/// Reference to a bundled audio clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SoundClip(&'static str);

impl SoundClip {
    /// Asset path of the clip.
    #[must_use]
    pub fn path(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for SoundClip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// One scheduled alarm.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Alarm {
    /// Store key; `<= 0` on input means "allocate".
    pub id: AlarmId,
    /// Next fire time, Unix epoch seconds.
    pub time: i64,
    /// Re-arm after firing instead of deleting.
    pub repeat: bool,
    /// Repeat period in minutes. Ignored unless `repeat` is set.
    pub interval: i32,
    /// Display label; empty uses the fallback label.
    pub name: String,
    /// Alert sound.
    pub sound: AlarmSound,
}

impl Alarm {
    /// A one-shot alarm at `time`.
    pub fn once(time: i64, name: impl Into<String>) -> Self {
        Self {
            time,
            name: name.into(),
            ..Self::default()
        }
    }

    /// A repeating alarm first firing at `time`, then every `interval_minutes`.
    pub fn repeating(time: i64, interval_minutes: i32, name: impl Into<String>) -> Self {
        Self {
            time,
            repeat: true,
            interval: interval_minutes,
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style sound override.
    #[must_use]
    pub fn with_sound(mut self, sound: AlarmSound) -> Self {
        self.sound = sound;
        self
    }

    /// Builder-style id override.
    #[must_use]
    pub fn with_id(mut self, id: AlarmId) -> Self {
        self.id = id;
        self
    }

    /// `true` when the alarm re-arms after firing.
    #[must_use]
    pub fn is_repeating(&self) -> bool {
        self.repeat && self.interval > 0
    }

    /// `true` when `time` is a representable UTC timestamp.
    #[must_use]
    pub fn has_valid_time(&self) -> bool {
        DateTime::from_timestamp(self.time, 0).is_some()
    }

    /// `true` when the alarm should fire at `now`.
    #[must_use]
    pub fn is_due(&self, now: i64) -> bool {
        self.time <= now
    }

    /// Label to show when the alarm fires.
    #[must_use]
    pub fn display_label<'a>(&'a self, fallback: &'a str) -> &'a str {
        if self.name.is_empty() {
            fallback
        } else {
            &self.name
        }
    }

    /// First fire time strictly after `now`, stepping by whole intervals
    /// from the current `time`.
    ///
    /// Returns `None` for non-repeating alarms, and when the next time is
    /// not a representable timestamp.
    #[must_use]
    pub fn next_fire_after(&self, now: i64) -> Option<i64> {
        if !self.is_repeating() {
            return None;
        }
        let step = i64::from(self.interval) * SECONDS_PER_MINUTE;
        if self.time > now {
            return Some(self.time);
        }
        // Jump over every missed period.
        let next = now
            .checked_sub(self.time)
            .map(|elapsed| elapsed / step + 1)
            .and_then(|missed| missed.checked_mul(step))
            .and_then(|offset| self.time.checked_add(offset))
            .filter(|next| DateTime::from_timestamp(*next, 0).is_some());
        if next.is_none() {
            warn!(alarm_id = self.id, time = self.time, "repeat time out of range");
        }
        next
    }
}
