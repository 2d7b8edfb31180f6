//! Validation of alarm scheduling requests.
//!
//! A request arrives as a JSON argument object, for example from a voice
//! command tool call:
//!
//! - `{"delay": 300}` fires once in five minutes
//! - `{"hour": 7, "minute": 30, "repeat": true, "interval": 1440}` fires at
//!   07:30 and every day after
//!
//! Exactly one of `delay` or the `hour`/`minute` pair must be given.
//! `repeat: true` requires `interval`, and `repeat: false` (the default)
//! forbids it.

use crate::alarm::model::{Alarm, AlarmSound};
use crate::error::{AlarmError, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

pub const MIN_DELAY_SECONDS: i64 = 1;
pub const MAX_DELAY_SECONDS: i64 = 24 * 60 * 60;
pub const MIN_INTERVAL_MINUTES: i64 = 1;
pub const MAX_INTERVAL_MINUTES: i64 = 7 * 24 * 60;

/// How the first fire time is expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmTrigger {
    /// Seconds from now.
    Delay,
    /// Next local occurrence of a wall-clock time.
    TimeOfDay,
}

impl AlarmTrigger {
    fn id_tag(self) -> &'static str {
        match self {
            Self::Delay => "delay",
            Self::TimeOfDay => "time",
        }
    }
}

impl fmt::Display for AlarmTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id_tag())
    }
}

/// A validated scheduling request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmScheduleRequest {
    /// Unique request id, `alarm-{delay|time}-{micros}-{counter}`.
    pub id: String,
    pub delay_seconds: Option<u32>,
    pub hour: Option<u32>,
    pub minute: Option<u32>,
    pub repeat: bool,
    pub interval_minutes: Option<i32>,
    pub trigger: AlarmTrigger,
}

impl AlarmScheduleRequest {
    /// First fire time, Unix epoch seconds, strictly after `now`.
    ///
    /// A delay counts from `now`. A time of day resolves to its next
    /// occurrence in the time zone of `now`; a time equal to the current
    /// minute rolls over to tomorrow.
    pub fn first_fire_time<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> i64 {
        let base = now.timestamp();
        match self.trigger {
            AlarmTrigger::Delay => base + i64::from(self.delay_seconds.unwrap_or(1).max(1)),
            AlarmTrigger::TimeOfDay => {
                let time = NaiveTime::from_hms_opt(
                    self.hour.unwrap_or_default(),
                    self.minute.unwrap_or_default(),
                    0,
                )
                .unwrap_or_default();
                let tz = now.timezone();
                let today = now.date_naive();
                // Local times skipped by a DST jump resolve on a later day.
                (0..=2)
                    .filter_map(|days| today.checked_add_signed(ChronoDuration::days(days)))
                    .filter_map(|date| tz.from_local_datetime(&date.and_time(time)).earliest())
                    .map(|fire| fire.timestamp())
                    .find(|fire| *fire > base)
                    .unwrap_or(base + MAX_DELAY_SECONDS)
            }
        }
    }

    /// Build an alarm ready for [`AlarmManager::add_alarm`](crate::AlarmManager::add_alarm).
    pub fn into_alarm<Tz: TimeZone>(
        &self,
        now: &DateTime<Tz>,
        name: impl Into<String>,
        sound: AlarmSound,
    ) -> Alarm {
        Alarm {
            id: 0,
            time: self.first_fire_time(now),
            repeat: self.repeat,
            interval: if self.repeat {
                self.interval_minutes.unwrap_or_default()
            } else {
                0
            },
            name: name.into(),
            sound,
        }
    }
}

/// Parses request arguments and issues request ids.
///
/// The id counter lives as long as the parser and is never reset.
#[derive(Debug)]
pub struct AlarmRequestParser {
    counter: AtomicU32,
    epoch: Instant,
}

impl Default for AlarmRequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl AlarmRequestParser {
    pub fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            epoch: Instant::now(),
        }
    }

    /// Validate `arguments`.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::InvalidRequest`] describing the first rule the
    /// arguments break.
    pub fn parse(&self, arguments: &Value) -> Result<AlarmScheduleRequest> {
        let Some(object) = arguments.as_object() else {
            return Err(invalid("arguments must be a JSON object"));
        };

        let delay = optional_int(object, "delay")?;
        let hour = optional_int(object, "hour")?;
        let minute = optional_int(object, "minute")?;
        let repeat = optional_bool(object, "repeat")?;
        let interval = optional_int(object, "interval")?;

        let has_delay = delay.is_some();
        let has_time = hour.is_some() || minute.is_some();
        if has_delay && has_time {
            return Err(invalid("delay cannot be combined with hour/minute"));
        }
        if !has_delay && !has_time {
            return Err(invalid("either delay or hour/minute is required"));
        }
        if minute.is_some() && hour.is_none() {
            return Err(invalid("minute requires hour"));
        }
        if hour.is_some() && minute.is_none() {
            return Err(invalid("hour requires minute"));
        }

        let delay_seconds = in_range(delay, MIN_DELAY_SECONDS, MAX_DELAY_SECONDS, "delay")?;
        let hour = in_range(hour, 0, 23, "hour")?;
        let minute = in_range(minute, 0, 59, "minute")?;
        let interval_minutes = in_range(
            interval,
            MIN_INTERVAL_MINUTES,
            MAX_INTERVAL_MINUTES,
            "interval",
        )?;

        let repeat = repeat.unwrap_or(false);
        if repeat && interval_minutes.is_none() {
            return Err(invalid("interval is required when repeat is true"));
        }
        if !repeat && interval_minutes.is_some() {
            return Err(invalid("interval is not allowed when repeat is false"));
        }

        let trigger = if has_delay {
            AlarmTrigger::Delay
        } else {
            AlarmTrigger::TimeOfDay
        };

        Ok(AlarmScheduleRequest {
            id: self.generate_id(trigger),
            delay_seconds,
            hour,
            minute,
            repeat,
            interval_minutes,
            trigger,
        })
    }

    /// A request id unique within this parser's lifetime.
    pub fn generate_id(&self, trigger: AlarmTrigger) -> String {
        let micros = self.epoch.elapsed().as_micros();
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("alarm-{}-{micros}-{counter}", trigger.id_tag())
    }
}

fn invalid(message: impl Into<String>) -> AlarmError {
    AlarmError::InvalidRequest(message.into())
}

fn optional_int(object: &serde_json::Map<String, Value>, name: &str) -> Result<Option<i64>> {
    match object.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| invalid(format!("parameter \"{name}\" must be an integer"))),
    }
}

fn optional_bool(object: &serde_json::Map<String, Value>, name: &str) -> Result<Option<bool>> {
    match object.get(name) {
        None => Ok(None),
        Some(value) => value
            .as_bool()
            .map(Some)
            .ok_or_else(|| invalid(format!("parameter \"{name}\" must be a boolean"))),
    }
}

fn in_range<T: TryFrom<i64>>(value: Option<i64>, min: i64, max: i64, name: &str) -> Result<Option<T>> {
    let out_of_range = || invalid(format!("parameter \"{name}\" must be between {min} and {max}"));
    match value {
        None => Ok(None),
        Some(v) if (min..=max).contains(&v) => T::try_from(v).map(Some).map_err(|_| out_of_range()),
        Some(_) => Err(out_of_range()),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::{FixedOffset, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    fn parse(arguments: Value) -> Result<AlarmScheduleRequest> {
        AlarmRequestParser::new().parse(&arguments)
    }

    fn message(arguments: Value) -> String {
        match parse(arguments) {
            Err(AlarmError::InvalidRequest(message)) => message,
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn delay_request() {
        let request = parse(json!({"delay": 300})).unwrap();
        assert_eq!(request.trigger, AlarmTrigger::Delay);
        assert_eq!(request.delay_seconds, Some(300));
        assert!(!request.repeat);
        assert!(request.id.starts_with("alarm-delay-"));
    }

    #[test]
    fn repeating_time_of_day_request() {
        let request =
            parse(json!({"hour": 7, "minute": 30, "repeat": true, "interval": 1440})).unwrap();
        assert_eq!(request.trigger, AlarmTrigger::TimeOfDay);
        assert_eq!((request.hour, request.minute), (Some(7), Some(30)));
        assert_eq!(request.interval_minutes, Some(1440));
        assert!(request.id.starts_with("alarm-time-"));
    }

    #[test]
    fn rejects_non_object() {
        assert_eq!(message(json!([1, 2])), "arguments must be a JSON object");
    }

    #[test]
    fn rejects_wrong_types() {
        assert_eq!(
            message(json!({"delay": "10"})),
            "parameter \"delay\" must be an integer"
        );
        assert_eq!(
            message(json!({"delay": 1.5})),
            "parameter \"delay\" must be an integer"
        );
        assert_eq!(
            message(json!({"delay": 10, "repeat": "yes"})),
            "parameter \"repeat\" must be a boolean"
        );
    }

    #[test]
    fn trigger_must_be_exactly_one() {
        assert_eq!(
            message(json!({"delay": 10, "hour": 1, "minute": 0})),
            "delay cannot be combined with hour/minute"
        );
        assert_eq!(
            message(json!({"repeat": false})),
            "either delay or hour/minute is required"
        );
        assert_eq!(message(json!({"minute": 5})), "minute requires hour");
        assert_eq!(message(json!({"hour": 5})), "hour requires minute");
    }

    #[test]
    fn ranges_are_inclusive() {
        assert!(parse(json!({"delay": 1})).is_ok());
        assert!(parse(json!({"delay": 86_400})).is_ok());
        assert_eq!(
            message(json!({"delay": 0})),
            "parameter \"delay\" must be between 1 and 86400"
        );
        assert_eq!(
            message(json!({"delay": 86_401})),
            "parameter \"delay\" must be between 1 and 86400"
        );
        assert_eq!(
            message(json!({"hour": 24, "minute": 0})),
            "parameter \"hour\" must be between 0 and 23"
        );
        assert_eq!(
            message(json!({"hour": 0, "minute": 60})),
            "parameter \"minute\" must be between 0 and 59"
        );
        assert!(parse(json!({"delay": 5, "repeat": true, "interval": 10_080})).is_ok());
        assert_eq!(
            message(json!({"delay": 5, "repeat": true, "interval": 0})),
            "parameter \"interval\" must be between 1 and 10080"
        );
    }

    #[test]
    fn repeat_and_interval_are_coupled() {
        assert_eq!(
            message(json!({"delay": 5, "repeat": true})),
            "interval is required when repeat is true"
        );
        assert_eq!(
            message(json!({"delay": 5, "interval": 5})),
            "interval is not allowed when repeat is false"
        );
    }

    #[test]
    fn ids_are_unique_under_rapid_calls() {
        let parser = AlarmRequestParser::new();
        let ids: HashSet<_> = (0..1000)
            .map(|_| parser.generate_id(AlarmTrigger::Delay))
            .collect();
        assert_eq!(ids.len(), 1000);
        assert!(parser.generate_id(AlarmTrigger::TimeOfDay).ends_with("-1000"));
    }

    #[test]
    fn delay_fires_relative_to_now() {
        let now = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let request = parse(json!({"delay": 90})).unwrap();
        assert_eq!(request.first_fire_time(&now), 1_700_000_090);
    }

    #[test]
    fn time_of_day_rolls_to_tomorrow_when_passed() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let later = parse(json!({"hour": 10, "minute": 15})).unwrap();
        let expected = tz.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(later.first_fire_time(&now), expected.timestamp());

        let earlier = parse(json!({"hour": 8, "minute": 0})).unwrap();
        let expected = tz.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        assert_eq!(earlier.first_fire_time(&now), expected.timestamp());

        let same = parse(json!({"hour": 9, "minute": 0})).unwrap();
        let expected = tz.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap();
        assert_eq!(same.first_fire_time(&now), expected.timestamp());
    }

    #[test]
    fn into_alarm_carries_repeat() {
        let now = Utc.timestamp_opt(1_000_000, 0).unwrap();
        let request = parse(json!({"delay": 60, "repeat": true, "interval": 5})).unwrap();
        let alarm = request.into_alarm(&now, "stretch", AlarmSound::Alarm2);
        assert_eq!(alarm.id, 0);
        assert_eq!(alarm.time, 1_000_060);
        assert!(alarm.is_repeating());
        assert_eq!(alarm.interval, 5);
        assert_eq!(alarm.sound, AlarmSound::Alarm2);
    }
}
