//! Versioned host command/event envelopes for the alarm host bridge.

use crate::error::{AlarmError, Result};
use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Event pushed to the host whenever an alarm fires.
pub const ALARM_FIRED_EVENT: &str = "alarm.fired";

/// Command set understood by the alarm host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "alarm.add")]
    AlarmAdd,
    #[serde(rename = "alarm.schedule")]
    AlarmSchedule,
    #[serde(rename = "alarm.update")]
    AlarmUpdate,
    #[serde(rename = "alarm.remove")]
    AlarmRemove,
    #[serde(rename = "alarm.get")]
    AlarmGet,
    #[serde(rename = "alarm.list")]
    AlarmList,
    #[serde(rename = "runtime.stop")]
    RuntimeStop,
}

impl CommandName {
    pub const ALL: [Self; 8] = [
        Self::HostPing,
        Self::AlarmAdd,
        Self::AlarmSchedule,
        Self::AlarmUpdate,
        Self::AlarmRemove,
        Self::AlarmGet,
        Self::AlarmList,
        Self::RuntimeStop,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::AlarmAdd => "alarm.add",
            Self::AlarmSchedule => "alarm.schedule",
            Self::AlarmUpdate => "alarm.update",
            Self::AlarmRemove => "alarm.remove",
            Self::AlarmGet => "alarm.get",
            Self::AlarmList => "alarm.list",
            Self::RuntimeStop => "runtime.stop",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|name| name.as_str() == raw)
    }
}

/// A versioned response envelope from alarm host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from frontend -> alarm host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`AlarmError::Contract`] for an unsupported version or an
    /// empty request id.
    pub fn validate(&self) -> Result<()> {
        if self.v != EVENT_VERSION {
            return Err(AlarmError::Contract(format!(
                "unsupported contract version {}; expected {}",
                self.v, EVENT_VERSION
            )));
        }
        if self.request_id.trim().is_empty() {
            return Err(AlarmError::Contract(
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from alarm host -> frontend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn command_names_match_wire_format() {
        for name in CommandName::ALL {
            let wire = serde_json::to_value(name).unwrap();
            assert_eq!(wire, json!(name.as_str()));
            assert_eq!(CommandName::parse(name.as_str()), Some(name));
        }
        assert_eq!(CommandName::parse("scheduler.list"), None);
    }

    #[test]
    fn envelope_without_payload_defaults_to_null() {
        let envelope: CommandEnvelope =
            serde_json::from_str(r#"{"v":1,"request_id":"r1","command":"alarm.list"}"#).unwrap();
        assert_eq!(envelope.command, CommandName::AlarmList);
        assert!(envelope.payload.is_null());
        assert!(envelope.validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_envelopes() {
        let mut envelope = CommandEnvelope::new("r1", CommandName::HostPing, json!({}));
        envelope.v = 2;
        assert!(matches!(envelope.validate(), Err(AlarmError::Contract(_))));

        let envelope = CommandEnvelope::new("  ", CommandName::HostPing, json!({}));
        assert!(matches!(envelope.validate(), Err(AlarmError::Contract(_))));
    }

    #[test]
    fn error_response_has_null_payload() {
        let resp = ResponseEnvelope::error("r1", "nope");
        assert!(!resp.ok);
        assert!(resp.payload.is_null());
        assert_eq!(resp.error.as_deref(), Some("nope"));
    }
}
