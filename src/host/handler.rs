//! Routes host commands to the alarm store.

use crate::alarm::{Alarm, AlarmId, AlarmManager, AlarmRequestParser, AlarmSound};
use crate::error::{AlarmError, Result};
use crate::host::contract::{
    ALARM_FIRED_EVENT, CommandEnvelope, CommandName, EventEnvelope, ResponseEnvelope,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the host event broadcast channel.
pub const EVENT_CAPACITY: usize = 128;

/// Command router for the alarm host.
pub struct AlarmCommandHandler {
    manager: AlarmManager,
    parser: AlarmRequestParser,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl AlarmCommandHandler {
    pub fn new(manager: AlarmManager, event_tx: broadcast::Sender<EventEnvelope>) -> Self {
        Self {
            manager,
            parser: AlarmRequestParser::new(),
            event_tx,
        }
    }

    #[must_use]
    pub fn manager(&self) -> &AlarmManager {
        &self.manager
    }

    /// Subscribe to host events.
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Publish an `alarm.fired` event for every alarm the store fires.
    pub fn forward_fired_alarms(&self) {
        let event_tx = self.event_tx.clone();
        self.manager.set_cloud_notifier(move |alarm: &Alarm| {
            let _ = event_tx.send(new_event(ALARM_FIRED_EVENT, json!({ "alarm": alarm })));
        });
    }

    /// Validate and route `envelope`, turning failures into error responses.
    pub fn handle(&self, envelope: &CommandEnvelope) -> ResponseEnvelope {
        match envelope.validate().and_then(|()| self.route(envelope)) {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    request_id = %envelope.request_id,
                    command = envelope.command.as_str(),
                    "host command failed: {e}"
                );
                ResponseEnvelope::error(envelope.request_id.clone(), e.to_string())
            }
        }
    }

    /// Route a command envelope to the appropriate handler.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed payloads, failed request validation
    /// or unknown alarm ids.
    pub fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        debug!(
            request_id = %envelope.request_id,
            command = envelope.command.as_str(),
            "routing host command"
        );
        match envelope.command {
            CommandName::HostPing => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({"pong": true}),
            )),
            CommandName::AlarmAdd => self.handle_alarm_add(envelope),
            CommandName::AlarmSchedule => self.handle_alarm_schedule(envelope),
            CommandName::AlarmUpdate => self.handle_alarm_update(envelope),
            CommandName::AlarmRemove => self.handle_alarm_remove(envelope),
            CommandName::AlarmGet => self.handle_alarm_get(envelope),
            CommandName::AlarmList => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({"alarms": self.manager.get_alarms()}),
            )),
            CommandName::RuntimeStop => Ok(ResponseEnvelope::ok(
                envelope.request_id.clone(),
                json!({"stopping": true}),
            )),
        }
    }

    fn handle_alarm_add(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let alarm = parse_alarm(&envelope.payload, "alarm.add")?;
        let id = self.manager.add_alarm(alarm)?;
        self.emit_event("alarm.added", json!({"request_id": envelope.request_id, "id": id}));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"accepted": true, "id": id}),
        ))
    }

    fn handle_alarm_schedule(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let request = self.parser.parse(&envelope.payload)?;
        let name = envelope
            .payload
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let sound = envelope
            .payload
            .get("sound")
            .and_then(Value::as_str)
            .map(AlarmSound::normalize)
            .unwrap_or_default();

        let alarm = request.into_alarm(&chrono::Local::now(), name, sound);
        let time = alarm.time;
        let id = self.manager.add_alarm(alarm)?;
        self.emit_event("alarm.added", json!({"request_id": envelope.request_id, "id": id}));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({
                "accepted": true,
                "id": id,
                "time": time,
                "schedule_id": request.id,
                "trigger": request.trigger,
            }),
        ))
    }

    fn handle_alarm_update(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let alarm = parse_alarm(&envelope.payload, "alarm.update")?;
        let id = alarm.id;
        if !self.manager.update_alarm(alarm)? {
            return Err(unknown_alarm(id));
        }
        self.emit_event("alarm.updated", json!({"request_id": envelope.request_id, "id": id}));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"accepted": true, "id": id}),
        ))
    }

    fn handle_alarm_remove(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = parse_alarm_id(&envelope.payload, "alarm.remove")?;
        if !self.manager.remove_alarm(id) {
            return Err(unknown_alarm(id));
        }
        self.emit_event("alarm.removed", json!({"request_id": envelope.request_id, "id": id}));
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"accepted": true, "id": id}),
        ))
    }

    fn handle_alarm_get(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        let id = parse_alarm_id(&envelope.payload, "alarm.get")?;
        let alarm = self.manager.get_alarm(id).ok_or_else(|| unknown_alarm(id))?;
        Ok(ResponseEnvelope::ok(
            envelope.request_id.clone(),
            json!({"alarm": alarm}),
        ))
    }

    fn emit_event(&self, event: &str, payload: Value) {
        let _ = self.event_tx.send(new_event(event, payload));
    }
}

fn new_event(event: &str, payload: Value) -> EventEnvelope {
    EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event, payload)
}

fn unknown_alarm(id: AlarmId) -> AlarmError {
    AlarmError::InvalidRequest(format!("unknown alarm id {id}"))
}

fn parse_alarm(payload: &Value, command: &str) -> Result<Alarm> {
    let raw = payload.get("alarm").unwrap_or(payload);
    if !raw.is_object() {
        return Err(AlarmError::Contract(format!(
            "{command} requires an alarm object"
        )));
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| AlarmError::Contract(format!("{command} has an invalid alarm: {e}")))
}

fn parse_alarm_id(payload: &Value, command: &str) -> Result<AlarmId> {
    payload
        .get("id")
        .and_then(Value::as_i64)
        .and_then(|id| AlarmId::try_from(id).ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AlarmError::Contract(format!("{command} requires a positive integer id")))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::alarm::{LogSink, ManualClock, ManualTimerDriver, NotificationWorker, notify};
    use crate::settings::MemorySettings;
    use std::sync::Arc;

    fn handler() -> (AlarmCommandHandler, notify::NotificationReceiver) {
        let (tx, rx) = notify::channel();
        let manager = AlarmManager::builder(MemorySettings::new(), tx)
            .with_clock(Arc::new(ManualClock::new(1_000)))
            .with_timer_driver(Arc::new(ManualTimerDriver::new()))
            .build();
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        (AlarmCommandHandler::new(manager, event_tx), rx)
    }

    fn command(name: CommandName, payload: Value) -> CommandEnvelope {
        CommandEnvelope::new("req-1", name, payload)
    }

    #[test]
    fn ping_pongs() {
        let (h, _rx) = handler();
        let resp = h.handle(&command(CommandName::HostPing, Value::Null));
        assert!(resp.ok);
        assert_eq!(resp.payload["pong"], true);
    }

    #[test]
    fn add_get_list_remove() {
        let (h, _rx) = handler();
        let mut events = h.subscribe_events();

        let resp = h.handle(&command(
            CommandName::AlarmAdd,
            json!({"alarm": {"time": 2_000, "name": "Tea", "sound": "ALARM9"}}),
        ));
        assert!(resp.ok, "{resp:?}");
        let id = resp.payload["id"].as_i64().unwrap();
        assert_eq!(events.try_recv().unwrap().event, "alarm.added");

        let resp = h.handle(&command(CommandName::AlarmGet, json!({"id": id})));
        assert_eq!(resp.payload["alarm"]["name"], "Tea");
        assert_eq!(resp.payload["alarm"]["sound"], "ALARM1");

        let resp = h.handle(&command(CommandName::AlarmList, Value::Null));
        assert_eq!(resp.payload["alarms"].as_array().unwrap().len(), 1);

        let resp = h.handle(&command(CommandName::AlarmRemove, json!({"id": id})));
        assert!(resp.ok);
        let resp = h.handle(&command(CommandName::AlarmRemove, json!({"id": id})));
        assert!(!resp.ok);
        assert_eq!(
            resp.error.as_deref(),
            Some(format!("invalid alarm request: unknown alarm id {id}").as_str())
        );
    }

    #[test]
    fn update_unknown_is_an_error() {
        let (h, _rx) = handler();
        let resp = h.handle(&command(
            CommandName::AlarmUpdate,
            json!({"id": 42, "time": 5_000, "name": "x"}),
        ));
        assert!(!resp.ok);
        assert!(h.manager().get_alarms().is_empty());
    }

    #[test]
    fn reserved_id_and_bad_time_are_rejected() {
        let (h, _rx) = handler();
        let resp = h.handle(&command(
            CommandName::AlarmAdd,
            json!({"id": 2_147_483_647_i64, "time": 2_000, "name": "top"}),
        ));
        assert!(!resp.ok);
        assert_eq!(
            resp.error.as_deref(),
            Some("invalid alarm: alarm id 2147483647 is reserved")
        );

        let resp = h.handle(&command(
            CommandName::AlarmAdd,
            json!({"time": i64::MIN, "name": "ancient"}),
        ));
        assert!(!resp.ok);
        assert!(h.manager().get_alarms().is_empty());
        assert_eq!(h.manager().next_id(), 1);
    }

    #[test]
    fn schedule_validates_and_adds() {
        let (h, _rx) = handler();
        let resp = h.handle(&command(
            CommandName::AlarmSchedule,
            json!({"delay": 60, "name": "stretch", "sound": "ALARM2"}),
        ));
        assert!(resp.ok, "{resp:?}");
        assert_eq!(resp.payload["trigger"], "delay");
        assert!(
            resp.payload["schedule_id"]
                .as_str()
                .unwrap()
                .starts_with("alarm-delay-")
        );

        let alarms = h.manager().get_alarms();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0].name, "stretch");
        assert_eq!(alarms[0].sound, AlarmSound::Alarm2);

        let resp = h.handle(&command(
            CommandName::AlarmSchedule,
            json!({"delay": 60, "hour": 7, "minute": 0}),
        ));
        assert!(!resp.ok);
        assert_eq!(h.manager().get_alarms().len(), 1);
    }

    #[test]
    fn bad_payloads_are_contract_errors() {
        let (h, _rx) = handler();
        let resp = h.handle(&command(CommandName::AlarmGet, json!({"id": "one"})));
        assert!(resp.error.unwrap().starts_with("contract error"));
        let resp = h.handle(&command(CommandName::AlarmAdd, json!([1])));
        assert!(resp.error.unwrap().starts_with("contract error"));
    }

    #[test]
    fn invalid_envelope_is_rejected_before_routing() {
        let (h, _rx) = handler();
        let mut envelope = command(CommandName::AlarmAdd, json!({"time": 2_000}));
        envelope.v = 9;
        assert!(!h.handle(&envelope).ok);
        assert!(h.manager().get_alarms().is_empty());
    }

    #[test]
    fn fired_alarms_become_events() {
        let (h, mut rx) = handler();
        h.forward_fired_alarms();
        let id = h.manager().add_alarm(Alarm::once(1_000, "now")).unwrap();
        let mut events = h.subscribe_events();

        h.manager().run_due_alarms();
        let job = rx.try_recv().unwrap();
        NotificationWorker::new(Arc::new(LogSink)).deliver(&job);

        let event = events.try_recv().unwrap();
        assert_eq!(event.event, ALARM_FIRED_EVENT);
        assert_eq!(event.payload["alarm"]["id"], id);
        assert_eq!(event.payload["alarm"]["time"], 1_000);
    }
}
