//! Due-alarm pass run when the wake timer fires.
//!
//! Order matters: every due alarm is queued for notification with its
//! pre-fire snapshot before any of them is advanced or removed.

use crate::alarm::codec;
use crate::alarm::manager::AlarmState;
use crate::alarm::model::{Alarm, AlarmId};
use crate::alarm::notify::{AlarmNotification, CloudNotifier, NotificationSender};
use crate::config::AlarmClockConfig;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Presentation and timing settings used by the due pass.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub fallback_label: String,
    pub display: Duration,
    pub min_delay: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self::from_config(&AlarmClockConfig::default())
    }
}

impl DispatchOptions {
    #[must_use]
    pub fn from_config(config: &AlarmClockConfig) -> Self {
        Self {
            fallback_label: config.notification.fallback_label.clone(),
            display: config.notification.display_duration(),
            min_delay: config.scheduler.min_delay(),
        }
    }
}

/// Outcome of one due pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DuePass {
    /// Alarms queued for notification, ascending id.
    pub notified: Vec<AlarmId>,
    /// Repeating alarms moved to their next fire time.
    pub advanced: Vec<AlarmId>,
    /// One-shot alarms deleted.
    pub removed: Vec<AlarmId>,
}

impl DuePass {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notified.is_empty()
    }
}

/// Build the notification job for `alarm`.
#[must_use]
pub fn notification_for(
    alarm: &Alarm,
    options: &DispatchOptions,
    notifier: Option<CloudNotifier>,
) -> AlarmNotification {
    AlarmNotification {
        alarm: alarm.clone(),
        label: alarm.display_label(&options.fallback_label).to_owned(),
        clip: alarm.sound.clip(),
        display: options.display,
        notifier,
    }
}

pub(crate) fn run_due_pass(
    state: &mut AlarmState,
    now: i64,
    options: &DispatchOptions,
    notifications: &NotificationSender,
) -> DuePass {
    let due: Vec<AlarmId> = state
        .alarms
        .values()
        .filter(|alarm| alarm.is_due(now))
        .map(|alarm| alarm.id)
        .collect();

    let mut pass = DuePass::default();
    if due.is_empty() {
        debug!("wake timer fired with no due alarms");
        state.reschedule(now, options);
        return pass;
    }

    for alarm in due.iter().filter_map(|id| state.alarms.get(id)) {
        info!(alarm_id = alarm.id, name = %alarm.name, "alarm fired");
        let job = notification_for(alarm, options, state.cloud_notifier.clone());
        if notifications.send(job).is_err() {
            warn!(alarm_id = alarm.id, "notification channel closed, alarm not shown");
        }
        pass.notified.push(alarm.id);
    }

    for id in due {
        let Some(alarm) = state.alarms.get_mut(&id) else {
            continue;
        };
        match alarm.next_fire_after(now) {
            Some(next) => {
                debug!(alarm_id = id, from = alarm.time, to = next, "advancing repeating alarm");
                alarm.time = next;
                codec::persist_alarm(state.settings.as_mut(), alarm);
                pass.advanced.push(id);
            }
            None => {
                state.alarms.remove(&id);
                codec::erase_alarm(state.settings.as_mut(), id);
                pass.removed.push(id);
            }
        }
    }

    if !pass.removed.is_empty() {
        codec::persist_ids(state.settings.as_mut(), state.alarms.keys());
    }
    if !pass.advanced.is_empty() || !pass.removed.is_empty() {
        state.commit("dispatch");
    }

    state.reschedule(now, options);
    pass
}
