//! The alarm store.
//!
//! [`AlarmManager`] owns the alarm table, the id counter, the settings
//! store and the shared wake timer, all behind one mutex. Every mutation
//! persists, commits and re-arms the timer before releasing the lock. The
//! timer callback holds only a weak reference and runs the due pass under
//! the same lock.

use crate::alarm::clock::{Clock, SystemClock};
use crate::alarm::codec::{self, NEXT_ID_KEY};
use crate::alarm::dispatch::{self, DispatchOptions, DuePass};
use crate::alarm::model::{Alarm, AlarmId, EXHAUSTED_ID};
use crate::alarm::notify::{CloudNotifier, NotificationSender};
use crate::alarm::scheduler::{self, TimerDriver, TokioTimerDriver, WakeCallback, WakeTimer};
use crate::config::AlarmClockConfig;
use crate::error::{AlarmError, Result};
use crate::settings::SettingsStore;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, error, info, warn};

const TIMER_NAME: &str = "alarm_clock";

/// State guarded by the store lock.
pub(crate) struct AlarmState {
    pub(crate) alarms: BTreeMap<AlarmId, Alarm>,
    pub(crate) next_id: AlarmId,
    pub(crate) settings: Box<dyn SettingsStore>,
    pub(crate) timer: Option<Box<dyn WakeTimer>>,
    pub(crate) cloud_notifier: Option<CloudNotifier>,
}

impl AlarmState {
    /// Re-arm the wake timer for the earliest alarm. Caller holds the lock.
    pub(crate) fn reschedule(&mut self, now: i64, options: &DispatchOptions) {
        scheduler::reschedule(
            self.timer.as_deref_mut(),
            &self.alarms,
            now,
            options.min_delay,
        );
    }

    /// Commit pending settings writes, logging failures.
    pub(crate) fn commit(&mut self, context: &str) -> bool {
        match self.settings.commit() {
            Ok(()) => true,
            Err(e) => {
                error!(context, "cannot commit alarm settings: {e}");
                false
            }
        }
    }

    fn persist_next_id(&mut self) {
        self.settings.set_int(NEXT_ID_KEY, self.next_id);
    }
}

struct Shared {
    state: Mutex<AlarmState>,
    clock: Arc<dyn Clock>,
    notifications: NotificationSender,
    options: DispatchOptions,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AlarmState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("alarm store lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn run_due_alarms(&self) -> DuePass {
        let now = self.clock.now();
        let mut state = self.lock();
        dispatch::run_due_pass(&mut state, now, &self.options, &self.notifications)
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(timer) = state.timer.as_mut()
            && timer.is_armed()
            && let Err(e) = timer.disarm()
        {
            error!("failed to stop scheduler timer on shutdown: {e}");
        }
    }
}

/// Builds an [`AlarmManager`] with injected capabilities.
pub struct AlarmManagerBuilder {
    settings: Box<dyn SettingsStore>,
    notifications: NotificationSender,
    clock: Arc<dyn Clock>,
    driver: Arc<dyn TimerDriver>,
    options: DispatchOptions,
}

impl AlarmManagerBuilder {
    /// Start from a settings store and the notification channel.
    ///
    /// Defaults: system clock, Tokio timer on the current runtime, default
    /// notification and scheduler config.
    pub fn new(settings: impl SettingsStore + 'static, notifications: NotificationSender) -> Self {
        Self {
            settings: Box::new(settings),
            notifications,
            clock: Arc::new(SystemClock),
            driver: Arc::new(TokioTimerDriver::current()),
            options: DispatchOptions::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_timer_driver(mut self, driver: Arc<dyn TimerDriver>) -> Self {
        self.driver = driver;
        self
    }

    /// Apply notification and scheduler settings from `config`.
    #[must_use]
    pub fn with_config(mut self, config: &AlarmClockConfig) -> Self {
        self.options = DispatchOptions::from_config(config);
        self
    }

    /// Load persisted alarms, create the wake timer and arm it.
    ///
    /// A timer that cannot be created is logged; the store then works but
    /// never wakes on its own.
    pub fn build(self) -> AlarmManager {
        let Self {
            mut settings,
            notifications,
            clock,
            driver,
            options,
        } = self;

        let loaded = codec::load_alarms(settings.as_mut());
        if !loaded.dropped.is_empty() {
            warn!(dropped = ?loaded.dropped, "dropped corrupt alarms while loading");
        }

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let weak = weak.clone();
            let callback: WakeCallback = Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.run_due_alarms();
                }
            });
            let timer = match driver.create(TIMER_NAME, callback) {
                Ok(timer) => Some(timer),
                Err(e) => {
                    error!("failed to create scheduler timer: {e}");
                    None
                }
            };

            Shared {
                state: Mutex::new(AlarmState {
                    alarms: loaded.alarms,
                    next_id: loaded.next_id,
                    settings,
                    timer,
                    cloud_notifier: None,
                }),
                clock,
                notifications,
                options,
            }
        });

        {
            let now = shared.clock.now();
            let mut state = shared.lock();
            info!(count = state.alarms.len(), next_id = state.next_id, "alarm store ready");
            state.reschedule(now, &shared.options);
        }

        AlarmManager { shared }
    }
}

/// Thread-safe alarm store with a single shared wake timer.
///
/// Cloning yields another handle to the same store. The timer is stopped
/// when the last handle is dropped.
#[derive(Clone)]
pub struct AlarmManager {
    shared: Arc<Shared>,
}

impl AlarmManager {
    /// Shorthand for [`AlarmManagerBuilder::new`].
    pub fn builder(
        settings: impl SettingsStore + 'static,
        notifications: NotificationSender,
    ) -> AlarmManagerBuilder {
        AlarmManagerBuilder::new(settings, notifications)
    }

    /// Insert or overwrite an alarm and return its id.
    ///
    /// An id `<= 0` allocates the next free id. An explicit id at or past
    /// the counter moves the counter beyond it.
    ///
    /// # Errors
    ///
    /// [`AlarmError::InvalidAlarm`] if the time is not a valid timestamp or
    /// the id is [`EXHAUSTED_ID`]; [`AlarmError::IdsExhausted`] if no id is
    /// left to allocate. The store is unchanged on error.
    pub fn add_alarm(&self, mut alarm: Alarm) -> Result<AlarmId> {
        check_time(&alarm)?;
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();

        if alarm.id <= 0 {
            if state.next_id >= EXHAUSTED_ID {
                warn!("alarm id counter exhausted");
                return Err(AlarmError::IdsExhausted);
            }
            alarm.id = state.next_id;
            state.next_id += 1;
        } else if alarm.id >= EXHAUSTED_ID {
            return Err(AlarmError::InvalidAlarm(format!(
                "alarm id {} is reserved",
                alarm.id
            )));
        } else if alarm.id >= state.next_id {
            state.next_id = alarm.id + 1;
        }
        let id = alarm.id;

        codec::persist_alarm(state.settings.as_mut(), &alarm);
        state.alarms.insert(id, alarm);
        let AlarmState {
            alarms, settings, ..
        } = &mut *state;
        codec::persist_ids(settings.as_mut(), alarms.keys());
        state.persist_next_id();
        state.commit("add");

        debug!(alarm_id = id, "added alarm");
        state.reschedule(now, &self.shared.options);
        Ok(id)
    }

    /// Delete alarm `id`. Returns `false`, changing nothing, if it is unknown.
    pub fn remove_alarm(&self, id: AlarmId) -> bool {
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();

        if state.alarms.remove(&id).is_none() {
            return false;
        }
        let AlarmState {
            alarms, settings, ..
        } = &mut *state;
        codec::erase_alarm(settings.as_mut(), id);
        codec::persist_ids(settings.as_mut(), alarms.keys());
        state.commit("remove");

        debug!(alarm_id = id, "removed alarm");
        state.reschedule(now, &self.shared.options);
        true
    }

    /// Replace an existing alarm. Returns `false`, changing nothing, if
    /// `alarm.id` is unknown.
    ///
    /// # Errors
    ///
    /// [`AlarmError::InvalidAlarm`] if the time is not a valid timestamp.
    pub fn update_alarm(&self, alarm: Alarm) -> Result<bool> {
        check_time(&alarm)?;
        let now = self.shared.clock.now();
        let mut state = self.shared.lock();

        let id = alarm.id;
        if !state.alarms.contains_key(&id) {
            return Ok(false);
        }
        codec::persist_alarm(state.settings.as_mut(), &alarm);
        state.alarms.insert(id, alarm);
        let AlarmState {
            alarms, settings, ..
        } = &mut *state;
        codec::persist_ids(settings.as_mut(), alarms.keys());
        state.commit("update");

        debug!(alarm_id = id, "updated alarm");
        state.reschedule(now, &self.shared.options);
        Ok(true)
    }

    #[must_use]
    pub fn get_alarm(&self, id: AlarmId) -> Option<Alarm> {
        self.shared.lock().alarms.get(&id).cloned()
    }

    /// All alarms in ascending id order.
    #[must_use]
    pub fn get_alarms(&self) -> Vec<Alarm> {
        self.shared.lock().alarms.values().cloned().collect()
    }

    /// Next id the store will allocate.
    #[must_use]
    pub fn next_id(&self) -> AlarmId {
        self.shared.lock().next_id
    }

    /// Earliest pending fire time.
    #[must_use]
    pub fn next_fire_time(&self) -> Option<i64> {
        scheduler::earliest(&self.shared.lock().alarms)
    }

    /// Install or replace the callback invoked for every fired alarm.
    pub fn set_cloud_notifier(&self, notifier: impl Fn(&Alarm) + Send + Sync + 'static) {
        self.shared.lock().cloud_notifier = Some(Arc::new(notifier));
    }

    /// Remove the cloud notifier.
    pub fn clear_cloud_notifier(&self) {
        self.shared.lock().cloud_notifier = None;
    }

    /// Run the due pass now. The wake timer calls this on expiry.
    pub fn run_due_alarms(&self) -> DuePass {
        self.shared.run_due_alarms()
    }
}

fn check_time(alarm: &Alarm) -> Result<()> {
    if alarm.has_valid_time() {
        Ok(())
    } else {
        Err(AlarmError::InvalidAlarm(format!(
            "time {} is out of range",
            alarm.time
        )))
    }
}

impl std::fmt::Debug for AlarmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("AlarmManager")
            .field("alarms", &state.alarms.len())
            .field("next_id", &state.next_id)
            .field("timer", &state.timer.is_some())
            .finish()
    }
}
