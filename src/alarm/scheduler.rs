//! Single shared wake timer.
//!
//! Instead of one timer per alarm, the store keeps one one-shot
//! [`WakeTimer`] armed for the earliest alarm. [`reschedule`] runs after
//! every mutation and after every due pass, with the store lock held.
//! Alarm counts are small, so the earliest time is found by a linear scan.

use crate::alarm::model::{Alarm, AlarmId};
use crate::error::{AlarmError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Callback run when the wake timer expires.
pub type WakeCallback = Arc<dyn Fn() + Send + Sync>;

/// A one-shot timer that runs its callback on another execution context.
pub trait WakeTimer: Send {
    /// `true` while armed and not yet fired.
    fn is_armed(&self) -> bool;
    /// Arm the timer to fire once after `delay`, replacing any pending expiry.
    fn arm(&mut self, delay: Duration) -> Result<()>;
    /// Cancel a pending expiry.
    fn disarm(&mut self) -> Result<()>;
}

/// Creates [`WakeTimer`]s bound to a callback.
pub trait TimerDriver: Send + Sync {
    fn create(&self, name: &str, callback: WakeCallback) -> Result<Box<dyn WakeTimer>>;
}

/// Earliest fire time among `alarms`.
#[must_use]
pub fn earliest(alarms: &BTreeMap<AlarmId, Alarm>) -> Option<i64> {
    alarms.values().map(|alarm| alarm.time).min()
}

/// Delay until `next_time`, never below `min_delay`.
///
/// Times in the past or within the current second arm for `min_delay`, so
/// the callback still runs asynchronously.
#[must_use]
pub fn wake_delay(next_time: i64, now: i64, min_delay: Duration) -> Duration {
    let secs = next_time.saturating_sub(now);
    if secs <= 0 {
        return min_delay;
    }
    Duration::from_secs(secs.unsigned_abs()).max(min_delay)
}

/// Re-arm `timer` for the earliest alarm, or leave it disarmed when there
/// are no alarms. Failures are logged; nothing will fire until the next
/// reschedule succeeds.
pub fn reschedule(
    timer: Option<&mut (dyn WakeTimer + 'static)>,
    alarms: &BTreeMap<AlarmId, Alarm>,
    now: i64,
    min_delay: Duration,
) -> Option<Duration> {
    let timer = timer?;

    if timer.is_armed()
        && let Err(e) = timer.disarm()
    {
        error!("failed to stop scheduler timer: {e}");
    }

    let next_time = earliest(alarms)?;
    let delay = wake_delay(next_time, now, min_delay);

    match timer.arm(delay) {
        Ok(()) => {
            info!("scheduled next alarm in {} ms", delay.as_millis());
            Some(delay)
        }
        Err(e) => {
            error!("failed to start scheduler timer: {e}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tokio timer
// ---------------------------------------------------------------------------

/// Creates timers as tasks on a Tokio runtime.
#[derive(Debug, Clone, Default)]
pub struct TokioTimerDriver {
    handle: Option<Handle>,
}

impl TokioTimerDriver {
    /// Use the given runtime.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Use the runtime of the calling context, if any.
    ///
    /// Outside a runtime, [`create`](TimerDriver::create) fails and the
    /// store runs without a wake timer.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: Handle::try_current().ok(),
        }
    }
}

impl TimerDriver for TokioTimerDriver {
    fn create(&self, name: &str, callback: WakeCallback) -> Result<Box<dyn WakeTimer>> {
        let handle = self
            .handle
            .clone()
            .ok_or_else(|| AlarmError::Timer(format!("no tokio runtime for timer {name}")))?;
        Ok(Box::new(TokioWakeTimer {
            name: name.to_owned(),
            handle,
            callback,
            task: None,
        }))
    }
}

/// One-shot timer backed by a sleeping Tokio task.
pub struct TokioWakeTimer {
    name: String,
    handle: Handle,
    callback: WakeCallback,
    task: Option<JoinHandle<()>>,
}

impl WakeTimer for TokioWakeTimer {
    fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn arm(&mut self, delay: Duration) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let callback = Arc::clone(&self.callback);
        let name = self.name.clone();
        self.task = Some(self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(timer = %name, "wake timer fired");
            callback();
        }));
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for TokioWakeTimer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Manual timer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualTimerState {
    callback: Option<WakeCallback>,
    armed: Option<Duration>,
    arm_history: Vec<Duration>,
    disarm_count: usize,
    fail_create: bool,
    fail_arm: bool,
}

/// Timer driver that never fires on its own.
///
/// Records every arm/disarm and lets the caller fire the pending expiry
/// with [`fire`](Self::fire). Clones observe the same timer.
#[derive(Clone, Default)]
pub struct ManualTimerDriver {
    state: Arc<Mutex<ManualTimerState>>,
}

impl ManualTimerDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManualTimerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `create` fail.
    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Make every `arm` fail.
    pub fn fail_arm(&self, fail: bool) {
        self.state().fail_arm = fail;
    }

    /// Delay of the pending expiry, if armed.
    #[must_use]
    pub fn armed_delay(&self) -> Option<Duration> {
        self.state().armed
    }

    /// Every delay the timer was armed with, oldest first.
    #[must_use]
    pub fn arm_history(&self) -> Vec<Duration> {
        self.state().arm_history.clone()
    }

    /// Number of disarm calls.
    #[must_use]
    pub fn disarm_count(&self) -> usize {
        self.state().disarm_count
    }

    /// Fire the pending expiry. Returns `false` when the timer is not armed.
    ///
    /// The callback runs on the calling thread after the internal lock is
    /// released, so it may re-arm the timer.
    pub fn fire(&self) -> bool {
        let callback = {
            let mut state = self.state();
            if state.armed.take().is_none() {
                return false;
            }
            state.callback.clone()
        };
        if let Some(callback) = callback {
            callback();
        }
        true
    }
}

impl TimerDriver for ManualTimerDriver {
    fn create(&self, name: &str, callback: WakeCallback) -> Result<Box<dyn WakeTimer>> {
        let mut state = self.state();
        if state.fail_create {
            return Err(AlarmError::Timer(format!("cannot create timer {name}")));
        }
        state.callback = Some(callback);
        Ok(Box::new(ManualWakeTimer {
            driver: self.clone(),
        }))
    }
}

struct ManualWakeTimer {
    driver: ManualTimerDriver,
}

impl WakeTimer for ManualWakeTimer {
    fn is_armed(&self) -> bool {
        self.driver.state().armed.is_some()
    }

    fn arm(&mut self, delay: Duration) -> Result<()> {
        let mut state = self.driver.state();
        if state.fail_arm {
            return Err(AlarmError::Timer("simulated arm failure".to_owned()));
        }
        state.armed = Some(delay);
        state.arm_history.push(delay);
        Ok(())
    }

    fn disarm(&mut self) -> Result<()> {
        let mut state = self.driver.state();
        state.armed = None;
        state.disarm_count += 1;
        Ok(())
    }
}
