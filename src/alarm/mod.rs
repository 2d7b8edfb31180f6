//! Alarm store, persistence, scheduling and dispatch.
//!
//! - [`model`]: the [`Alarm`] record and [`AlarmSound`]
//! - [`codec`]: settings keys, legacy-key migration, load
//! - [`scheduler`]: the single shared wake timer
//! - [`dispatch`]: the due-alarm pass
//! - [`notify`]: notification jobs and their worker
//! - [`manager`]: [`AlarmManager`], the store itself
//! - [`request`]: validation of scheduling requests

pub mod clock;
pub mod codec;
pub mod dispatch;
pub mod manager;
pub mod model;
pub mod notify;
pub mod request;
pub mod scheduler;

pub use clock::{Clock, ManualClock, SystemClock};
pub use dispatch::{DispatchOptions, DuePass};
pub use manager::{AlarmManager, AlarmManagerBuilder};
pub use model::{Alarm, AlarmId, AlarmSound, EXHAUSTED_ID, SoundClip};
pub use notify::{
    AlarmNotification, CloudNotifier, LogSink, NotificationReceiver, NotificationSender,
    NotificationSink, NotificationWorker,
};
pub use request::{AlarmRequestParser, AlarmScheduleRequest, AlarmTrigger};
pub use scheduler::{ManualTimerDriver, TimerDriver, TokioTimerDriver, WakeTimer};
