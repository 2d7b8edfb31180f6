//! Fired-alarm notification jobs and the worker that delivers them.
//!
//! The dispatcher never renders anything itself. It queues an
//! [`AlarmNotification`] per due alarm on an unbounded channel while it holds
//! the store lock; [`NotificationWorker`] drains the channel on its own task
//! and calls the display/audio sink and the optional cloud notifier.

use crate::alarm::model::{Alarm, SoundClip};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// External "alarm fired" callback, invoked with a snapshot of the alarm.
pub type CloudNotifier = Arc<dyn Fn(&Alarm) + Send + Sync>;

/// Sender half used by the dispatcher.
pub type NotificationSender = mpsc::UnboundedSender<AlarmNotification>;
/// Receiver half drained by [`NotificationWorker`].
pub type NotificationReceiver = mpsc::UnboundedReceiver<AlarmNotification>;

/// Create a notification channel.
#[must_use]
pub fn channel() -> (NotificationSender, NotificationReceiver) {
    mpsc::unbounded_channel()
}

/// Renders fired alarms to the user.
///
/// Implementations may block; they are only called from the worker task.
pub trait NotificationSink: Send + Sync {
    /// Show `text` for `duration`.
    fn show_notification(&self, text: &str, duration: Duration);
    /// Play an alert clip.
    fn play_sound(&self, clip: SoundClip);
}

/// One queued notification for a fired alarm.
///
/// Carries a copy of the alarm as it was when it fired, before any
/// repeat-advance or removal.
#[derive(Clone)]
pub struct AlarmNotification {
    /// Pre-fire snapshot.
    pub alarm: Alarm,
    /// Resolved display label.
    pub label: String,
    /// Resolved sound clip.
    pub clip: SoundClip,
    /// How long to show the label.
    pub display: Duration,
    /// Cloud notifier installed at fire time, if any.
    pub notifier: Option<CloudNotifier>,
}

impl std::fmt::Debug for AlarmNotification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlarmNotification")
            .field("alarm", &self.alarm)
            .field("label", &self.label)
            .field("clip", &self.clip)
            .field("display", &self.display)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Sink that only logs. Used when no display or speaker is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn show_notification(&self, text: &str, duration: Duration) {
        info!(text, duration_ms = duration.as_millis() as u64, "alarm notification");
    }

    fn play_sound(&self, clip: SoundClip) {
        info!(clip = %clip, "alarm sound");
    }
}

/// Delivers queued notifications to a [`NotificationSink`].
pub struct NotificationWorker {
    sink: Arc<dyn NotificationSink>,
}

impl NotificationWorker {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver one notification: display, then sound, then cloud notifier.
    pub fn deliver(&self, job: &AlarmNotification) {
        debug!(alarm_id = job.alarm.id, label = %job.label, "delivering alarm notification");
        self.sink.show_notification(&job.label, job.display);
        self.sink.play_sound(job.clip);
        if let Some(notifier) = &job.notifier {
            notifier(&job.alarm);
        }
    }

    /// Drain `rx` until every sender is dropped. Returns the number of
    /// notifications delivered.
    pub async fn run(self, mut rx: NotificationReceiver) -> usize {
        let mut delivered = 0;
        while let Some(job) = rx.recv().await {
            self.deliver(&job);
            delivered += 1;
        }
        debug!(delivered, "notification channel closed");
        delivered
    }

    /// Run the worker on the current Tokio runtime.
    pub fn spawn(self, rx: NotificationReceiver) -> JoinHandle<usize> {
        tokio::spawn(self.run(rx))
    }
}
