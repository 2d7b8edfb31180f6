//! Headless alarm host for stdin/stdout JSON communication.
//!
//! Loads the config (path from the first argument, or the default config
//! location), opens the settings file, restores persisted alarms and serves
//! `CommandEnvelope` messages as newline-delimited JSON on stdin. Fired
//! alarms are logged by the notification worker and pushed to stdout as
//! `alarm.fired` events.
//!
//! All tracing/diagnostic output goes to stderr (and optionally a daily log
//! file) so that stdout remains a clean JSON protocol channel.

use alarm_clock::alarm::{LogSink, NotificationWorker, notify};
use alarm_clock::config::LoggingConfig;
use alarm_clock::host::stdio::run_stdio_bridge;
use alarm_clock::{AlarmClockConfig, AlarmManager, FileSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const LOG_FILE_PREFIX: &str = "alarm-host.log";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(AlarmClockConfig::default_config_path);
    let config = AlarmClockConfig::load_or_default(&config_path)
        .map_err(|e| anyhow::anyhow!("cannot load config {}: {e}", config_path.display()))?;

    let _log_guard = init_tracing(&config.logging);
    tracing::info!(config = %config_path.display(), "alarm-host starting");

    let settings = FileSettings::open(config.storage.path.clone(), config.storage.namespace.clone())?;
    let (notify_tx, notify_rx) = notify::channel();
    let manager = AlarmManager::builder(settings, notify_tx)
        .with_config(&config)
        .build();
    let worker = NotificationWorker::new(Arc::new(LogSink)).spawn(notify_rx);

    run_stdio_bridge(manager).await.map_err(|e| {
        tracing::error!(error = %e, "alarm-host exited with error");
        anyhow::anyhow!("alarm-host failed: {e}")
    })?;

    // The bridge owned the last store handle; the worker drains what is left.
    let delivered = worker.await?;
    tracing::info!(delivered, "alarm-host shut down cleanly");
    Ok(())
}

/// Log to stderr, plus a daily-rolling file when `log_dir` is set.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match logging
        .log_dir
        .as_ref()
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}
