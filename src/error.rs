//! Error types for the alarm clock.

/// Top-level error type for alarm storage, scheduling and the host bridge.
#[derive(Debug, thiserror::Error)]
pub enum AlarmError {
    /// Persistent settings store error (read, write, commit).
    #[error("settings error: {0}")]
    Settings(String),

    /// Wake timer create/arm/disarm error.
    #[error("timer error: {0}")]
    Timer(String),

    /// Alarm request failed validation.
    #[error("invalid alarm request: {0}")]
    InvalidRequest(String),

    /// Alarm record rejected by the store.
    #[error("invalid alarm: {0}")]
    InvalidAlarm(String),

    /// Every alarm id has been allocated.
    #[error("alarm id space exhausted")]
    IdsExhausted,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Host command contract violation.
    #[error("contract error: {0}")]
    Contract(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AlarmError>;
