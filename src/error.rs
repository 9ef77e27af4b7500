//! Error types surfaced by the monitor engine.
//!
//! Probe-level failures are not errors: they are classified into
//! [`ProbeStatus`](crate::state::ProbeStatus) and recorded as data.

use thiserror::Error;

/// Errors reported synchronously to the caller of engine commands.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Empty target or a parameter outside its allowed range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Snapshot document is missing fields or has the wrong shape.
    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    /// File read/write failure during save or load.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Session lock could not be acquired within the bounded wait.
    #[error("Session is busy, try again")]
    Contention,

    /// Save requested with no recorded samples.
    #[error("There is nothing to save.")]
    EmptyHistory,

    /// Load requested while a monitoring session is running.
    #[error("Please stop monitoring first.")]
    SessionActive,

    /// Start requested while a loop is already running.
    #[error("Monitoring is already running")]
    AlreadyRunning,
}

pub type Result<T> = std::result::Result<T, MonitorError>;

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            MonitorError::Io(err.into())
        } else {
            MonitorError::MalformedSnapshot(err.to_string())
        }
    }
}
