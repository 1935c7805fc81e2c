//! Error types for playtime-core operations.

use std::time::Duration;

/// All errors that can occur in playtime-core operations.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "Session timeout ({timeout:?}) must be strictly greater than the poll interval ({interval:?})"
    )]
    TimeoutTooShort {
        timeout: Duration,
        interval: Duration,
    },

    // ─────────────────────────────────────────────────────────────────────
    // Observation Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Process snapshot unavailable: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Catalog unavailable: {0}")]
    CatalogUnavailable(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Failed to record session for {entry_id}: {details}")]
    Persistence { entry_id: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Tracker is already running")]
    AlreadyStarted,

    #[error("Tracker has been stopped")]
    Stopped,

    #[error("Failed to spawn tracker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Tracker tick panicked")]
    TickPanicked,
}

/// Why a tick could not observe the process table.
///
/// Distinct from an empty process list: callers treat every variant as
/// "no observation" and leave running sessions untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("all enumerators failed (rich: {rich}; basic: {basic})")]
    Unavailable { rich: String, basic: String },

    #[error("snapshot did not complete within {0:?}")]
    TimedOut(Duration),

    #[error("previous snapshot is still in flight")]
    Stalled,
}

/// Convenience type alias for Results using TrackerError.
pub type Result<T> = std::result::Result<T, TrackerError>;

impl From<TrackerError> for String {
    fn from(err: TrackerError) -> String {
        err.to_string()
    }
}
