//! Tracker timing configuration.

use std::time::Duration;

use crate::error::{Result, TrackerError};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_CATALOG_TTL_SECS: u64 = 60;
pub const DEFAULT_SNAPSHOT_TIMEOUT_SECS: u64 = 3;
pub const DEFAULT_STOP_FLUSH_TIMEOUT_SECS: u64 = 5;

/// Timing knobs for a [`crate::Tracker`].
///
/// All durations are `std::time::Duration`; there is no implicit unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    /// A running entry ends once it has gone unmatched for at least this long.
    pub session_timeout: Duration,
    pub catalog_ttl: Duration,
    pub snapshot_timeout: Duration,
    pub stop_flush_timeout: Duration,
    pub auto_discover: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        let poll_interval = Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS);
        Self {
            poll_interval,
            session_timeout: poll_interval * 2,
            catalog_ttl: Duration::from_secs(DEFAULT_CATALOG_TTL_SECS),
            snapshot_timeout: Duration::from_secs(DEFAULT_SNAPSHOT_TIMEOUT_SECS),
            stop_flush_timeout: Duration::from_secs(DEFAULT_STOP_FLUSH_TIMEOUT_SECS),
            auto_discover: true,
        }
    }
}

impl TrackerConfig {
    /// Builds a config with the session timeout pinned to two poll intervals.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            session_timeout: poll_interval * 2,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if self.session_timeout <= self.poll_interval {
            return Err(TrackerError::TimeoutTooShort {
                timeout: self.session_timeout,
                interval: self.poll_interval,
            });
        }
        if self.snapshot_timeout.is_zero() {
            return Err(TrackerError::InvalidConfig(
                "snapshot timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
