//! Idle/Running state machine for tracked entries.
//!
//! A running entry survives missed detections until it has gone unmatched for
//! at least the session timeout (`>=`, so with a 5s interval and 10s timeout
//! the second consecutive miss ends the run).

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::registry::{seconds_between, EntryState, TrackedEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Idle and still not matched, or running within the grace period.
    Unchanged,
    Started,
    /// Running and matched again.
    Detected,
    Ended { duration_seconds: u64 },
}

pub fn next_transition(
    state: &EntryState,
    matched: bool,
    now: DateTime<Utc>,
    session_timeout: Duration,
) -> Transition {
    match (*state, matched) {
        (EntryState::Idle, true) => Transition::Started,
        (EntryState::Idle, false) => Transition::Unchanged,
        (EntryState::Running { .. }, true) => Transition::Detected,
        (
            EntryState::Running {
                session_started_at,
                last_detected_at,
            },
            false,
        ) => {
            // Negative elapsed (clock stepped back) never times out.
            let timed_out = now
                .signed_duration_since(last_detected_at)
                .to_std()
                .map(|elapsed| elapsed >= session_timeout)
                .unwrap_or(false);
            if timed_out {
                Transition::Ended {
                    duration_seconds: seconds_between(session_started_at, now),
                }
            } else {
                Transition::Unchanged
            }
        }
    }
}

/// Computes and applies the transition for one observation.
pub fn observe(
    entry: &mut TrackedEntry,
    matched: bool,
    now: DateTime<Utc>,
    session_timeout: Duration,
) -> Transition {
    let transition = next_transition(&entry.state, matched, now, session_timeout);
    match transition {
        Transition::Started => {
            entry.state = EntryState::Running {
                session_started_at: now,
                last_detected_at: now,
            };
            entry.accumulated_seconds = 0;
        }
        Transition::Detected => {
            if let EntryState::Running {
                session_started_at, ..
            } = entry.state
            {
                entry.state = EntryState::Running {
                    session_started_at,
                    last_detected_at: now,
                };
                entry.accumulated_seconds = seconds_between(session_started_at, now);
            }
        }
        Transition::Ended { duration_seconds } => {
            entry.state = EntryState::Idle;
            entry.accumulated_seconds = duration_seconds;
        }
        Transition::Unchanged => {}
    }
    transition
}

/// Ends a running entry immediately (shutdown or removal).
/// Returns the run's duration, or `None` if the entry was idle.
pub fn force_end(entry: &mut TrackedEntry, now: DateTime<Utc>) -> Option<u64> {
    let started = entry.session_started_at()?;
    let duration_seconds = seconds_between(started, now);
    entry.state = EntryState::Idle;
    entry.accumulated_seconds = duration_seconds;
    Some(duration_seconds)
}
