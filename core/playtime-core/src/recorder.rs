//! Session persistence seam.
//!
//! A recorder must, atomically, append the session, add its duration to the
//! entry's aggregate, and bump the entry's last-active time. Records that fail
//! to persist stay in [`PendingRecords`] and are retried; they are never
//! dropped or merged, so each run still produces exactly one stored session.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};

use tracing::{info, warn};

use crate::error::TrackerError;
use crate::types::SessionRecord;

pub trait SessionRecorder: Send + Sync {
    fn record(&self, record: &SessionRecord) -> Result<(), String>;
}

impl<F> SessionRecorder for F
where
    F: Fn(&SessionRecord) -> Result<(), String> + Send + Sync,
{
    fn record(&self, record: &SessionRecord) -> Result<(), String> {
        self(record)
    }
}

/// Completed runs whose persistence failed, oldest first.
#[derive(Debug, Clone, Default)]
pub struct PendingRecords {
    queue: VecDeque<SessionRecord>,
}

impl PendingRecords {
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.queue.iter().cloned().collect()
    }

    /// Persists one freshly completed run, queueing it on failure. A recorder
    /// that panics counts as a failure.
    pub fn persist(&mut self, recorder: &dyn SessionRecorder, record: SessionRecord) -> bool {
        match guarded_record(recorder, &record) {
            Ok(()) => {
                info!(
                    entry_id = %record.entry_id,
                    duration_seconds = record.duration_seconds,
                    "Session recorded"
                );
                true
            }
            Err(err) => {
                warn!(
                    duration_seconds = record.duration_seconds,
                    error = %err,
                    "Session not recorded; retaining for retry"
                );
                self.queue.push_back(record);
                false
            }
        }
    }

    /// Retries every queued record once. Returns how many were persisted.
    pub fn retry(&mut self, recorder: &dyn SessionRecorder) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        let mut persisted = 0;
        let mut still_pending = VecDeque::with_capacity(self.queue.len());
        for record in self.queue.drain(..) {
            match guarded_record(recorder, &record) {
                Ok(()) => {
                    info!(
                        entry_id = %record.entry_id,
                        duration_seconds = record.duration_seconds,
                        "Retained session recorded"
                    );
                    persisted += 1;
                }
                Err(err) => {
                    warn!(error = %err, "Retry of retained session failed");
                    still_pending.push_back(record);
                }
            }
        }
        self.queue = still_pending;
        persisted
    }
}

fn guarded_record(
    recorder: &dyn SessionRecorder,
    record: &SessionRecord,
) -> Result<(), TrackerError> {
    panic::catch_unwind(AssertUnwindSafe(|| recorder.record(record)))
        .unwrap_or_else(|_| Err("recorder panicked".to_string()))
        .map_err(|details| TrackerError::Persistence {
            entry_id: record.entry_id.clone(),
            details,
        })
}
