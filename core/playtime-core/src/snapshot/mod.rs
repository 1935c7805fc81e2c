//! Process table observation.
//!
//! A [`ProcessSnapshotSource`] yields the current process table or an explicit
//! [`SnapshotError`]; it never reports "nothing running" when it simply could
//! not look. The production source tries a rich enumerator (command lines)
//! first and falls back to a basic one (names only).

mod enumerators;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::SnapshotError;
use crate::types::{ProcessInfo, ProcessSnapshot, SnapshotFidelity};

pub use enumerators::{
    parse_ps_output, parse_tasklist_output, PsEnumerator, SysinfoEnumerator, TasklistEnumerator,
};

/// One way of listing processes. Failures are reported as strings and folded
/// into [`SnapshotError::Unavailable`] by the caller.
pub trait ProcessEnumerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn enumerate(&self) -> Result<Vec<ProcessInfo>, String>;
}

pub trait ProcessSnapshotSource: Send + Sync {
    fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError>;
}

/// Rich enumeration first, basic enumeration on failure.
pub struct FallbackSnapshotSource {
    rich: Box<dyn ProcessEnumerator>,
    basic: Box<dyn ProcessEnumerator>,
}

impl FallbackSnapshotSource {
    pub fn new(rich: Box<dyn ProcessEnumerator>, basic: Box<dyn ProcessEnumerator>) -> Self {
        Self { rich, basic }
    }
}

impl ProcessSnapshotSource for FallbackSnapshotSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError> {
        let rich_error = match guarded_enumerate(self.rich.as_ref()) {
            Ok(processes) => {
                return Ok(ProcessSnapshot {
                    captured_at: Utc::now(),
                    fidelity: SnapshotFidelity::Rich,
                    processes,
                })
            }
            Err(err) => err,
        };
        debug!(
            enumerator = self.rich.name(),
            error = %rich_error,
            "Rich process enumeration failed; falling back"
        );

        match guarded_enumerate(self.basic.as_ref()) {
            Ok(processes) => {
                warn!(
                    enumerator = self.basic.name(),
                    processes = processes.len(),
                    "Using basic process enumeration; directory corroboration unavailable"
                );
                Ok(ProcessSnapshot {
                    captured_at: Utc::now(),
                    fidelity: SnapshotFidelity::Basic,
                    processes,
                })
            }
            Err(basic_error) => Err(SnapshotError::Unavailable {
                rich: rich_error,
                basic: basic_error,
            }),
        }
    }
}

fn guarded_enumerate(enumerator: &dyn ProcessEnumerator) -> Result<Vec<ProcessInfo>, String> {
    panic::catch_unwind(AssertUnwindSafe(|| enumerator.enumerate()))
        .unwrap_or_else(|_| Err(format!("{} enumerator panicked", enumerator.name())))
}

/// The platform's production source: `sysinfo`, then `ps` or `tasklist`.
pub fn default_snapshot_source() -> FallbackSnapshotSource {
    FallbackSnapshotSource::new(Box::new(SysinfoEnumerator::new()), basic_enumerator())
}

#[cfg(windows)]
fn basic_enumerator() -> Box<dyn ProcessEnumerator> {
    Box::new(TasklistEnumerator)
}

#[cfg(not(windows))]
fn basic_enumerator() -> Box<dyn ProcessEnumerator> {
    Box::new(PsEnumerator)
}

/// Runs snapshots off the calling thread with an upper bound on wait time.
///
/// At most one fetch is in flight. If a previous fetch is still stuck in the
/// OS query, later calls fail fast with [`SnapshotError::Stalled`] instead of
/// piling up concurrent enumerations.
pub struct BoundedSnapshotFetcher {
    source: Arc<dyn ProcessSnapshotSource>,
    timeout: Duration,
    in_flight: Arc<AtomicBool>,
}

impl BoundedSnapshotFetcher {
    pub fn new(source: Arc<dyn ProcessSnapshotSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn fetch(&self) -> Result<ProcessSnapshot, SnapshotError> {
        if self.in_flight.swap(true, Ordering::AcqRel) {
            return Err(SnapshotError::Stalled);
        }

        let (tx, rx) = mpsc::sync_channel(1);
        let source = Arc::clone(&self.source);
        let in_flight = Arc::clone(&self.in_flight);
        let spawned = thread::Builder::new()
            .name("playtime-snapshot".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| source.snapshot()))
                    .unwrap_or_else(|_| {
                        Err(SnapshotError::Unavailable {
                            rich: "snapshot source panicked".to_string(),
                            basic: "not attempted".to_string(),
                        })
                    });
                in_flight.store(false, Ordering::Release);
                let _ = tx.send(result);
            });

        if let Err(err) = spawned {
            self.in_flight.store(false, Ordering::Release);
            return Err(SnapshotError::Unavailable {
                rich: format!("failed to spawn snapshot worker: {}", err),
                basic: "not attempted".to_string(),
            });
        }

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(SnapshotError::TimedOut(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SnapshotError::Unavailable {
                rich: "snapshot worker exited without a result".to_string(),
                basic: "not attempted".to_string(),
            }),
        }
    }
}
