//! The threaded tracker service.
//!
//! One background thread ticks on a fixed schedule. Each tick fetches a
//! snapshot through the [`BoundedSnapshotFetcher`] without holding the core
//! lock, then locks [`TrackerCore`] once to apply it. Host calls lock the same
//! core, so they never interleave with a tick.
//!
//! Shutdown is bounded: [`Tracker::stop`] flushes running entries on a helper
//! thread and gives up after `stop_flush_timeout`, reporting what it could not
//! flush instead of hanging the host.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::catalog::CatalogProvider;
use crate::config::TrackerConfig;
use crate::engine::TrackerCore;
use crate::error::{Result, TrackerError};
use crate::recorder::SessionRecorder;
use crate::snapshot::{default_snapshot_source, BoundedSnapshotFetcher, ProcessSnapshotSource};
use crate::types::{EntryStatus, SessionRecord, TickSummary, TrackerEvent, TrackerHealth};

const JOIN_POLL: Duration = Duration::from_millis(10);

/// What [`Tracker::stop`] managed to do before its deadline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopReport {
    pub flushed: Vec<String>,
    /// Entries still running when the deadline passed. Empty when the core
    /// could not be locked at all (see `timed_out`).
    pub unflushed_entries: Vec<String>,
    /// Records that failed to persist. `None` if the flush did not finish.
    pub pending_records: Option<usize>,
    pub timed_out: bool,
}

#[derive(Debug, Default)]
struct FlushProgress {
    captured: bool,
    remaining: Vec<String>,
    flushed: Vec<String>,
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

pub struct Tracker {
    config: TrackerConfig,
    core: Arc<Mutex<TrackerCore>>,
    fetcher: Arc<BoundedSnapshotFetcher>,
    worker: Mutex<Option<Worker>>,
    stopped: AtomicBool,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        catalog: Arc<dyn CatalogProvider>,
        source: Arc<dyn ProcessSnapshotSource>,
        recorder: Arc<dyn SessionRecorder>,
    ) -> Result<Self> {
        config.validate()?;
        let fetcher = BoundedSnapshotFetcher::new(source, config.snapshot_timeout);
        let core = TrackerCore::new(config.clone(), catalog, recorder);
        Ok(Self {
            config,
            core: Arc::new(Mutex::new(core)),
            fetcher: Arc::new(fetcher),
            worker: Mutex::new(None),
            stopped: AtomicBool::new(false),
        })
    }

    /// Uses the platform snapshot source (`sysinfo` with a `ps`/`tasklist`
    /// fallback).
    pub fn with_default_source(
        config: TrackerConfig,
        catalog: Arc<dyn CatalogProvider>,
        recorder: Arc<dyn SessionRecorder>,
    ) -> Result<Self> {
        Self::new(
            config,
            catalog,
            Arc::new(default_snapshot_source()),
            recorder,
        )
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Starts the polling thread. The first tick runs immediately.
    pub fn start(&self) -> Result<()> {
        self.ensure_not_stopped()?;
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Err(TrackerError::AlreadyStarted);
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let core = Arc::clone(&self.core);
        let fetcher = Arc::clone(&self.fetcher);
        let interval = self.config.poll_interval;
        let handle = thread::Builder::new()
            .name("playtime-tracker".to_string())
            .spawn(move || run_loop(&core, &fetcher, interval, &stop_rx))
            .map_err(TrackerError::Spawn)?;

        info!(
            poll_interval_ms = interval.as_millis() as u64,
            session_timeout_ms = self.config.session_timeout.as_millis() as u64,
            "Tracker started"
        );
        *worker = Some(Worker { handle, stop_tx });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && lock(&self.worker).is_some()
    }

    /// Runs one tick on the calling thread, for hosts that drive their own
    /// schedule instead of calling [`Tracker::start`]. Refused while the
    /// polling thread owns the schedule.
    pub fn tick_now(&self) -> Result<TickSummary> {
        self.ensure_not_stopped()?;
        if lock(&self.worker).is_some() {
            return Err(TrackerError::AlreadyStarted);
        }
        run_tick(&self.core, &self.fetcher)
    }

    /// Ends every running session, records it, and stops polling.
    ///
    /// Returns within roughly `stop_flush_timeout` even if the recorder hangs.
    /// A second call is a no-op.
    pub fn stop(&self) -> StopReport {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return StopReport::default();
        }
        let deadline = Instant::now() + self.config.stop_flush_timeout;

        let worker = lock(&self.worker).take();
        if let Some(worker) = &worker {
            let _ = worker.stop_tx.send(());
        }

        let progress = Arc::new(Mutex::new(FlushProgress::default()));
        let (done_tx, done_rx) = mpsc::channel();
        let core = Arc::clone(&self.core);
        let shared = Arc::clone(&progress);
        let spawned = thread::Builder::new()
            .name("playtime-flush".to_string())
            .spawn(move || {
                let pending = flush_for_stop(&core, &shared);
                let _ = done_tx.send(pending);
            });

        let report = match spawned {
            Ok(_) => match done_rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            {
                Ok(pending) => finished_report(&progress, pending),
                Err(_) => timed_out_report(&progress),
            },
            Err(err) => {
                warn!(error = %err, "Failed to spawn flush thread; flushing inline");
                let pending = flush_for_stop(&self.core, &progress);
                finished_report(&progress, pending)
            }
        };

        if let Some(worker) = worker {
            join_until(worker.handle, deadline);
        }

        info!(
            flushed = report.flushed.len(),
            unflushed = report.unflushed_entries.len(),
            timed_out = report.timed_out,
            "Tracker stopped"
        );
        report
    }

    pub fn add_entry(&self, id: &str, title: &str, executable_path: &str) -> Result<()> {
        self.ensure_not_stopped()?;
        lock(&self.core).add_entry(id, title, executable_path);
        Ok(())
    }

    /// Removes an entry, recording its run first if it is running. Returns
    /// whether the id was tracked.
    pub fn remove_entry(&self, id: &str) -> Result<bool> {
        self.ensure_not_stopped()?;
        Ok(lock(&self.core).remove_entry(id, Utc::now()))
    }

    pub fn status(&self) -> Vec<EntryStatus> {
        lock(&self.core).status(Utc::now())
    }

    /// Events are delivered after the tick that produced them. Dropping the
    /// receiver unsubscribes.
    pub fn subscribe(&self) -> mpsc::Receiver<TrackerEvent> {
        lock(&self.core).subscribe()
    }

    pub fn health(&self) -> TrackerHealth {
        lock(&self.core).health()
    }

    pub fn invalidate_catalog(&self) {
        lock(&self.core).invalidate_catalog();
    }

    /// Completed runs whose persistence has failed so far.
    pub fn unflushed(&self) -> Vec<SessionRecord> {
        lock(&self.core).unflushed()
    }

    fn ensure_not_stopped(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            Err(TrackerError::Stopped)
        } else {
            Ok(())
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        if !self.stopped.load(Ordering::Acquire) {
            self.stop();
        }
    }
}

fn run_loop(
    core: &Mutex<TrackerCore>,
    fetcher: &BoundedSnapshotFetcher,
    interval: Duration,
    stop_rx: &mpsc::Receiver<()>,
) {
    let mut next = Instant::now();
    loop {
        // Errors are already logged and reflected in health.
        let _ = run_tick(core, fetcher);

        next += interval;
        let now = Instant::now();
        if next < now {
            debug!("Tick overran its interval; skipping missed ticks");
            next = now;
        }
        match stop_rx.recv_timeout(next.saturating_duration_since(now)) {
            Err(mpsc::RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Tracker loop exited");
}

fn run_tick(core: &Mutex<TrackerCore>, fetcher: &BoundedSnapshotFetcher) -> Result<TickSummary> {
    let observation = fetcher.fetch();
    let now = Utc::now();
    let mut core = lock(core);
    match panic::catch_unwind(AssertUnwindSafe(|| core.tick(now, observation))) {
        Ok(summary) => Ok(summary),
        Err(_) => {
            core.mark_degraded();
            error!("Tracker tick panicked; state kept, next tick will retry");
            Err(TrackerError::TickPanicked)
        }
    }
}

/// Returns the number of records still pending after the flush.
fn flush_for_stop(core: &Mutex<TrackerCore>, progress: &Mutex<FlushProgress>) -> usize {
    let mut core = lock(core);
    core.mark_stopped();
    let ids = core.running_ids();
    {
        let mut progress = lock(progress);
        progress.captured = true;
        progress.remaining = ids.clone();
    }
    let now = Utc::now();
    for id in ids {
        let flushed = core.flush_entry(&id, now);
        let mut progress = lock(progress);
        progress.remaining.retain(|remaining| remaining != &id);
        if flushed {
            progress.flushed.push(id);
        }
    }
    core.retry_pending();
    core.unflushed().len()
}

fn finished_report(progress: &Mutex<FlushProgress>, pending: usize) -> StopReport {
    let progress = lock(progress);
    if pending > 0 {
        warn!(pending_records = pending, "Stopping with unpersisted sessions");
    }
    StopReport {
        flushed: progress.flushed.clone(),
        unflushed_entries: progress.remaining.clone(),
        pending_records: Some(pending),
        timed_out: false,
    }
}

fn timed_out_report(progress: &Mutex<FlushProgress>) -> StopReport {
    let progress = lock(progress);
    if progress.captured {
        warn!(
            entries = ?progress.remaining,
            "Stop timed out before all running entries were flushed"
        );
    } else {
        warn!("Stop timed out waiting for the tracker core; running entries unknown");
    }
    StopReport {
        flushed: progress.flushed.clone(),
        unflushed_entries: progress.remaining.clone(),
        pending_records: None,
        timed_out: true,
    }
}

fn join_until(handle: JoinHandle<()>, deadline: Instant) {
    while !handle.is_finished() && Instant::now() < deadline {
        thread::sleep(JOIN_POLL);
    }
    if !handle.is_finished() {
        warn!("Tracker thread still busy at stop deadline; detaching");
        return;
    }
    if handle.join().is_err() {
        error!("Tracker thread panicked");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
