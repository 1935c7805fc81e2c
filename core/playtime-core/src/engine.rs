//! TrackerCore - the single-threaded heart of the tracker.
//!
//! Every mutation of tracked state goes through a `&mut TrackerCore`, and the
//! [`crate::Tracker`] service keeps exactly one behind a mutex. That mutex is
//! the only gate: ticks, `add_entry`, `remove_entry` and status queries are
//! serialized against each other.
//!
//! A tick, given one observation of the process table:
//!
//! 1. reads the catalog through the TTL cache,
//! 2. registers catalog entries that are running but not yet tracked,
//! 3. matches every tracked entry against the same snapshot,
//! 4. applies Idle/Running transitions, emitting events and recording ended
//!    runs,
//! 5. retries previously failed session records and summarizes.
//!
//! An unobserved tick (snapshot error) skips 2-4 entirely, so an enumeration
//! hiccup is never mistaken for every program exiting.

use std::sync::mpsc;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogCache, CatalogProvider, CatalogStatus};
use crate::config::TrackerConfig;
use crate::error::{SnapshotError, TrackerError};
use crate::matcher::{MatchTarget, SnapshotIndex};
use crate::recorder::{PendingRecords, SessionRecorder};
use crate::registry::{Registry, TrackedEntry, UpsertOutcome};
use crate::transition::{force_end, observe, Transition};
use crate::types::{
    EntryStatus, ProcessSnapshot, SessionRecord, TickSummary, Trackable, TrackerEvent,
    TrackerHealth,
};

/// Outcome of flushing running entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub flushed: Vec<String>,
    /// Records from this flush (or earlier) that are still not persisted.
    pub pending_records: usize,
}

pub struct TrackerCore {
    config: TrackerConfig,
    registry: Registry,
    catalog: CatalogCache,
    recorder: Arc<dyn SessionRecorder>,
    pending: PendingRecords,
    subscribers: Vec<mpsc::Sender<TrackerEvent>>,
    health: TrackerHealth,
    stopped: bool,
}

impl TrackerCore {
    pub fn new(
        config: TrackerConfig,
        catalog: Arc<dyn CatalogProvider>,
        recorder: Arc<dyn SessionRecorder>,
    ) -> Self {
        let catalog = CatalogCache::new(catalog, config.catalog_ttl);
        Self {
            config,
            registry: Registry::default(),
            catalog,
            recorder,
            pending: PendingRecords::default(),
            subscribers: Vec::new(),
            health: TrackerHealth::default(),
            stopped: false,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ─────────────────────────────────────────────────────────────────────
    // Host API
    // ─────────────────────────────────────────────────────────────────────

    /// Adds an entry, or updates title/path of an existing one. A running
    /// entry keeps its session.
    pub fn add_entry(&mut self, id: &str, title: &str, executable_path: &str) {
        match self.registry.upsert(id, title, executable_path) {
            UpsertOutcome::Added => {
                info!(id = %id, title = %title, path = %executable_path, "Tracking entry added")
            }
            UpsertOutcome::Updated => {
                debug!(id = %id, title = %title, path = %executable_path, "Tracking entry updated")
            }
        }
    }

    /// Removes an entry, ending (and recording) its run first if it is
    /// running. Unknown ids are a no-op. Returns whether anything was removed.
    pub fn remove_entry(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if !self.registry.contains(id) {
            return false;
        }
        self.flush_entry(id, now);
        let removed = self.registry.take(id).is_some();
        if removed {
            info!(id = %id, "Tracking entry removed");
        }
        removed
    }

    pub fn status(&self, now: DateTime<Utc>) -> Vec<EntryStatus> {
        self.registry.iter().map(|entry| entry.status(now)).collect()
    }

    pub fn subscribe(&mut self) -> mpsc::Receiver<TrackerEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    pub fn invalidate_catalog(&mut self) {
        self.catalog.invalidate();
    }

    pub fn health(&self) -> TrackerHealth {
        TrackerHealth {
            pending_records: self.pending.len(),
            ..self.health.clone()
        }
    }

    pub fn unflushed(&self) -> Vec<SessionRecord> {
        self.pending.snapshot()
    }

    pub fn mark_degraded(&mut self) {
        self.health.degraded = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// After this, ticks are ignored. Entries are not flushed here.
    pub fn mark_stopped(&mut self) {
        self.stopped = true;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tick
    // ─────────────────────────────────────────────────────────────────────

    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        observation: Result<ProcessSnapshot, SnapshotError>,
    ) -> TickSummary {
        if self.stopped {
            debug!("Ignoring tick on stopped tracker");
            return TickSummary::default();
        }

        let trackables = self.read_catalog(now);
        let mut summary = TickSummary::default();

        match observation {
            Ok(snapshot) => {
                self.health.consecutive_snapshot_failures = 0;
                summary.observed = true;
                let index = SnapshotIndex::new(&snapshot);

                if let Some(trackables) = trackables {
                    summary.discovered = self.discover(&trackables, &index);
                }

                self.pending.retry(self.recorder.as_ref());
                let (started, ended) = self.evaluate(&index, now);
                summary.started = started;
                summary.ended = ended;
            }
            Err(err) => {
                let err = TrackerError::from(err);
                self.health.consecutive_snapshot_failures =
                    self.health.consecutive_snapshot_failures.saturating_add(1);
                warn!(
                    error = %err,
                    consecutive_failures = self.health.consecutive_snapshot_failures,
                    "Process table not observed; skipping matching this tick"
                );
                self.pending.retry(self.recorder.as_ref());
            }
        }

        summary.tracked = self.registry.len();
        summary.running = self.registry.iter().filter(|e| e.is_running()).count();
        summary.pending_records = self.pending.len();

        debug!(
            observed = summary.observed,
            tracked = summary.tracked,
            running = summary.running,
            discovered = summary.discovered,
            started = summary.started,
            ended = summary.ended,
            pending_records = summary.pending_records,
            "Tick complete"
        );

        self.health.degraded = false;
        self.health.last_tick_at = Some(now);
        self.health.last_summary = Some(summary.clone());
        summary
    }

    /// Catalog entries to consider for discovery, or `None` when discovery
    /// is off or no catalog has ever been available.
    fn read_catalog(&mut self, now: DateTime<Utc>) -> Option<Vec<Trackable>> {
        if !self.config.auto_discover {
            return None;
        }
        let (status, trackables) = self.catalog.read(now);
        match status {
            CatalogStatus::Unavailable => None,
            _ => Some(trackables.to_vec()),
        }
    }

    fn discover(&mut self, trackables: &[Trackable], index: &SnapshotIndex) -> usize {
        let mut discovered = 0;
        for trackable in trackables {
            if self.registry.contains(&trackable.id) || self.registry.is_tombstoned(&trackable.id)
            {
                continue;
            }
            let target = MatchTarget::new(&trackable.executable_path);
            if let Some(evidence) = index.find(&target) {
                info!(
                    id = %trackable.id,
                    title = %trackable.title,
                    pid = evidence.pid,
                    tier = ?evidence.tier,
                    "Auto-discovered running trackable"
                );
                self.registry
                    .upsert(&trackable.id, &trackable.title, &trackable.executable_path);
                discovered += 1;
            }
        }
        discovered
    }

    fn evaluate(&mut self, index: &SnapshotIndex, now: DateTime<Utc>) -> (usize, usize) {
        let timeout = self.config.session_timeout;
        let mut events = Vec::new();
        let mut records = Vec::new();

        for entry in self.registry.iter_mut() {
            let evidence = index.find(entry.target());
            match observe(entry, evidence.is_some(), now, timeout) {
                Transition::Started => {
                    if let Some(evidence) = evidence {
                        info!(
                            id = %entry.id,
                            title = %entry.title,
                            pid = evidence.pid,
                            tier = ?evidence.tier,
                            "Session started"
                        );
                    }
                    events.push(started_event(entry));
                }
                Transition::Ended { duration_seconds } => {
                    info!(
                        id = %entry.id,
                        title = %entry.title,
                        duration_seconds,
                        "Session ended"
                    );
                    events.push(ended_event(entry, duration_seconds));
                    records.push(SessionRecord {
                        entry_id: entry.id.clone(),
                        duration_seconds,
                        ended_at: now,
                    });
                }
                Transition::Detected | Transition::Unchanged => {}
            }
        }

        let started = events
            .iter()
            .filter(|event| matches!(event, TrackerEvent::Started { .. }))
            .count();
        let ended = records.len();
        for event in events {
            self.emit(event);
        }
        for record in records {
            self.pending.persist(self.recorder.as_ref(), record);
        }
        (started, ended)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Flush
    // ─────────────────────────────────────────────────────────────────────

    pub fn running_ids(&self) -> Vec<String> {
        self.registry.running_ids()
    }

    /// Ends one entry's run now and records it. Returns false if the entry is
    /// unknown or idle.
    pub fn flush_entry(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        let Some(entry) = self.registry.get_mut(id) else {
            return false;
        };
        let Some(duration_seconds) = force_end(entry, now) else {
            return false;
        };
        info!(
            id = %entry.id,
            title = %entry.title,
            duration_seconds,
            "Session flushed"
        );
        let event = ended_event(entry, duration_seconds);
        self.emit(event);
        self.pending.persist(
            self.recorder.as_ref(),
            SessionRecord {
                entry_id: id.to_string(),
                duration_seconds,
                ended_at: now,
            },
        );
        true
    }

    /// Ends and records every running entry, then retries older failures.
    pub fn flush_all(&mut self, now: DateTime<Utc>) -> FlushReport {
        let flushed = self
            .running_ids()
            .into_iter()
            .filter(|id| self.flush_entry(id, now))
            .collect();
        self.pending.retry(self.recorder.as_ref());
        FlushReport {
            flushed,
            pending_records: self.pending.len(),
        }
    }

    pub fn retry_pending(&mut self) -> usize {
        self.pending.retry(self.recorder.as_ref())
    }

    fn emit(&mut self, event: TrackerEvent) {
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }
}

fn started_event(entry: &TrackedEntry) -> TrackerEvent {
    TrackerEvent::Started {
        id: entry.id.clone(),
        title: entry.title.clone(),
        executable_name: entry.executable_name().to_string(),
    }
}

fn ended_event(entry: &TrackedEntry, duration_seconds: u64) -> TrackerEvent {
    TrackerEvent::Ended {
        id: entry.id.clone(),
        title: entry.title.clone(),
        executable_name: entry.executable_name().to_string(),
        duration_seconds,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::types::{ProcessInfo, SnapshotFidelity};
    use chrono::Duration as ChronoDuration;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct MemoryRecorder {
        records: Mutex<Vec<SessionRecord>>,
    }

    impl SessionRecorder for MemoryRecorder {
        fn record(&self, record: &SessionRecord) -> Result<(), String> {
            self.records.lock().expect("lock").push(record.clone());
            Ok(())
        }
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("parse")
            .with_timezone(&Utc)
            + ChronoDuration::seconds(secs)
    }

    fn snapshot(processes: Vec<ProcessInfo>) -> Result<ProcessSnapshot, SnapshotError> {
        Ok(ProcessSnapshot {
            captured_at: t(0),
            fidelity: SnapshotFidelity::Rich,
            processes,
        })
    }

    fn core(catalog: Vec<Trackable>) -> (TrackerCore, Arc<MemoryRecorder>) {
        let recorder = Arc::new(MemoryRecorder::default());
        let config = TrackerConfig::with_poll_interval(Duration::from_secs(5));
        let core = TrackerCore::new(
            config,
            Arc::new(StaticCatalog::new(catalog)),
            recorder.clone(),
        );
        (core, recorder)
    }

    #[test]
    fn remove_running_entry_flushes_first() {
        let (mut core, recorder) = core(vec![]);
        let events = core.subscribe();
        core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
        core.tick(
            t(0),
            snapshot(vec![ProcessInfo::new(
                1,
                "game.exe",
                Some("/games/vn/game.exe".to_string()),
            )]),
        );

        assert!(core.remove_entry("vn", t(7)));
        assert!(!core.remove_entry("vn", t(8)));

        let records = recorder.records.lock().expect("lock").clone();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].duration_seconds, 7);
        let ended: Vec<_> = events
            .try_iter()
            .filter(|event| matches!(event, TrackerEvent::Ended { .. }))
            .collect();
        assert_eq!(ended.len(), 1);
    }

    #[test]
    fn removed_entries_are_not_rediscovered() {
        let (mut core, _) = core(vec![Trackable::new("vn", "Visual Novel", "/games/vn/game.exe")]);
        let running = || {
            snapshot(vec![ProcessInfo::new(
                1,
                "game.exe",
                Some("/games/vn/game.exe".to_string()),
            )])
        };

        assert_eq!(core.tick(t(0), running()).discovered, 1);
        core.remove_entry("vn", t(5));
        assert_eq!(core.tick(t(10), running()).discovered, 0);
        assert!(core.status(t(10)).is_empty());

        core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
        assert_eq!(core.status(t(10)).len(), 1);
    }

    #[test]
    fn stopped_core_ignores_ticks() {
        let (mut core, _) = core(vec![]);
        core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
        core.mark_stopped();
        let summary = core.tick(
            t(0),
            snapshot(vec![ProcessInfo::new(
                1,
                "game.exe",
                Some("/games/vn/game.exe".to_string()),
            )]),
        );
        assert_eq!(summary, TickSummary::default());
        assert!(core.running_ids().is_empty());
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let (mut core, _) = core(vec![]);
        let kept = core.subscribe();
        drop(core.subscribe());
        core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
        core.tick(
            t(0),
            snapshot(vec![ProcessInfo::new(
                1,
                "game.exe",
                Some("/games/vn/game.exe".to_string()),
            )]),
        );
        assert_eq!(core.subscribers.len(), 1);
        assert_eq!(kept.try_iter().count(), 1);
    }
}
