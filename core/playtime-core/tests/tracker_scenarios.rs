//! End-to-end behavior of the tracker: timing scenarios driven through
//! `TrackerCore` with explicit clocks, and lifecycle checks on the threaded
//! `Tracker` with in-memory fakes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use playtime_core::{
    CatalogProvider, ProcessInfo, ProcessSnapshot, ProcessSnapshotSource, SessionRecord, SessionRecorder,
    SnapshotError, SnapshotFidelity, StaticCatalog, Trackable, Tracker, TrackerConfig,
    TrackerCore, TrackerError, TrackerEvent,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fakes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryRecorder {
    records: Mutex<Vec<SessionRecord>>,
    offline: AtomicBool,
}

impl MemoryRecorder {
    fn records(&self) -> Vec<SessionRecord> {
        self.records.lock().expect("lock records").clone()
    }
}

impl SessionRecorder for MemoryRecorder {
    fn record(&self, record: &SessionRecord) -> Result<(), String> {
        if self.offline.load(Ordering::SeqCst) {
            return Err("database is locked".to_string());
        }
        self.records
            .lock()
            .expect("lock records")
            .push(record.clone());
        Ok(())
    }
}

struct HangingRecorder {
    delay: Duration,
}

impl SessionRecorder for HangingRecorder {
    fn record(&self, _: &SessionRecord) -> Result<(), String> {
        thread::sleep(self.delay);
        Ok(())
    }
}

/// Panics on the first call once armed, then behaves like `MemoryRecorder`.
#[derive(Default)]
struct PanicOnceRecorder {
    armed: AtomicBool,
    inner: MemoryRecorder,
}

impl SessionRecorder for PanicOnceRecorder {
    fn record(&self, record: &SessionRecord) -> Result<(), String> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("recorder crashed mid-write");
        }
        self.inner.record(record)
    }
}

#[derive(Default)]
struct PanicOnceCatalog {
    armed: AtomicBool,
}

impl CatalogProvider for PanicOnceCatalog {
    fn list_trackables(&self) -> Result<Vec<Trackable>, String> {
        if self.armed.swap(false, Ordering::SeqCst) {
            panic!("catalog crashed");
        }
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakeSource {
    processes: Mutex<Vec<ProcessInfo>>,
}

impl FakeSource {
    fn set(&self, processes: Vec<ProcessInfo>) {
        *self.processes.lock().expect("lock processes") = processes;
    }
}

impl ProcessSnapshotSource for FakeSource {
    fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError> {
        Ok(ProcessSnapshot {
            captured_at: Utc::now(),
            fidelity: SnapshotFidelity::Rich,
            processes: self.processes.lock().expect("lock processes").clone(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn t(secs: i64) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
        .expect("parse")
        .with_timezone(&Utc)
        + ChronoDuration::seconds(secs)
}

fn observed(processes: Vec<ProcessInfo>) -> Result<ProcessSnapshot, SnapshotError> {
    Ok(ProcessSnapshot {
        captured_at: t(0),
        fidelity: SnapshotFidelity::Rich,
        processes,
    })
}

fn vn_process() -> ProcessInfo {
    ProcessInfo::new(4242, "game.exe", Some("/games/vn/game.exe".to_string()))
}

fn core_with(catalog: Vec<Trackable>) -> (TrackerCore, Arc<MemoryRecorder>) {
    let recorder = Arc::new(MemoryRecorder::default());
    let core = TrackerCore::new(
        TrackerConfig::with_poll_interval(Duration::from_secs(5)),
        Arc::new(StaticCatalog::new(catalog)),
        recorder.clone(),
    );
    (core, recorder)
}

fn ended_durations(events: &std::sync::mpsc::Receiver<TrackerEvent>) -> Vec<u64> {
    events
        .try_iter()
        .filter_map(|event| match event {
            TrackerEvent::Ended {
                duration_seconds, ..
            } => Some(duration_seconds),
            TrackerEvent::Started { .. } => None,
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Timing scenarios (interval 5s, timeout 10s)
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn run_ends_after_two_missed_ticks() {
    let (mut core, recorder) = core_with(vec![]);
    let events = core.subscribe();
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");

    assert_eq!(core.tick(t(0), observed(vec![vn_process()])).started, 1);
    core.tick(t(5), observed(vec![vn_process()]));
    assert_eq!(core.tick(t(10), observed(vec![])).ended, 0);
    assert_eq!(core.tick(t(15), observed(vec![])).ended, 1);

    assert_eq!(ended_durations(&events), vec![15]);
    let records = recorder.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].entry_id, "vn");
    assert_eq!(records[0].duration_seconds, 15);
    assert_eq!(records[0].ended_at, t(15));
}

#[test]
fn run_ends_exactly_at_timeout_boundary() {
    let (mut core, recorder) = core_with(vec![]);
    let events = core.subscribe();
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");

    core.tick(t(0), observed(vec![vn_process()]));
    assert_eq!(core.tick(t(5), observed(vec![])).ended, 0);
    assert_eq!(core.tick(t(10), observed(vec![])).ended, 1);

    assert_eq!(ended_durations(&events), vec![10]);
    assert_eq!(recorder.records().len(), 1);
}

#[test]
fn launcher_arguments_still_match_exactly() {
    let (mut core, _) = core_with(vec![]);
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");

    let summary = core.tick(
        t(0),
        observed(vec![ProcessInfo::new(
            7,
            "game.exe",
            Some("/games/vn/game.exe --fast".to_string()),
        )]),
    );
    assert_eq!(summary.started, 1);
}

#[test]
fn shared_executable_name_only_matches_corroborated_directory() {
    let (mut core, _) = core_with(vec![]);
    core.add_entry("a", "Novel A", "/games/a/game.exe");
    core.add_entry("b", "Novel B", "/games/b/game.exe");

    core.tick(
        t(0),
        observed(vec![ProcessInfo::new(
            9,
            "game.exe",
            Some("game.exe --data=/games/a/data".to_string()),
        )]),
    );

    let status = core.status(t(0));
    let running: Vec<&str> = status
        .iter()
        .filter(|entry| entry.is_running)
        .map(|entry| entry.id.as_str())
        .collect();
    assert_eq!(running, vec!["a"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Observation failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn failed_snapshots_never_end_a_run() {
    let (mut core, recorder) = core_with(vec![]);
    let events = core.subscribe();
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
    core.tick(t(0), observed(vec![vn_process()]));

    for secs in [5, 10, 15] {
        let summary = core.tick(t(secs), Err(SnapshotError::TimedOut(Duration::from_secs(3))));
        assert!(!summary.observed);
        assert_eq!(summary.running, 1);
    }
    assert_eq!(core.health().consecutive_snapshot_failures, 3);

    core.tick(t(20), observed(vec![vn_process()]));
    assert_eq!(core.health().consecutive_snapshot_failures, 0);
    assert_eq!(core.status(t(20))[0].current_duration_seconds, 20);

    core.tick(t(25), observed(vec![]));
    core.tick(t(30), observed(vec![]));

    let started = events
        .try_iter()
        .filter(|event| matches!(event, TrackerEvent::Started { .. }))
        .count();
    assert_eq!(started, 1);
    let records = recorder.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration_seconds, 30);
}

#[test]
fn unavailable_snapshot_is_distinct_from_empty_table() {
    let (mut core, recorder) = core_with(vec![]);
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
    core.tick(t(0), observed(vec![vn_process()]));

    let unavailable = SnapshotError::Unavailable {
        rich: "denied".to_string(),
        basic: "no ps".to_string(),
    };
    core.tick(t(30), Err(unavailable));
    assert!(recorder.records().is_empty());

    core.tick(t(35), observed(vec![]));
    assert_eq!(recorder.records().len(), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery and persistence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn catalog_entries_are_discovered_once() {
    let (mut core, _) = core_with(vec![
        Trackable::new("vn", "Visual Novel", "/games/vn/game.exe"),
        Trackable::new("idle", "Not Running", "/games/idle/idle.exe"),
    ]);
    let events = core.subscribe();

    let first = core.tick(t(0), observed(vec![vn_process()]));
    assert_eq!(first.discovered, 1);
    assert_eq!(first.started, 1);
    assert_eq!(first.tracked, 1);

    let second = core.tick(t(5), observed(vec![vn_process()]));
    assert_eq!(second.discovered, 0);
    assert_eq!(second.started, 0);
    assert_eq!(events.try_iter().count(), 1);
}

#[test]
fn failed_records_are_retained_then_retried() {
    let (mut core, recorder) = core_with(vec![]);
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
    core.tick(t(0), observed(vec![vn_process()]));

    recorder.offline.store(true, Ordering::SeqCst);
    core.tick(t(5), observed(vec![]));
    let summary = core.tick(t(10), observed(vec![]));
    assert_eq!(summary.ended, 1);
    assert_eq!(summary.pending_records, 1);
    assert_eq!(core.unflushed().len(), 1);
    assert_eq!(core.health().pending_records, 1);

    recorder.offline.store(false, Ordering::SeqCst);
    let summary = core.tick(t(15), observed(vec![]));
    assert_eq!(summary.pending_records, 0);
    assert!(core.unflushed().is_empty());

    let records = recorder.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].duration_seconds, 10);
    assert_eq!(records[0].ended_at, t(10));
}

#[test]
fn panicking_recorder_retains_the_run() {
    let recorder = Arc::new(PanicOnceRecorder::default());
    let mut core = TrackerCore::new(
        TrackerConfig::with_poll_interval(Duration::from_secs(5)),
        Arc::new(StaticCatalog::default()),
        recorder.clone(),
    );
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
    core.tick(t(0), observed(vec![vn_process()]));

    recorder.armed.store(true, Ordering::SeqCst);
    let summary = core.tick(t(10), observed(vec![]));
    assert_eq!(summary.ended, 1);
    assert_eq!(summary.pending_records, 1);
    assert!(!core.health().degraded);
    assert_eq!(core.unflushed()[0].duration_seconds, 10);

    core.tick(t(15), observed(vec![]));
    assert!(core.unflushed().is_empty());
    let records = recorder.inner.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].ended_at, t(10));
}

#[test]
fn readding_running_entry_keeps_session() {
    let (mut core, recorder) = core_with(vec![]);
    core.add_entry("vn", "Visual Novel", "/games/vn/game.exe");
    core.tick(t(0), observed(vec![vn_process()]));

    core.add_entry("vn", "Visual Novel (Steam)", "/games/vn/game.exe");
    core.tick(t(5), observed(vec![vn_process()]));

    let status = core.status(t(5));
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].title, "Visual Novel (Steam)");
    assert_eq!(status[0].current_duration_seconds, 5);
    assert!(recorder.records().is_empty());
}

#[test]
fn flush_all_records_every_running_entry() {
    let (mut core, recorder) = core_with(vec![]);
    core.add_entry("a", "Novel A", "/games/a/game.exe");
    core.add_entry("b", "Novel B", "/games/b/other.exe");
    core.add_entry("c", "Novel C", "/games/c/idle.exe");
    core.tick(
        t(0),
        observed(vec![
            ProcessInfo::new(1, "game.exe", Some("/games/a/game.exe".to_string())),
            ProcessInfo::new(2, "other.exe", Some("/games/b/other.exe".to_string())),
        ]),
    );

    let report = core.flush_all(t(42));
    assert_eq!(report.flushed, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(report.pending_records, 0);
    let records = recorder.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|record| record.duration_seconds == 42));
}

// ─────────────────────────────────────────────────────────────────────────────
// Threaded service
// ─────────────────────────────────────────────────────────────────────────────

fn fast_config() -> TrackerConfig {
    TrackerConfig {
        stop_flush_timeout: Duration::from_millis(500),
        ..TrackerConfig::with_poll_interval(Duration::from_millis(20))
    }
}

#[test]
fn rejects_timeout_not_above_interval() {
    let config = TrackerConfig {
        session_timeout: Duration::from_millis(20),
        ..fast_config()
    };
    let result = Tracker::new(
        config,
        Arc::new(StaticCatalog::default()),
        Arc::new(FakeSource::default()),
        Arc::new(MemoryRecorder::default()),
    );
    assert!(matches!(result, Err(TrackerError::TimeoutTooShort { .. })));
}

#[test]
fn background_thread_starts_and_stop_flushes() {
    let source = Arc::new(FakeSource::default());
    source.set(vec![vn_process()]);
    let recorder = Arc::new(MemoryRecorder::default());
    let tracker = Tracker::new(
        fast_config(),
        Arc::new(StaticCatalog::default()),
        source.clone(),
        recorder.clone(),
    )
    .expect("tracker");

    let events = tracker.subscribe();
    tracker
        .add_entry("vn", "Visual Novel", "/games/vn/game.exe")
        .expect("add entry");
    tracker.start().expect("start");
    assert!(matches!(tracker.start(), Err(TrackerError::AlreadyStarted)));
    assert!(matches!(tracker.tick_now(), Err(TrackerError::AlreadyStarted)));
    assert!(tracker.is_running());

    let first = events
        .recv_timeout(Duration::from_secs(5))
        .expect("started event");
    assert!(matches!(first, TrackerEvent::Started { ref id, .. } if id == "vn"));

    let report = tracker.stop();
    assert!(!report.timed_out);
    assert_eq!(report.flushed, vec!["vn".to_string()]);
    assert!(report.unflushed_entries.is_empty());
    assert_eq!(report.pending_records, Some(0));
    assert_eq!(recorder.records().len(), 1);
    assert!(!tracker.is_running());

    assert!(matches!(tracker.tick_now(), Err(TrackerError::Stopped)));
    assert!(matches!(
        tracker.add_entry("x", "X", "/x.exe"),
        Err(TrackerError::Stopped)
    ));
    assert_eq!(tracker.stop(), Default::default());
}

#[test]
fn stop_with_several_running_entries_records_each() {
    let source = Arc::new(FakeSource::default());
    source.set(vec![
        ProcessInfo::new(1, "game.exe", Some("/games/a/game.exe".to_string())),
        ProcessInfo::new(2, "game.exe", Some("/games/b/game.exe".to_string())),
        ProcessInfo::new(3, "game.exe", Some("/games/c/game.exe".to_string())),
    ]);
    let recorder = Arc::new(MemoryRecorder::default());
    let tracker = Tracker::new(
        fast_config(),
        Arc::new(StaticCatalog::default()),
        source,
        recorder.clone(),
    )
    .expect("tracker");
    for id in ["a", "b", "c"] {
        tracker
            .add_entry(id, id, &format!("/games/{}/game.exe", id))
            .expect("add entry");
    }

    let summary = tracker.tick_now().expect("tick");
    assert_eq!(summary.running, 3);

    let report = tracker.stop();
    assert_eq!(report.flushed.len(), 3);
    let mut ids: Vec<String> = recorder
        .records()
        .into_iter()
        .map(|record| record.entry_id)
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[test]
fn stop_is_bounded_when_recorder_hangs() {
    let source = Arc::new(FakeSource::default());
    source.set(vec![vn_process()]);
    let config = TrackerConfig {
        stop_flush_timeout: Duration::from_millis(100),
        ..fast_config()
    };
    let tracker = Tracker::new(
        config,
        Arc::new(StaticCatalog::default()),
        source,
        Arc::new(HangingRecorder {
            delay: Duration::from_secs(2),
        }),
    )
    .expect("tracker");
    tracker
        .add_entry("vn", "Visual Novel", "/games/vn/game.exe")
        .expect("add entry");
    tracker.tick_now().expect("tick");

    let started = Instant::now();
    let report = tracker.stop();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert!(report.timed_out);
    assert_eq!(report.unflushed_entries, vec!["vn".to_string()]);
    assert_eq!(report.pending_records, None);
}

#[test]
fn remove_running_entry_records_run() {
    let source = Arc::new(FakeSource::default());
    source.set(vec![vn_process()]);
    let recorder = Arc::new(MemoryRecorder::default());
    let tracker = Tracker::new(
        fast_config(),
        Arc::new(StaticCatalog::default()),
        source,
        recorder.clone(),
    )
    .expect("tracker");
    tracker
        .add_entry("vn", "Visual Novel", "/games/vn/game.exe")
        .expect("add entry");
    tracker.tick_now().expect("tick");

    assert!(tracker.remove_entry("vn").expect("remove"));
    assert!(!tracker.remove_entry("vn").expect("remove again"));
    assert_eq!(recorder.records().len(), 1);
    assert!(tracker.status().is_empty());
    assert!(tracker.stop().flushed.is_empty());
}

#[test]
fn panicking_tick_degrades_health_until_next_tick() {
    let source = Arc::new(FakeSource::default());
    source.set(vec![vn_process()]);
    let catalog = Arc::new(PanicOnceCatalog::default());
    let recorder = Arc::new(MemoryRecorder::default());
    let tracker = Tracker::new(fast_config(), catalog.clone(), source, recorder.clone())
        .expect("tracker");
    tracker
        .add_entry("vn", "Visual Novel", "/games/vn/game.exe")
        .expect("add entry");

    catalog.armed.store(true, Ordering::SeqCst);
    assert!(matches!(tracker.tick_now(), Err(TrackerError::TickPanicked)));
    assert!(tracker.health().degraded);
    assert!(!tracker.status()[0].is_running);

    let summary = tracker.tick_now().expect("tick after panic");
    assert_eq!(summary.running, 1);
    assert!(!tracker.health().degraded);

    let report = tracker.stop();
    assert_eq!(report.flushed, vec!["vn".to_string()]);
    assert_eq!(recorder.records().len(), 1);
}
