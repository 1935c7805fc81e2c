//! playtime-daemon: attributes running time to catalogued executables.
//!
//! A thin host around `playtime_core::Tracker`. Trackables listed in the
//! config file are mirrored into SQLite, which then serves as the catalog and
//! stores every completed session.
//!
//! ## Subcommands
//!
//! - `run`: poll until Ctrl-C, printing tracker events as JSON lines
//! - `once`: one observation, print status (nothing is recorded)
//! - `sessions` / `totals`: read back stored time

mod config;
mod db;
mod logging;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use clap::{Parser, Subcommand};
use playtime_core::{
    CatalogProvider, SessionRecord, SessionRecorder, Tracker, TrackerEvent,
};
use serde::Serialize;
use tracing::{error, info, warn};

use config::DaemonConfig;
use db::Db;

const DEFAULT_SESSION_LIMIT: usize = 20;

#[derive(Parser)]
#[command(name = "playtime-daemon")]
#[command(about = "Tracks how long catalogued programs run")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.playtime/daemon.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SQLite database (default: ~/.playtime/playtime.db)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track until interrupted
    Run,

    /// Observe the process table once and print entry status
    Once,

    /// Print recent sessions, newest first
    Sessions {
        #[arg(long, default_value_t = DEFAULT_SESSION_LIMIT)]
        limit: usize,
    },

    /// Print accumulated time per catalog entry
    Totals,
}

fn main() {
    let cli = Cli::parse();
    let _logging_guard = init_logging(&cli.command);

    let daemon_config = match config::load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %err, "Failed to load daemon config; using defaults");
            DaemonConfig::default()
        }
    };

    let db = match daemon_config.db_path(cli.db.clone()).and_then(Db::new) {
        Ok(db) => Arc::new(db),
        Err(err) => {
            error!(error = %err, "Failed to initialize playtime database");
            std::process::exit(1);
        }
    };

    if let Err(err) = db.sync_catalog(&daemon_config.trackables) {
        error!(error = %err, "Failed to sync configured trackables");
        std::process::exit(1);
    }

    let result = match cli.command {
        Commands::Run => run(&daemon_config, db),
        Commands::Once => once(&daemon_config, &db),
        Commands::Sessions { limit } => db.list_sessions(limit).and_then(|s| print_json(&s)),
        Commands::Totals => db.totals().and_then(|totals| print_json(&totals)),
    };

    if let Err(err) = result {
        error!(error = %err, "playtime-daemon command failed");
        std::process::exit(1);
    }
}

fn init_logging(command: &Commands) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    if !matches!(command, Commands::Run) {
        logging::init();
        return None;
    }
    match config::data_dir() {
        Ok(dir) => logging::init_with_file(&dir.join("logs")),
        Err(_) => {
            logging::init();
            None
        }
    }
}

fn run(daemon_config: &DaemonConfig, db: Arc<Db>) -> Result<(), String> {
    let db_path = db.path().to_path_buf();
    let recorder: Arc<dyn SessionRecorder> = db.clone();
    let tracker = build_tracker(daemon_config, db, recorder)?;

    let printer = spawn_event_printer(tracker.subscribe(), io::stdout())?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(());
    })
    .map_err(|err| format!("Failed to install Ctrl-C handler: {}", err))?;

    tracker.start().map_err(String::from)?;
    info!(db = %db_path.display(), "Playtime daemon started");

    // Either a signal or a dropped handler ends the wait.
    let _ = shutdown_rx.recv();
    info!("Shutdown requested");

    let report = tracker.stop();
    if report.timed_out {
        warn!(
            unflushed = ?report.unflushed_entries,
            "Shutdown flush timed out"
        );
    }
    info!(
        flushed = report.flushed.len(),
        pending_records = ?report.pending_records,
        "Playtime daemon stopped"
    );

    // The printer drains until every event sender is gone. A timed-out flush
    // thread may still hold one, so only a completed stop is waited on.
    drop(tracker);
    if !report.timed_out && printer.join().is_err() {
        warn!("Event printer panicked");
    }
    Ok(())
}

/// Writes each event as one JSON line until every sender is dropped, then
/// hands the writer back.
fn spawn_event_printer<W>(
    events: mpsc::Receiver<TrackerEvent>,
    mut out: W,
) -> Result<JoinHandle<W>, String>
where
    W: Write + Send + 'static,
{
    thread::Builder::new()
        .name("playtime-events".to_string())
        .spawn(move || {
            for event in events {
                let written = serde_json::to_string(&event)
                    .map_err(|err| err.to_string())
                    .and_then(|line| writeln!(out, "{}", line).map_err(|err| err.to_string()));
                if let Err(err) = written {
                    warn!(error = %err, "Failed to print tracker event");
                }
            }
            out
        })
        .map_err(|err| format!("Failed to spawn event printer: {}", err))
}

/// A dry observation: runs are never recorded, so nothing is written.
fn once(daemon_config: &DaemonConfig, db: &Arc<Db>) -> Result<(), String> {
    let discard: Arc<dyn SessionRecorder> =
        Arc::new(|_: &SessionRecord| -> Result<(), String> { Ok(()) });
    let tracker = build_tracker(daemon_config, Arc::clone(db), discard)?;
    let summary = tracker.tick_now().map_err(String::from)?;
    if !summary.observed {
        warn!("Process table could not be observed");
    }
    print_json(&tracker.status())?;
    tracker.stop();
    Ok(())
}

/// Builds a tracker over the database catalog and pre-registers every
/// catalog entry. Entries added to the catalog later are picked up by
/// auto-discovery once they are seen running.
fn build_tracker(
    daemon_config: &DaemonConfig,
    db: Arc<Db>,
    recorder: Arc<dyn SessionRecorder>,
) -> Result<Tracker, String> {
    let trackables = db.list_trackables()?;
    let catalog: Arc<dyn CatalogProvider> = db;
    let tracker = Tracker::with_default_source(daemon_config.tracker_config(), catalog, recorder)
        .map_err(String::from)?;
    for trackable in &trackables {
        tracker
            .add_entry(&trackable.id, &trackable.title, &trackable.executable_path)
            .map_err(String::from)?;
    }
    info!(entries = trackables.len(), "Catalog loaded");
    Ok(tracker)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), String> {
    let output = serde_json::to_string_pretty(value)
        .map_err(|err| format!("Failed to serialize output: {}", err))?;
    println!("{}", output);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use playtime_core::{
        ProcessInfo, ProcessSnapshot, ProcessSnapshotSource, SnapshotError, SnapshotFidelity,
        StaticCatalog, TrackerConfig,
    };
    use std::time::Duration;

    struct RunningGame;

    impl ProcessSnapshotSource for RunningGame {
        fn snapshot(&self) -> Result<ProcessSnapshot, SnapshotError> {
            Ok(ProcessSnapshot {
                captured_at: Utc::now(),
                fidelity: SnapshotFidelity::Rich,
                processes: vec![ProcessInfo::new(
                    7,
                    "game.exe",
                    Some("/games/vn/game.exe".to_string()),
                )],
            })
        }
    }

    #[test]
    fn printer_drains_events_emitted_by_stop() {
        let discard: Arc<dyn SessionRecorder> =
            Arc::new(|_: &SessionRecord| -> Result<(), String> { Ok(()) });
        let tracker = Tracker::new(
            TrackerConfig::with_poll_interval(Duration::from_millis(20)),
            Arc::new(StaticCatalog::default()),
            Arc::new(RunningGame),
            discard,
        )
        .expect("tracker");
        tracker
            .add_entry("vn", "Visual Novel", "/games/vn/game.exe")
            .expect("add entry");

        let printer = spawn_event_printer(tracker.subscribe(), Vec::new()).expect("spawn");
        tracker.tick_now().expect("tick");
        assert!(!tracker.stop().timed_out);
        drop(tracker);

        let output = String::from_utf8(printer.join().expect("join")).expect("utf8");
        let kinds: Vec<String> = output
            .lines()
            .map(|line| {
                let value: serde_json::Value = serde_json::from_str(line).expect("json line");
                value["type"].as_str().unwrap_or_default().to_string()
            })
            .collect();
        assert_eq!(kinds, vec!["started", "ended"]);
    }
}
