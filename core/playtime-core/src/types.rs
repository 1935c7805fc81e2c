//! Shared data types for the tracker pipeline.
//!
//! Everything a host might log or ship over IPC derives `Serialize`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ═══════════════════════════════════════════════════════════════════════════════
// Observation
// ═══════════════════════════════════════════════════════════════════════════════

/// One row of the OS process table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Full command line (or executable path). `None` under basic enumeration.
    #[serde(default)]
    pub command_line: Option<String>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>, command_line: Option<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            command_line,
        }
    }
}

/// How much detail the enumerator that produced a snapshot could see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFidelity {
    /// Command lines / executable paths are available.
    Rich,
    /// Process names only.
    Basic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessSnapshot {
    pub captured_at: DateTime<Utc>,
    pub fidelity: SnapshotFidelity,
    pub processes: Vec<ProcessInfo>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Catalog & persistence
// ═══════════════════════════════════════════════════════════════════════════════

/// An executable the host application knows how to attribute time to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trackable {
    pub id: String,
    pub title: String,
    pub executable_path: String,
}

impl Trackable {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        executable_path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            executable_path: executable_path.into(),
        }
    }
}

/// A completed continuous run, handed to the session recorder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub entry_id: String,
    pub duration_seconds: u64,
    pub ended_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Host-facing outputs
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    Started {
        id: String,
        title: String,
        executable_name: String,
    },
    Ended {
        id: String,
        title: String,
        executable_name: String,
        duration_seconds: u64,
    },
}

impl TrackerEvent {
    pub fn id(&self) -> &str {
        match self {
            TrackerEvent::Started { id, .. } | TrackerEvent::Ended { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub id: String,
    pub title: String,
    pub executable_name: String,
    pub is_running: bool,
    pub current_duration_seconds: u64,
}

/// What one tick did, for logs and health reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    /// False when the process table could not be observed this tick.
    pub observed: bool,
    pub tracked: usize,
    pub running: usize,
    pub discovered: usize,
    pub started: usize,
    pub ended: usize,
    pub pending_records: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TrackerHealth {
    /// Set when a tick panicked; cleared by the next tick that completes.
    pub degraded: bool,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub consecutive_snapshot_failures: u32,
    pub pending_records: usize,
    pub last_summary: Option<TickSummary>,
}
