//! # playtime-core
//!
//! Process liveness and session accounting: decides which catalogued programs
//! are running, when each continuous run began and ended, and hands every
//! completed run to a persistence seam.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. One polling thread, std
//!   channels for events and shutdown.
//! - **Unobserved is not absent**: A failed or timed-out process snapshot never
//!   ends a session. Only a successful snapshot without a match counts.
//! - **Exactly one record per run**: Completed runs that fail to persist are
//!   retained and retried, never dropped or merged.
//! - **Bounded shutdown**: `stop()` returns within its flush timeout even if
//!   the recorder hangs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use playtime_core::{StaticCatalog, Tracker, TrackerConfig};
//!
//! let tracker = Tracker::with_default_source(
//!     TrackerConfig::default(),
//!     Arc::new(StaticCatalog::new(vec![])),
//!     Arc::new(|record: &SessionRecord| store.append(record)),
//! )?;
//! tracker.add_entry("vn", "Visual Novel", r"C:\Games\VN\Game.exe")?;
//! tracker.start()?;
//! let events = tracker.subscribe();
//! // ...
//! let report = tracker.stop();
//! ```

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod matcher;
pub mod recorder;
pub mod registry;
pub mod snapshot;
pub mod tracker;
pub mod transition;
pub mod types;

pub use catalog::{CatalogCache, CatalogProvider, CatalogStatus, StaticCatalog};
pub use config::*;
pub use engine::{FlushReport, TrackerCore};
pub use error::{Result, SnapshotError, TrackerError};
pub use matcher::{find_match, normalize_path, MatchEvidence, MatchTarget, MatchTier, SnapshotIndex};
pub use recorder::{PendingRecords, SessionRecorder};
pub use registry::{EntryState, Registry, TrackedEntry};
pub use snapshot::{
    default_snapshot_source, BoundedSnapshotFetcher, FallbackSnapshotSource, ProcessEnumerator,
    ProcessSnapshotSource,
};
pub use tracker::{StopReport, Tracker};
pub use transition::{next_transition, Transition};
pub use types::*;
