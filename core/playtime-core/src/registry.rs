//! Keyed store of tracked entries.
//!
//! The registry itself is not synchronized; the tracker guards it with the
//! same mutex that serializes ticks.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::matcher::MatchTarget;
use crate::types::EntryStatus;

/// Run state of an entry. Session timestamps only exist while running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    Idle,
    Running {
        session_started_at: DateTime<Utc>,
        last_detected_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry {
    pub id: String,
    pub title: String,
    executable_path: String,
    target: MatchTarget,
    pub state: EntryState,
    pub accumulated_seconds: u64,
}

impl TrackedEntry {
    pub fn new(id: impl Into<String>, title: impl Into<String>, executable_path: &str) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            executable_path: executable_path.to_string(),
            target: MatchTarget::new(executable_path),
            state: EntryState::Idle,
            accumulated_seconds: 0,
        }
    }

    pub fn executable_path(&self) -> &str {
        &self.executable_path
    }

    pub fn set_executable_path(&mut self, executable_path: &str) {
        if self.executable_path != executable_path {
            self.executable_path = executable_path.to_string();
            self.target = MatchTarget::new(executable_path);
        }
    }

    pub fn executable_name(&self) -> &str {
        self.target.executable_name()
    }

    pub fn target(&self) -> &MatchTarget {
        &self.target
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EntryState::Running { .. })
    }

    pub fn session_started_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            EntryState::Running {
                session_started_at, ..
            } => Some(session_started_at),
            EntryState::Idle => None,
        }
    }

    pub fn last_detected_at(&self) -> Option<DateTime<Utc>> {
        match self.state {
            EntryState::Running {
                last_detected_at, ..
            } => Some(last_detected_at),
            EntryState::Idle => None,
        }
    }

    pub fn current_duration_seconds(&self, now: DateTime<Utc>) -> u64 {
        self.session_started_at()
            .map(|started| seconds_between(started, now))
            .unwrap_or(0)
    }

    pub fn status(&self, now: DateTime<Utc>) -> EntryStatus {
        EntryStatus {
            id: self.id.clone(),
            title: self.title.clone(),
            executable_name: self.executable_name().to_string(),
            is_running: self.is_running(),
            current_duration_seconds: self.current_duration_seconds(now),
        }
    }
}

/// Whole seconds from `start` to `end`, clamped at zero.
pub fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    end.signed_duration_since(start).num_seconds().max(0) as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: BTreeMap<String, TrackedEntry>,
    // Ids removed explicitly; auto-discovery skips them until re-added.
    tombstones: HashSet<String>,
}

impl Registry {
    /// Inserts a new entry, or updates title/path of an existing one without
    /// touching its run state.
    pub fn upsert(&mut self, id: &str, title: &str, executable_path: &str) -> UpsertOutcome {
        self.tombstones.remove(id);
        match self.entries.get_mut(id) {
            Some(existing) => {
                existing.title = title.to_string();
                existing.set_executable_path(executable_path);
                UpsertOutcome::Updated
            }
            None => {
                self.entries.insert(
                    id.to_string(),
                    TrackedEntry::new(id, title, executable_path),
                );
                UpsertOutcome::Added
            }
        }
    }

    /// Removes an entry and tombstones its id. Callers flush running entries
    /// before taking them.
    pub fn take(&mut self, id: &str) -> Option<TrackedEntry> {
        let removed = self.entries.remove(id);
        if removed.is_some() {
            self.tombstones.insert(id.to_string());
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_tombstoned(&self, id: &str) -> bool {
        self.tombstones.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&TrackedEntry> {
        self.entries.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TrackedEntry> {
        self.entries.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackedEntry> {
        self.entries.values_mut()
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.is_running())
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("parse")
            .with_timezone(&Utc)
    }

    #[test]
    fn upsert_updates_without_resetting_running_state() {
        let mut registry = Registry::default();
        assert_eq!(
            registry.upsert("vn", "Visual Novel", "/games/vn/game.exe"),
            UpsertOutcome::Added
        );

        let started = at("2026-03-01T10:00:00Z");
        registry.get_mut("vn").expect("entry").state = EntryState::Running {
            session_started_at: started,
            last_detected_at: started,
        };

        assert_eq!(
            registry.upsert("vn", "Visual Novel HD", r"D:\Games\VN\Game.exe"),
            UpsertOutcome::Updated
        );
        let entry = registry.get("vn").expect("entry");
        assert_eq!(entry.title, "Visual Novel HD");
        assert_eq!(entry.target().path(), "d:/games/vn/game.exe");
        assert_eq!(entry.session_started_at(), Some(started));
    }

    #[test]
    fn take_tombstones_until_readded() {
        let mut registry = Registry::default();
        registry.upsert("vn", "Visual Novel", "/games/vn/game.exe");

        assert!(registry.take("vn").is_some());
        assert!(registry.is_tombstoned("vn"));
        assert!(registry.take("vn").is_none());

        registry.upsert("vn", "Visual Novel", "/games/vn/game.exe");
        assert!(!registry.is_tombstoned("vn"));
    }

    #[test]
    fn unknown_take_does_not_tombstone() {
        let mut registry = Registry::default();
        assert!(registry.take("ghost").is_none());
        assert!(!registry.is_tombstoned("ghost"));
    }

    #[test]
    fn status_reports_running_duration() {
        let mut entry = TrackedEntry::new("vn", "Visual Novel", "/Games/VN/Game.exe");
        let now = at("2026-03-01T10:00:42Z");
        assert_eq!(entry.status(now).current_duration_seconds, 0);

        entry.state = EntryState::Running {
            session_started_at: at("2026-03-01T10:00:00Z"),
            last_detected_at: at("2026-03-01T10:00:40Z"),
        };
        let status = entry.status(now);
        assert!(status.is_running);
        assert_eq!(status.executable_name, "game.exe");
        assert_eq!(status.current_duration_seconds, 42);
    }
}
