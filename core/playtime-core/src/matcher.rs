//! Decides whether a process snapshot shows a candidate executable running.
//!
//! # Tiers
//!
//! 1. **Exact**: some process command line contains the candidate's full
//!    executable path (case-insensitive, separators normalized). Launchers that
//!    append arguments still match.
//! 2. **Corroborated**: only consulted when tier 1 finds nothing. Among
//!    processes whose name equals the candidate's file name, match when the
//!    command line equals the full path, or else when it contains the
//!    candidate's parent directory.
//!
//! A bare file-name match is never enough. Unrelated trackables often ship the
//! same generic executable name (shared engines), and attributing time on name
//! alone credits the wrong entry.
//!
//! This is a heuristic. Under basic enumeration (names only, no command lines)
//! the directory check cannot run and a running candidate may go undetected.
//! That false negative is accepted rather than papered over with name-only
//! matching.

use serde::Serialize;

use crate::types::{ProcessInfo, ProcessSnapshot, SnapshotFidelity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchTier {
    Exact,
    Corroborated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchEvidence {
    pub pid: u32,
    pub tier: MatchTier,
}

/// Normalized form of a candidate's executable path, computed once per entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchTarget {
    path: String,
    executable_name: String,
    parent_dir: Option<String>,
}

impl MatchTarget {
    pub fn new(executable_path: &str) -> Self {
        let path = normalize_path(executable_path);
        let executable_name = path.rsplit('/').next().unwrap_or_default().to_string();
        let parent_dir = path
            .rsplit_once('/')
            .map(|(dir, _)| dir)
            .filter(|dir| !dir.is_empty())
            .map(str::to_string);
        Self {
            path,
            executable_name,
            parent_dir,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Case-normalized basename of the executable.
    pub fn executable_name(&self) -> &str {
        &self.executable_name
    }

    pub fn parent_dir(&self) -> Option<&str> {
        self.parent_dir.as_deref()
    }

    fn has_directory(&self) -> bool {
        self.path.contains('/')
    }
}

/// Normalize a path or command line for comparison.
///
/// Backslashes become `/`, separator runs collapse, case is folded, and
/// surrounding whitespace, quotes and trailing separators are stripped.
pub fn normalize_path(raw: &str) -> String {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();

    let mut normalized = String::with_capacity(trimmed.len());
    let mut previous_was_separator = false;
    for ch in trimmed.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if previous_was_separator {
                continue;
            }
            previous_was_separator = true;
        } else {
            previous_was_separator = false;
        }
        normalized.extend(ch.to_lowercase());
    }

    while normalized.len() > 1 && normalized.ends_with('/') {
        normalized.pop();
    }
    normalized
}

#[derive(Debug, Clone)]
struct IndexedProcess {
    pid: u32,
    name: String,
    command_line: Option<String>,
}

/// A snapshot normalized once so every candidate in a tick reuses the work.
#[derive(Debug, Clone)]
pub struct SnapshotIndex {
    fidelity: SnapshotFidelity,
    processes: Vec<IndexedProcess>,
}

impl SnapshotIndex {
    pub fn new(snapshot: &ProcessSnapshot) -> Self {
        Self::from_processes(snapshot.fidelity, &snapshot.processes)
    }

    pub fn from_processes(fidelity: SnapshotFidelity, processes: &[ProcessInfo]) -> Self {
        let processes = processes
            .iter()
            .map(|process| IndexedProcess {
                pid: process.pid,
                name: process.name.trim().to_lowercase(),
                command_line: process
                    .command_line
                    .as_deref()
                    .map(normalize_path)
                    .filter(|value| !value.is_empty()),
            })
            .collect();
        Self {
            fidelity,
            processes,
        }
    }

    pub fn fidelity(&self) -> SnapshotFidelity {
        self.fidelity
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Runs the tiered match for one candidate. A target without a directory
    /// component is a bare name and never matches.
    pub fn find(&self, target: &MatchTarget) -> Option<MatchEvidence> {
        if !target.has_directory() {
            return None;
        }
        self.find_exact(target)
            .or_else(|| self.find_corroborated(target))
    }

    fn find_exact(&self, target: &MatchTarget) -> Option<MatchEvidence> {
        self.processes
            .iter()
            .find(|process| {
                process
                    .command_line
                    .as_deref()
                    .is_some_and(|cmd| cmd.contains(target.path.as_str()))
            })
            .map(|process| MatchEvidence {
                pid: process.pid,
                tier: MatchTier::Exact,
            })
    }

    fn find_corroborated(&self, target: &MatchTarget) -> Option<MatchEvidence> {
        if target.executable_name.is_empty() {
            return None;
        }
        let same_name: Vec<&IndexedProcess> = self
            .processes
            .iter()
            .filter(|process| process.name == target.executable_name)
            .collect();

        let full_path = same_name.iter().find(|process| {
            process.command_line.as_deref() == Some(target.path.as_str())
        });
        if let Some(process) = full_path {
            return Some(MatchEvidence {
                pid: process.pid,
                tier: MatchTier::Corroborated,
            });
        }

        let dir = target.parent_dir.as_deref()?;
        same_name
            .iter()
            .find(|process| {
                process
                    .command_line
                    .as_deref()
                    .is_some_and(|cmd| contains_dir(cmd, dir))
            })
            .map(|process| MatchEvidence {
                pid: process.pid,
                tier: MatchTier::Corroborated,
            })
    }
}

/// Matches one candidate against a raw process list.
pub fn find_match(target: &MatchTarget, processes: &[ProcessInfo]) -> Option<MatchEvidence> {
    SnapshotIndex::from_processes(SnapshotFidelity::Rich, processes).find(target)
}

/// True when `dir` appears in `haystack` as a whole directory, not as a prefix
/// of a longer path component (`/games/vn` must not match `/games/vn2`).
fn contains_dir(haystack: &str, dir: &str) -> bool {
    haystack.match_indices(dir).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + dir.len()..].chars().next();
        let leading_ok = match before {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, '"' | '\'' | '=' | ':'),
        };
        let trailing_ok = match after {
            None => true,
            Some(c) => c.is_whitespace() || matches!(c, '/' | '"' | '\''),
        };
        leading_ok && trailing_ok
    })
}
