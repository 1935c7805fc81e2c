//! SQLite persistence for playtime-daemon.
//!
//! One store serves both collaborator seams of the tracker: the catalog of
//! trackable executables and the session log. Each session append and its
//! aggregate update commit together or not at all.

use chrono::{DateTime, SecondsFormat, Utc};
use playtime_core::{CatalogProvider, SessionRecord, SessionRecorder, Trackable};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub struct Db {
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredSession {
    pub id: i64,
    pub trackable_id: String,
    pub title: Option<String>,
    pub duration_seconds: u64,
    pub ended_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackableTotal {
    pub id: String,
    pub title: String,
    pub executable_path: String,
    pub total_seconds: u64,
    pub session_count: u64,
    pub last_active_at: Option<String>,
}

impl Db {
    pub fn new(path: PathBuf) -> Result<Self, String> {
        let db = Self { path };
        db.init_schema()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mirrors configured trackables into the catalog table. New ids are
    /// inserted, known ids get their title and path refreshed, aggregates are
    /// left untouched. Rows absent from `trackables` are kept with their
    /// history.
    pub fn sync_catalog(&self, trackables: &[Trackable]) -> Result<(), String> {
        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;
            for trackable in trackables {
                tx.execute(
                    "INSERT INTO trackables (id, title, executable_path) \
                     VALUES (?1, ?2, ?3) \
                     ON CONFLICT(id) DO UPDATE SET \
                        title = excluded.title, \
                        executable_path = excluded.executable_path",
                    params![trackable.id, trackable.title, trackable.executable_path],
                )
                .map_err(|err| format!("Failed to upsert trackable {}: {}", trackable.id, err))?;
            }
            tx.commit()
                .map_err(|err| format!("Failed to commit catalog sync: {}", err))
        })
    }

    pub fn list_sessions(&self, limit: usize) -> Result<Vec<StoredSession>, String> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.trackable_id, t.title, s.duration_seconds, s.ended_at \
                     FROM sessions s LEFT JOIN trackables t ON t.id = s.trackable_id \
                     ORDER BY s.ended_at DESC, s.id DESC \
                     LIMIT ?1",
                )
                .map_err(|err| format!("Failed to prepare sessions query: {}", err))?;

            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(StoredSession {
                        id: row.get(0)?,
                        trackable_id: row.get(1)?,
                        title: row.get(2)?,
                        duration_seconds: non_negative(row.get(3)?),
                        ended_at: row.get(4)?,
                    })
                })
                .map_err(|err| format!("Failed to read session rows: {}", err))?;

            let mut sessions = Vec::new();
            for row in rows {
                sessions.push(row.map_err(|err| format!("Failed to decode session row: {}", err))?);
            }
            Ok(sessions)
        })
    }

    pub fn totals(&self) -> Result<Vec<TrackableTotal>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT t.id, t.title, t.executable_path, t.total_seconds, \
                            (SELECT COUNT(*) FROM sessions s WHERE s.trackable_id = t.id), \
                            t.last_active_at \
                     FROM trackables t \
                     ORDER BY t.total_seconds DESC, t.id ASC",
                )
                .map_err(|err| format!("Failed to prepare totals query: {}", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(TrackableTotal {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        executable_path: row.get(2)?,
                        total_seconds: non_negative(row.get(3)?),
                        session_count: non_negative(row.get(4)?),
                        last_active_at: row.get(5)?,
                    })
                })
                .map_err(|err| format!("Failed to read totals rows: {}", err))?;

            let mut totals = Vec::new();
            for row in rows {
                totals.push(row.map_err(|err| format!("Failed to decode totals row: {}", err))?);
            }
            Ok(totals)
        })
    }

    fn init_schema(&self) -> Result<(), String> {
        self.with_connection(|conn| {
            conn.execute_batch(
                "BEGIN;
                 CREATE TABLE IF NOT EXISTS trackables (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    executable_path TEXT NOT NULL,
                    total_seconds INTEGER NOT NULL DEFAULT 0,
                    last_active_at TEXT
                 );
                 CREATE TABLE IF NOT EXISTS sessions (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    trackable_id TEXT NOT NULL,
                    duration_seconds INTEGER NOT NULL,
                    ended_at TEXT NOT NULL
                 );
                 CREATE INDEX IF NOT EXISTS sessions_by_trackable
                    ON sessions (trackable_id, ended_at);
                 COMMIT;",
            )
            .map_err(|err| format!("Failed to initialize schema: {}", err))
        })
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> Result<T, String>,
    ) -> Result<T, String> {
        let mut conn = self.open()?;
        op(&mut conn)
    }

    fn open(&self) -> Result<Connection, String> {
        if let Some(parent) = self.path.parent() {
            fs_err::create_dir_all(parent)
                .map_err(|err| format!("Failed to create playtime data dir: {}", err))?;
        }

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let conn = Connection::open_with_flags(&self.path, flags)
            .map_err(|err| format!("Failed to open sqlite db: {}", err))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|err| format!("Failed to enable WAL: {}", err))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(|err| format!("Failed to set synchronous: {}", err))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|err| format!("Failed to set busy_timeout: {}", err))?;

        Ok(conn)
    }
}

impl CatalogProvider for Db {
    fn list_trackables(&self) -> Result<Vec<Trackable>, String> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, title, executable_path FROM trackables ORDER BY id ASC")
                .map_err(|err| format!("Failed to prepare trackables query: {}", err))?;

            let rows = stmt
                .query_map([], |row| {
                    Ok(Trackable {
                        id: row.get(0)?,
                        title: row.get(1)?,
                        executable_path: row.get(2)?,
                    })
                })
                .map_err(|err| format!("Failed to read trackable rows: {}", err))?;

            let mut trackables = Vec::new();
            for row in rows {
                trackables
                    .push(row.map_err(|err| format!("Failed to decode trackable row: {}", err))?);
            }
            Ok(trackables)
        })
    }
}

impl SessionRecorder for Db {
    fn record(&self, record: &SessionRecord) -> Result<(), String> {
        let duration = i64::try_from(record.duration_seconds)
            .map_err(|_| format!("Session duration out of range: {}", record.duration_seconds))?;
        let ended_at = format_time(record.ended_at);

        self.with_connection(|conn| {
            let tx = conn
                .transaction()
                .map_err(|err| format!("Failed to begin transaction: {}", err))?;

            let updated = tx
                .execute(
                    "UPDATE trackables SET \
                        total_seconds = total_seconds + ?1, \
                        last_active_at = CASE \
                            WHEN last_active_at IS NULL OR last_active_at < ?2 THEN ?2 \
                            ELSE last_active_at END \
                     WHERE id = ?3",
                    params![duration, ended_at, record.entry_id],
                )
                .map_err(|err| format!("Failed to update trackable totals: {}", err))?;
            if updated == 0 {
                return Err(format!("Unknown trackable: {}", record.entry_id));
            }

            tx.execute(
                "INSERT INTO sessions (trackable_id, duration_seconds, ended_at) \
                 VALUES (?1, ?2, ?3)",
                params![record.entry_id, duration, ended_at],
            )
            .map_err(|err| format!("Failed to insert session: {}", err))?;

            tx.commit()
                .map_err(|err| format!("Failed to commit session: {}", err))
        })
    }
}

fn format_time(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn non_negative(value: i64) -> u64 {
    value.max(0) as u64
}
