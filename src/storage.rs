use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{MotionError, MotionResult};

pub const DEFAULT_LOG_PATH: &str = "motion_log.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    MotionDetected,
    SourceLost,
    SourceRestored,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MotionDetected => "MotionDetected",
            EventKind::SourceLost => "SourceLost",
            EventKind::SourceRestored => "SourceRestored",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable event record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

impl LogRecord {
    pub fn new(timestamp: DateTime<Utc>, kind: EventKind, detail: impl Into<String>) -> Self {
        Self {
            timestamp,
            kind,
            detail: detail.into(),
        }
    }
}

/// Append-only event log. One record per event.
pub trait EventLog: Send {
    fn append_event(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: EventKind,
        detail: &str,
    ) -> MotionResult<()>;

    fn flush(&mut self) -> MotionResult<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLogBackend {
    #[default]
    File,
    Sqlite,
}

pub fn open_event_log(backend: EventLogBackend, path: &Path) -> MotionResult<Box<dyn EventLog>> {
    match backend {
        EventLogBackend::File => Ok(Box::new(FileEventLog::open(path)?)),
        EventLogBackend::Sqlite => Ok(Box::new(SqliteEventLog::open(path)?)),
    }
}

// ----------------------------------------------------------------------------
// Text file log
// ----------------------------------------------------------------------------

/// Line-oriented log: `<rfc3339> <Kind> <detail>`.
pub struct FileEventLog {
    path: PathBuf,
    file: File,
}

impl FileEventLog {
    pub fn open(path: &Path) -> MotionResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| {
                MotionError::log_io(format!("failed to open {}: {}", path.display(), e))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventLog for FileEventLog {
    fn append_event(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: EventKind,
        detail: &str,
    ) -> MotionResult<()> {
        let line = format_line(timestamp, kind, detail);
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.flush())
            .map_err(|e| {
                MotionError::log_io(format!("failed to append to {}: {}", self.path.display(), e))
            })
    }

    fn flush(&mut self) -> MotionResult<()> {
        self.file.sync_data().map_err(|e| {
            MotionError::log_io(format!("failed to sync {}: {}", self.path.display(), e))
        })
    }
}

fn format_line(timestamp: DateTime<Utc>, kind: EventKind, detail: &str) -> String {
    let detail = detail.replace(['\n', '\r'], " ");
    format!(
        "{} {} {}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        kind,
        detail
    )
}

// ----------------------------------------------------------------------------
// SQLite log
// ----------------------------------------------------------------------------

pub struct SqliteEventLog {
    conn: Connection,
}

impl SqliteEventLog {
    pub fn open(path: &Path) -> MotionResult<Self> {
        let conn = Connection::open(path).map_err(|e| {
            MotionError::log_io(format!("failed to open {}: {}", path.display(), e))
        })?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> MotionResult<()> {
        self.conn
            .execute_batch(
                r#"
                PRAGMA journal_mode=WAL;

                CREATE TABLE IF NOT EXISTS motion_events (
                  id INTEGER PRIMARY KEY AUTOINCREMENT,
                  recorded_at TEXT NOT NULL,
                  kind TEXT NOT NULL,
                  detail TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_motion_events_recorded ON motion_events(recorded_at);
                "#,
            )
            .map_err(|e| MotionError::log_io(format!("failed to create schema: {}", e)))
    }

    pub fn read_recent(&self, limit: usize) -> MotionResult<Vec<LogRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT recorded_at, kind, detail FROM motion_events ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| MotionError::log_io(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| MotionError::log_io(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (recorded_at, kind, detail) = row.map_err(|e| MotionError::log_io(e.to_string()))?;
            let timestamp = DateTime::parse_from_rfc3339(&recorded_at)
                .map_err(|e| MotionError::log_io(format!("corrupt timestamp: {}", e)))?
                .with_timezone(&Utc);
            let kind = parse_kind(&kind)?;
            out.push(LogRecord::new(timestamp, kind, detail));
        }
        out.reverse();
        Ok(out)
    }
}

impl EventLog for SqliteEventLog {
    fn append_event(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: EventKind,
        detail: &str,
    ) -> MotionResult<()> {
        self.conn
            .execute(
                "INSERT INTO motion_events(recorded_at, kind, detail) VALUES (?1, ?2, ?3)",
                params![
                    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
                    kind.as_str(),
                    detail
                ],
            )
            .map_err(|e| MotionError::log_io(format!("insert failed: {}", e)))?;
        Ok(())
    }
}

fn parse_kind(value: &str) -> MotionResult<EventKind> {
    match value {
        "MotionDetected" => Ok(EventKind::MotionDetected),
        "SourceLost" => Ok(EventKind::SourceLost),
        "SourceRestored" => Ok(EventKind::SourceRestored),
        other => Err(MotionError::log_io(format!("unknown event kind {}", other))),
    }
}

// ----------------------------------------------------------------------------
// In-memory log
// ----------------------------------------------------------------------------

/// Test log. Clones share the same record list.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    records: Arc<Mutex<Vec<LogRecord>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl EventLog for InMemoryEventLog {
    fn append_event(
        &mut self,
        timestamp: DateTime<Utc>,
        kind: EventKind,
        detail: &str,
    ) -> MotionResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LogRecord::new(timestamp, kind, detail));
        Ok(())
    }
}
