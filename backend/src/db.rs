//! SQLite access shared by the stores.
//!
//! Like the rest of the service, each operation opens its own short-lived
//! connection on the database file; WAL mode and a busy timeout let the
//! scheduler, the workers and the HTTP handlers interleave safely.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sources (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL,
    config      TEXT NOT NULL,
    last_fetch  TEXT,
    csv_md5     TEXT
);
CREATE TABLE IF NOT EXISTS templates (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    body        TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS schedules (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL,
    cron          TEXT NOT NULL,
    template_id   TEXT NOT NULL,
    recipients    TEXT NOT NULL,
    enabled       INTEGER NOT NULL,
    missed_policy TEXT NOT NULL,
    last_fired    TEXT,
    created_at    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS reports (
    id              TEXT PRIMARY KEY,
    title           TEXT NOT NULL,
    template_id     TEXT NOT NULL,
    schedule_id     TEXT,
    slot            TEXT,
    generated_at    TEXT NOT NULL,
    completed_at    TEXT,
    status          TEXT NOT NULL,
    artifact_path   TEXT,
    partial_sources TEXT NOT NULL DEFAULT '[]',
    source_outcomes TEXT NOT NULL DEFAULT '[]',
    error           TEXT,
    rows_processed  INTEGER NOT NULL DEFAULT 0,
    committed       INTEGER NOT NULL DEFAULT 0,
    UNIQUE (schedule_id, slot)
);
CREATE INDEX IF NOT EXISTS reports_by_time ON reports (generated_at, id);
CREATE TABLE IF NOT EXISTS deliveries (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id   TEXT NOT NULL,
    recipients  TEXT NOT NULL,
    status      TEXT NOT NULL,
    attempts    INTEGER NOT NULL,
    message_id  TEXT,
    error       TEXT,
    at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS deliveries_by_report ON deliveries (report_id);
"#;

/// Handle on the service database file.
#[derive(Debug, Clone)]
pub struct Db {
    path: PathBuf,
}

impl Db {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens the database and creates any missing tables.
    pub fn open(path: impl Into<PathBuf>) -> rusqlite::Result<Self> {
        let db = Self::new(path);
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connect(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Ok(conn)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so that lexical order
/// matches chronological order.
pub fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

pub fn parse_opt_ts(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Maps a JSON column into its model type inside a row mapper.
pub fn from_json<T: serde::de::DeserializeOwned>(idx: usize, raw: &str) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexically() {
        let a = Utc.with_ymd_and_hms(2024, 1, 9, 7, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 10, 7, 0, 0).unwrap();
        assert!(ts(&a) < ts(&b));
        assert_eq!(parse_ts(&ts(&a)).unwrap(), a);
    }

    #[test]
    fn open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.sqlite")).unwrap();
        let conn = db.connect().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('sources', 'templates', 'schedules', 'reports', 'deliveries')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 5);
    }
}
