//! Report archive: run metadata in SQLite, artifacts as files in the archive
//! directory.
//!
//! A report enters as `pending` through [`ReportArchive::begin`] (or through
//! the scheduler's claim transaction) and leaves through exactly one
//! [`ReportArchive::finalize`]. The finalize UPDATE is guarded on
//! `status = 'pending'`, so a terminal report can never be rewritten.
//! Artifacts are written to a temp file in the same directory and renamed,
//! so a reader never sees a half-written PDF. Searches only see committed
//! (finalized) reports.

use crate::db::{from_json, parse_opt_ts, parse_ts, ts, Db};
use crate::error::ArchiveError;
use chrono::Utc;
use common::model::dataset::Dataset;
use common::model::report::{DeliveryOutcome, DeliveryStatus, Report, ReportStatus};
use common::model::source::SourceOutcome;
pub use common::requests::ReportFilter;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};

const REPORT_COLUMNS: &str = "id, title, template_id, schedule_id, slot, generated_at, completed_at, status, \
     artifact_path, partial_sources, source_outcomes, error, rows_processed";
const PAGE_SIZE: usize = 50;

/// Terminal metadata written by `finalize`.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub status: ReportStatus,
    pub artifact_path: Option<String>,
    pub partial_sources: Vec<String>,
    pub source_outcomes: Vec<SourceOutcome>,
    pub error: Option<String>,
    pub rows_processed: usize,
}

impl Completion {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ReportStatus::Failed,
            artifact_path: None,
            partial_sources: Vec::new(),
            source_outcomes: Vec::new(),
            error: Some(error.into()),
            rows_processed: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReportArchive {
    db: Db,
    dir: PathBuf,
}

fn status_of(idx: usize, raw: &str) -> rusqlite::Result<ReportStatus> {
    ReportStatus::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown report status '{}'", raw).into(),
        )
    })
}

fn map_report(row: &Row<'_>) -> rusqlite::Result<Report> {
    let slot: Option<String> = row.get(4)?;
    let generated_at: String = row.get(5)?;
    let status: String = row.get(7)?;
    let partial: String = row.get(9)?;
    let outcomes: String = row.get(10)?;
    let rows: i64 = row.get(12)?;
    Ok(Report {
        id: row.get(0)?,
        title: row.get(1)?,
        template_id: row.get(2)?,
        schedule_id: row.get(3)?,
        slot: parse_opt_ts(slot)?,
        generated_at: parse_ts(&generated_at)?,
        completed_at: parse_opt_ts(row.get(6)?)?,
        status: status_of(7, &status)?,
        artifact_path: row.get(8)?,
        partial_sources: from_json(9, &partial)?,
        source_outcomes: from_json(10, &outcomes)?,
        deliveries: Vec::new(),
        error: row.get(11)?,
        rows_processed: rows.max(0) as usize,
    })
}

fn load_deliveries(conn: &Connection, report_id: &str) -> rusqlite::Result<Vec<DeliveryOutcome>> {
    let mut stmt = conn.prepare(
        "SELECT recipients, status, attempts, message_id, error, at FROM deliveries
         WHERE report_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![report_id], |row| {
        let recipients: String = row.get(0)?;
        let status: String = row.get(1)?;
        let at: String = row.get(5)?;
        Ok(DeliveryOutcome {
            recipients: from_json(0, &recipients)?,
            status: if status == "delivered" {
                DeliveryStatus::Delivered
            } else {
                DeliveryStatus::Failed
            },
            attempts: row.get(2)?,
            message_id: row.get(3)?,
            error: row.get(4)?,
            at: parse_ts(&at)?,
        })
    })?;
    rows.collect()
}

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

/// Inserts a report row as-is. Shared by `begin` and the scheduler's claim
/// transaction; a duplicate `(schedule_id, slot)` surfaces as a constraint
/// violation.
pub(crate) fn insert_report(conn: &Connection, report: &Report, committed: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO reports (id, title, template_id, schedule_id, slot, generated_at, completed_at, status,
             artifact_path, partial_sources, source_outcomes, error, rows_processed, committed)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            report.id,
            report.title,
            report.template_id,
            report.schedule_id,
            report.slot.as_ref().map(ts),
            ts(&report.generated_at),
            report.completed_at.as_ref().map(ts),
            report.status.as_str(),
            report.artifact_path,
            to_json(&report.partial_sources)?,
            to_json(&report.source_outcomes)?,
            report.error,
            report.rows_processed as i64,
            committed,
        ],
    )?;
    Ok(())
}

fn insert_delivery(conn: &Connection, id: &str, outcome: &DeliveryOutcome) -> rusqlite::Result<()> {
    let status = match outcome.status {
        DeliveryStatus::Delivered => "delivered",
        DeliveryStatus::Failed => "failed",
    };
    conn.execute(
        "INSERT INTO deliveries (report_id, recipients, status, attempts, message_id, error, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            to_json(&outcome.recipients)?,
            status,
            outcome.attempts,
            outcome.message_id,
            outcome.error,
            ts(&outcome.at),
        ],
    )?;
    Ok(())
}

pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation)
}

impl ReportArchive {
    /// Opens the archive, creating the artifact directory if needed.
    pub fn new(db: Db, dir: impl Into<PathBuf>) -> Result<Self, ArchiveError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { db, dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Records a new run in `pending` state.
    pub fn begin(&self, report: &Report) -> Result<(), ArchiveError> {
        if report.status != ReportStatus::Pending {
            return Err(ArchiveError::AlreadyTerminal(report.id.clone()));
        }
        let conn = self.db.connect()?;
        insert_report(&conn, report, false).map_err(|e| self.insert_error(&conn, report, e))
    }

    fn artifact_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.pdf", id))
    }

    fn write_atomically(&self, target: &Path, bytes: &[u8]) -> Result<(), ArchiveError> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target).map_err(|e| ArchiveError::Io(e.error))?;
        Ok(())
    }

    /// Writes the artifact of a pending run and returns the file name to
    /// record at finalize time.
    pub fn store_artifact(&self, id: &str, bytes: &[u8]) -> Result<String, ArchiveError> {
        let target = self.artifact_file(id);
        self.write_atomically(&target, bytes)?;
        Ok(format!("{}.pdf", id))
    }

    /// Removes the artifact of a run that will not succeed. Missing files are fine.
    pub fn discard_artifact(&self, id: &str) -> Result<(), ArchiveError> {
        match std::fs::remove_file(self.artifact_file(id)) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(ArchiveError::Io(e)),
            _ => Ok(()),
        }
    }

    /// Keeps the merged dataset next to the artifact for later inspection.
    pub fn retain_dataset(&self, id: &str, dataset: &Dataset) -> Result<(), ArchiveError> {
        let raw = serde_json::to_vec_pretty(dataset)?;
        self.write_atomically(&self.dir.join(format!("{}.dataset.json", id)), &raw)
    }

    /// Moves a pending report to its terminal state. This is the only
    /// transition out of `pending` and it happens once.
    pub fn finalize(&self, id: &str, completion: &Completion) -> Result<Report, ArchiveError> {
        if !completion.status.is_terminal() {
            return Err(ArchiveError::NotTerminal(id.to_string()));
        }
        let conn = self.db.connect()?;
        let changed = conn.execute(
            "UPDATE reports SET status = ?1, completed_at = ?2, artifact_path = ?3, partial_sources = ?4,
                 source_outcomes = ?5, error = ?6, rows_processed = ?7, committed = 1
             WHERE id = ?8 AND status = 'pending'",
            params![
                completion.status.as_str(),
                ts(&Utc::now()),
                completion.artifact_path,
                to_json(&completion.partial_sources)?,
                to_json(&completion.source_outcomes)?,
                completion.error,
                completion.rows_processed as i64,
                id,
            ],
        )?;
        if changed == 0 {
            return match self.find(&conn, id)? {
                Some(_) => Err(ArchiveError::AlreadyTerminal(id.to_string())),
                None => Err(ArchiveError::NotFound(id.to_string())),
            };
        }
        self.metadata(id)
    }

    /// One-shot insert of an already terminal report with its artifact.
    ///
    /// The artifact is staged under a temporary name and only moved to
    /// `<id>.pdf` while the row insert is still uncommitted, so a rejected
    /// call never touches the file of an existing report.
    pub fn save(&self, report: &Report, artifact: Option<&[u8]>) -> Result<String, ArchiveError> {
        if !report.status.is_terminal() {
            return Err(ArchiveError::NotTerminal(report.id.clone()));
        }
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        if self.find(&tx, &report.id)?.is_some() {
            return Err(ArchiveError::AlreadyExists(report.id.clone()));
        }

        let staged = match artifact {
            Some(bytes) => {
                let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
                tmp.write_all(bytes)?;
                tmp.as_file().sync_all()?;
                Some(tmp)
            }
            None => None,
        };
        let mut stored = report.clone();
        stored.artifact_path = staged.as_ref().map(|_| format!("{}.pdf", report.id));
        if stored.completed_at.is_none() {
            stored.completed_at = Some(Utc::now());
        }
        insert_report(&tx, &stored, true).map_err(|e| self.insert_error(&tx, report, e))?;
        for delivery in &report.deliveries {
            insert_delivery(&tx, &report.id, delivery)?;
        }

        if let Some(tmp) = staged {
            tmp.persist(self.artifact_file(&report.id))
                .map_err(|e| ArchiveError::Io(e.error))?;
        }
        if let Err(e) = tx.commit() {
            // The id was free under the write lock, so the file is ours.
            self.discard_artifact(&report.id)?;
            return Err(e.into());
        }
        Ok(stored.id)
    }

    /// Tells an id clash from a `(schedule_id, slot)` clash.
    fn insert_error(&self, conn: &Connection, report: &Report, e: rusqlite::Error) -> ArchiveError {
        if !is_constraint_violation(&e) {
            return ArchiveError::Database(e);
        }
        match self.find(conn, &report.id) {
            Ok(Some(_)) => ArchiveError::AlreadyExists(report.id.clone()),
            Ok(None) => ArchiveError::SlotTaken(report.schedule_id.clone().unwrap_or_default()),
            Err(lookup) => ArchiveError::Database(lookup),
        }
    }

    fn find(&self, conn: &Connection, id: &str) -> rusqlite::Result<Option<Report>> {
        let sql = format!("SELECT {} FROM reports WHERE id = ?1", REPORT_COLUMNS);
        let report = conn.query_row(&sql, params![id], map_report).optional()?;
        match report {
            Some(mut report) => {
                report.deliveries = load_deliveries(conn, id)?;
                Ok(Some(report))
            }
            None => Ok(None),
        }
    }

    /// Metadata only, pending or terminal.
    pub fn metadata(&self, id: &str) -> Result<Report, ArchiveError> {
        let conn = self.db.connect()?;
        self.find(&conn, id)?
            .ok_or_else(|| ArchiveError::NotFound(id.to_string()))
    }

    /// Location of a report's artifact, when it has one.
    pub fn artifact_path(&self, report: &Report) -> Option<PathBuf> {
        report.artifact_path.as_ref().map(|name| self.dir.join(name))
    }

    /// Metadata plus the artifact bytes of a successful report.
    pub fn get(&self, id: &str) -> Result<(Report, Option<Vec<u8>>), ArchiveError> {
        let report = self.metadata(id)?;
        let artifact = match self.artifact_path(&report) {
            Some(path) if report.status.is_success() => Some(std::fs::read(path)?),
            _ => None,
        };
        Ok((report, artifact))
    }

    /// Appends a delivery record. Allowed on terminal reports: deliveries
    /// are a log, not part of the report's immutable metadata.
    pub fn record_delivery(&self, id: &str, outcome: &DeliveryOutcome) -> Result<(), ArchiveError> {
        let conn = self.db.connect()?;
        insert_delivery(&conn, id, outcome)?;
        Ok(())
    }

    /// Runs that never reached a terminal state.
    pub fn pending_reports(&self) -> Result<Vec<Report>, ArchiveError> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {} FROM reports WHERE status = 'pending' ORDER BY generated_at, id",
            REPORT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let reports = stmt.query_map([], map_report)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(reports)
    }

    /// Lazily walks committed reports matching `filter`, newest first.
    pub fn search(&self, filter: ReportFilter) -> ReportCursor {
        ReportCursor {
            archive: self.clone(),
            remaining: filter.limit,
            filter,
            buffer: VecDeque::new(),
            after: None,
            exhausted: false,
        }
    }

    fn page(
        &self,
        filter: &ReportFilter,
        after: Option<&(String, String)>,
        size: usize,
    ) -> Result<Vec<Report>, ArchiveError> {
        let conn = self.db.connect()?;
        let sql = format!(
            "SELECT {} FROM reports
             WHERE committed = 1
               AND (?1 IS NULL OR generated_at >= ?1)
               AND (?2 IS NULL OR generated_at < ?2)
               AND (?3 IS NULL OR template_id = ?3)
               AND (?4 IS NULL OR status = ?4)
               AND (?5 IS NULL OR generated_at < ?5 OR (generated_at = ?5 AND id < ?6))
             ORDER BY generated_at DESC, id DESC
             LIMIT ?7",
            REPORT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.from.as_ref().map(ts),
                filter.to.as_ref().map(ts),
                filter.template_id,
                filter.status.map(|s| s.as_str()),
                after.map(|(at, _)| at.as_str()),
                after.map(|(_, id)| id.as_str()),
                size as i64,
            ],
            map_report,
        )?;
        let mut reports = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        for report in &mut reports {
            report.deliveries = load_deliveries(&conn, &report.id)?;
        }
        Ok(reports)
    }
}

/// Keyset-paginated iterator over search results. Each page is fetched on
/// demand with its own connection, so holding a cursor holds no lock.
pub struct ReportCursor {
    archive: ReportArchive,
    filter: ReportFilter,
    remaining: Option<usize>,
    buffer: VecDeque<Report>,
    after: Option<(String, String)>,
    exhausted: bool,
}

impl Iterator for ReportCursor {
    type Item = Result<Report, ArchiveError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if self.buffer.is_empty() && !self.exhausted {
            let size = self.remaining.map_or(PAGE_SIZE, |r| r.min(PAGE_SIZE));
            match self.archive.page(&self.filter, self.after.as_ref(), size) {
                Ok(page) => {
                    self.exhausted = page.len() < size;
                    if let Some(last) = page.last() {
                        self.after = Some((ts(&last.generated_at), last.id.clone()));
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        let report = self.buffer.pop_front()?;
        if let Some(r) = self.remaining.as_mut() {
            *r -= 1;
        }
        Some(Ok(report))
    }
}
