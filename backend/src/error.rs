//! Error kinds of the report pipeline.
//!
//! Each stage has its own error type; `RunError` is what a run terminates
//! with and is recorded verbatim on the failed report.

use common::model::source::SourceOutcome;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Failure fetching one source. Absorbed into partial-mode metadata when the
/// source only feeds optional sections.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("invalid source configuration: {0}")]
    Config(String),
    #[error("missing credential '{0}'")]
    MissingCredential(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("malformed data: {0}")]
    Malformed(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("fetch cancelled")]
    Cancelled,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<reqwest::Error> for ConnectorError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                ConnectorError::Auth(e.to_string())
            }
            _ if e.is_decode() => ConnectorError::Malformed(e.to_string()),
            _ => ConnectorError::Network(e.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("required slice '{slice}' lost source '{source_id}': {cause}")]
    RequiredSource {
        slice: String,
        source_id: String,
        cause: String,
        /// Every source outcome of the run, the failing one included.
        outcomes: Vec<SourceOutcome>,
    },
    #[error("slice '{slice}' references unknown source '{source_id}'")]
    UnknownSource { slice: String, source_id: String },
    #[error("aggregation exceeded the run deadline of {0:?}")]
    DeadlineExceeded(Duration),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("malformed template: {0}")]
    MalformedTemplate(String),
    #[error("font family '{family}' not found in {dir}: {cause}")]
    FontMissing {
        dir: String,
        family: String,
        cause: String,
    },
    #[error("asset error: {0}")]
    Asset(String),
    #[error("pdf rendering failed: {0}")]
    Pdf(String),
}

impl From<genpdf::error::Error> for RenderError {
    fn from(e: genpdf::error::Error) -> Self {
        RenderError::Pdf(e.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn is_transient(&self) -> bool {
        matches!(self, DeliveryError::Transient(_))
    }

    /// The provider's message without the classification prefix.
    pub fn detail(&self) -> &str {
        match self {
            DeliveryError::Transient(m) | DeliveryError::Permanent(m) => m,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("schedule '{schedule_id}' already has a run in progress")]
pub struct ScheduleConflictError {
    pub schedule_id: String,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("report '{0}' not found")]
    NotFound(String),
    #[error("report '{0}' is already terminal")]
    AlreadyTerminal(String),
    #[error("report '{0}' cannot be finalized as pending")]
    NotTerminal(String),
    #[error("report '{0}' already exists")]
    AlreadyExists(String),
    #[error("slot already claimed for schedule '{0}'")]
    SlotTaken(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields, got {0}")]
    FieldCount(usize),
    #[error("invalid {field} field '{value}'")]
    InvalidField { field: &'static str, value: String },
}

/// Why a run ended in `failed`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("template '{0}' not found")]
    TemplateNotFound(String),
    #[error(transparent)]
    Aggregation(#[from] AggregationError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Conflict(#[from] ScheduleConflictError),
    #[error("run exceeded its deadline of {0:?} while {1}")]
    Timeout(Duration, &'static str),
    #[error("worker failure: {0}")]
    Worker(String),
}
