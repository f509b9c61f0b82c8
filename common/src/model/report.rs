use crate::model::source::SourceOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a report run.
///
/// `Pending` is the only non-terminal state. A run moves from `Pending` to
/// exactly one terminal status and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportStatus {
    Pending,
    Success,
    /// Completed with one or more optional sections missing.
    SuccessPartial,
    /// Rendered and archived, but delivery failed.
    SuccessUndelivered,
    Failed,
}

impl ReportStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ReportStatus::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReportStatus::Success | ReportStatus::SuccessPartial | ReportStatus::SuccessUndelivered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Success => "success",
            ReportStatus::SuccessPartial => "success-partial",
            ReportStatus::SuccessUndelivered => "success-undelivered",
            ReportStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ReportStatus::Pending),
            "success" => Some(ReportStatus::Success),
            "success-partial" => Some(ReportStatus::SuccessPartial),
            "success-undelivered" => Some(ReportStatus::SuccessUndelivered),
            "failed" => Some(ReportStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
}

/// One dispatch attempt series for a report, as recorded in the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub recipients: Vec<String>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub message_id: Option<String>,
    /// Provider or validation error, verbatim.
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub title: String,
    pub template_id: String,
    pub schedule_id: Option<String>,
    /// Due slot this run was claimed for; `None` for manual runs.
    pub slot: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ReportStatus,
    pub artifact_path: Option<String>,
    pub partial_sources: Vec<String>,
    pub source_outcomes: Vec<SourceOutcome>,
    pub deliveries: Vec<DeliveryOutcome>,
    pub error: Option<String>,
    pub rows_processed: usize,
}

impl Report {
    /// A fresh run record in `Pending` state.
    pub fn pending(id: String, title: String, template_id: String, generated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            template_id,
            schedule_id: None,
            slot: None,
            generated_at,
            completed_at: None,
            status: ReportStatus::Pending,
            artifact_path: None,
            partial_sources: Vec::new(),
            source_outcomes: Vec::new(),
            deliveries: Vec::new(),
            error: None,
            rows_processed: 0,
        }
    }
}
