use crate::model::report::ReportStatus;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Names the CSV source an upload or verification applies to. Sent as the
/// JSON body of `/verify` and as the `json` part of `/upload`.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvSourceRequest {
    pub source_id: String,
}

/// Body of `POST /api/reports/generate`.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateReportRequest {
    pub title: String,
    #[serde(default = "default_template")]
    pub template_id: String,
    /// Runs under this schedule's exclusivity lock when set.
    #[serde(default)]
    pub schedule_id: Option<String>,
    /// Falls back to the configured default recipients when absent.
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
}

fn default_template() -> String {
    "weekly_summary".to_string()
}

/// Query string of `GET /api/reports`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportFilter {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub template_id: Option<String>,
    pub status: Option<ReportStatus>,
    pub limit: Option<usize>,
}

/// Body of `POST /api/reports/{id}/resend`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResendRequest {
    #[serde(default)]
    pub recipients: Option<Vec<String>>,
}
