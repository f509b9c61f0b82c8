//! `GET /api/reports/{report_id}/progress`
//!
//! Runs started by this process are tracked in `JobsState` with their current
//! stage and percentage. Anything else is answered from the archive, mapping
//! the report status onto the same `JobStatus` shape.

use crate::error::ArchiveError;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use common::jobs::JobStatus;
use common::model::report::ReportStatus;

pub(crate) async fn process(state: web::Data<AppState>, report_id: web::Path<String>) -> impl Responder {
    if let Some(status) = state.jobs.get(&report_id).await {
        return response::ok("Report progress", status);
    }
    // Runs of an earlier process are only known to the archive.
    match state.archive.metadata(&report_id) {
        Ok(report) => {
            let status = match report.status {
                ReportStatus::Pending => JobStatus::Pending,
                ReportStatus::Failed => JobStatus::Failed(report.error.unwrap_or_default()),
                other => JobStatus::Completed(other.as_str().to_string()),
            };
            response::ok("Report progress", status)
        }
        Err(ArchiveError::NotFound(_)) => response::not_found(format!("Report '{}' not found", report_id)),
        Err(e) => response::unavailable(format!("Error loading report: {}", e)),
    }
}
