//! `POST /api/reports/{report_id}/resend`
//!
//! Emails an already finished successful report to the given recipients, or
//! to the configured defaults. The report's status is left untouched; the
//! attempt is appended to its delivery log.

use crate::error::{ArchiveError, RunError};
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use common::requests::ResendRequest;

pub(crate) async fn process(
    state: web::Data<AppState>,
    report_id: web::Path<String>,
    payload: web::Json<ResendRequest>,
) -> HttpResponse {
    let recipients = payload
        .into_inner()
        .recipients
        .unwrap_or_else(|| state.config.run.default_recipients.clone());
    if recipients.is_empty() {
        return response::bad_request("No recipients given and none configured");
    }

    match state.archive.metadata(&report_id) {
        Ok(report) if !report.status.is_success() => {
            return response::bad_request(format!(
                "Report '{}' cannot be sent (status: {})",
                report.id,
                report.status.as_str()
            ));
        }
        Ok(_) => {}
        Err(ArchiveError::NotFound(_)) => return response::not_found(format!("Report '{}' not found", report_id)),
        Err(e) => return response::unavailable(format!("Error loading report: {}", e)),
    }

    match state.runner.resend(&report_id, &recipients).await {
        Ok(report) => response::ok("Delivery attempted", report),
        Err(RunError::Archive(ArchiveError::NotFound(_))) => {
            response::not_found(format!("Report '{}' not found", report_id))
        }
        Err(e) => response::unavailable(format!("Error sending report: {}", e)),
    }
}
