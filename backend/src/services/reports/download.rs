//! `GET /api/reports/{report_id}/download`
//!
//! Only successful reports have an artifact. Pending and failed runs answer
//! 404 with the report's status in the message.

use crate::error::ArchiveError;
use crate::services::response;
use crate::state::AppState;
use actix_files::NamedFile;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpRequest, HttpResponse};
use log::warn;

pub(crate) async fn process(
    req: HttpRequest,
    state: web::Data<AppState>,
    report_id: web::Path<String>,
) -> HttpResponse {
    let report = match state.archive.metadata(&report_id) {
        Ok(report) => report,
        Err(ArchiveError::NotFound(_)) => return response::not_found(format!("Report '{}' not found", report_id)),
        Err(e) => return response::unavailable(format!("Error loading report: {}", e)),
    };
    if !report.status.is_success() {
        return response::not_found(format!(
            "Report '{}' has no artifact (status: {})",
            report.id,
            report.status.as_str()
        ));
    }
    let Some(path) = state.archive.artifact_path(&report) else {
        return response::not_found(format!("Report '{}' has no artifact", report.id));
    };

    match NamedFile::open_async(&path).await {
        Ok(file) => file
            .set_content_disposition(ContentDisposition {
                disposition: DispositionType::Attachment,
                parameters: vec![DispositionParam::Filename(format!("{}.pdf", report.id))],
            })
            .into_response(&req),
        Err(e) => {
            warn!("artifact of report {} is unreadable at {}: {}", report.id, path.display(), e);
            response::not_found(format!("Artifact of report '{}' is missing", report.id))
        }
    }
}
