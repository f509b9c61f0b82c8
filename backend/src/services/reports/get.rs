//! `GET /api/reports/{report_id}`

use crate::error::ArchiveError;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};

/// Returns the report's metadata, pending reports included.
pub(crate) async fn process(state: web::Data<AppState>, report_id: web::Path<String>) -> impl Responder {
    match state.archive.metadata(&report_id) {
        Ok(report) => response::ok("Report found", report),
        Err(ArchiveError::NotFound(_)) => response::not_found(format!("Report '{}' not found", report_id)),
        Err(e) => response::unavailable(format!("Error loading report: {}", e)),
    }
}
