//! `GET /api/reports`: searches the archive.
//!
//! Query parameters narrow the search by generation time (`from`, `to`),
//! template and status. Without a `limit`, a page of `DEFAULT_LIST_LIMIT`
//! reports is returned. The search runs on the blocking pool.

use super::DEFAULT_LIST_LIMIT;
use crate::services::archive::ReportFilter;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use common::model::report::Report;

/// # Arguments
/// * `state` - Shared application state holding the report archive.
/// * `query` - The search filter, decoded from the query string.
///
/// # Returns
/// - `200 OK` with the matching reports, newest first.
/// - `503 Service Unavailable` if the archive cannot be searched.
pub(crate) async fn process(state: web::Data<AppState>, query: web::Query<ReportFilter>) -> impl Responder {
    let mut filter = query.into_inner();
    filter.limit = Some(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));

    let archive = state.archive.clone();
    let result = web::block(move || archive.search(filter).collect::<Result<Vec<Report>, _>>()).await;
    match result {
        Ok(Ok(reports)) => response::ok(format!("Found {} reports", reports.len()), reports),
        Ok(Err(e)) => response::unavailable(format!("Error searching reports: {}", e)),
        Err(e) => response::unavailable(format!("Error searching reports: {}", e)),
    }
}
