//! `GET /api/sources`: every source with the record of its last fetch.

use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};

pub(crate) async fn process(state: web::Data<AppState>) -> impl Responder {
    match state.sources.list() {
        Ok(sources) => response::ok(format!("Found {} data sources", sources.len()), sources),
        Err(e) => response::unavailable(format!("Error listing sources: {}", e)),
    }
}
