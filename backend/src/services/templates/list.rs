//! `GET /api/templates`

use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};

/// Lists every stored template, ordered by id.
pub(crate) async fn process(state: web::Data<AppState>) -> impl Responder {
    match state.templates.list() {
        Ok(templates) => response::ok(format!("Found {} templates", templates.len()), templates),
        Err(e) => response::unavailable(format!("Error listing templates: {}", e)),
    }
}
