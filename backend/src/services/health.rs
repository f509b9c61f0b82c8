//! `GET /health`: liveness plus a database round trip.

use crate::services::response;
use crate::state::AppState;
use actix_web::web::{get, scope};
use actix_web::{web, Responder, Scope};
use serde_json::json;

pub fn configure_routes() -> Scope {
    scope("/health").route("", get().to(process))
}

async fn process(state: web::Data<AppState>) -> impl Responder {
    match state.db.connect() {
        Ok(_) => response::ok(
            "Service is healthy",
            json!({ "status": "ok", "demo_mode": state.config.demo_mode }),
        ),
        Err(e) => response::unavailable(format!("Database unavailable: {}", e)),
    }
}
