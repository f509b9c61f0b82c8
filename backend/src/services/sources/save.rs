//! `POST /api/sources`: creates or replaces a source.
//!
//! The matching connector checks the configuration statically. The stored
//! fetch record is never taken from the payload; it only changes when a run
//! fetches the source.

use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use common::model::source::Source;
use log::info;

/// # Arguments
/// * `state` - Shared application state with the source store and connector registry.
/// * `payload` - The source definition, including its kind-specific configuration.
///
/// # Returns
/// - `200 OK` with the stored source.
/// - `400 Bad Request` for an empty id or a configuration the connector rejects.
/// - `503 Service Unavailable` if the database write fails.
pub(crate) async fn process(state: web::Data<AppState>, payload: web::Json<Source>) -> impl Responder {
    let mut source = payload.into_inner();
    source.last_fetch = None;
    if source.id.trim().is_empty() {
        return response::bad_request("Source id must not be empty");
    }

    // Static validation only; reachability is what /health is for.
    let checked = state
        .registry
        .connector(&source)
        .and_then(|connector| connector.validate_config());
    if let Err(e) = checked {
        return response::bad_request(format!("Invalid source configuration: {}", e));
    }

    match state.sources.upsert(&source) {
        Ok(()) => {
            info!("source '{}' saved ({})", source.id, source.kind().as_str());
            response::ok("Source saved", source)
        }
        Err(e) => response::unavailable(format!("Error saving source: {}", e)),
    }
}
