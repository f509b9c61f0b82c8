//! # Source Health Check
//!
//! Backs `GET /api/sources/{source_id}/health`.
//!
//! ## Workflow
//!
//! 1.  **Lookup**: The source is loaded from the store; an unknown id answers `404`.
//!
//! 2.  **Check**: The connector for the source's kind validates its configuration
//!     and then contacts the source, bounded by the per-source fetch timeout.
//!
//! 3.  **HTTP Response**: Reachable or not, the answer is `200 OK` with a
//!     `healthy` flag; an unreachable source also carries the connector error.

use crate::error::ConnectorError;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use common::model::source::Source;
use serde_json::json;

pub(crate) async fn process(state: web::Data<AppState>, source_id: web::Path<String>) -> impl Responder {
    let source = match state.sources.get(&source_id) {
        Ok(Some(source)) => source,
        Ok(None) => return response::not_found("Source not found"),
        Err(e) => return response::unavailable(format!("Error loading source: {}", e)),
    };

    match check_reachable(&state, &source).await {
        Ok(()) => response::ok("Source reachable", json!({ "source_id": source.id, "healthy": true })),
        Err(e) => response::ok(
            format!("Source unreachable: {}", e),
            json!({ "source_id": source.id, "healthy": false, "error": e.to_string() }),
        ),
    }
}

async fn check_reachable(state: &AppState, source: &Source) -> Result<(), ConnectorError> {
    let timeout = state.config.run.source_timeout;
    let connector = state.registry.connector(source)?;
    connector.validate_config()?;
    tokio::time::timeout(timeout, connector.health_check())
        .await
        .map_err(|_| ConnectorError::Timeout(timeout))?
}
