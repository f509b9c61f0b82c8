//! # Template Retrieval Service
//!
//! Backs the `GET /api/templates/{template_id}` endpoint.
//!
//! ## Workflow
//!
//! 1.  **HTTP Request**: `process` receives the `template_id` from the URL path.
//!
//! 2.  **Lookup**: The id is resolved through the shared `TemplateStore`, which
//!     decodes the stored JSON definition into a `Template`.
//!
//! 3.  **HTTP Response**: The template is returned in the standard response
//!     envelope. A missing template answers `404 Not Found`; a database failure
//!     answers `503 Service Unavailable`.

use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};

/// Actix web handler for the `GET /api/templates/{template_id}` endpoint.
///
/// # Arguments
/// * `state` - Shared application state holding the template store.
/// * `template_id` - The unique identifier of the template, extracted from the URL path.
///
/// # Returns
/// - `200 OK` with the `Template` as the `data` payload on success.
/// - `404 Not Found` if no template has that id.
/// - `503 Service Unavailable` if the template cannot be read.
pub(crate) async fn process(state: web::Data<AppState>, template_id: web::Path<String>) -> impl Responder {
    match state.templates.get(&template_id) {
        Ok(Some(template)) => response::ok("Template found", template),
        Ok(None) => response::not_found(format!("Template '{}' not found", template_id)),
        Err(e) => response::unavailable(format!("Error retrieving template: {}", e)),
    }
}
