//! `POST /api/templates`: creates or replaces a template.
//!
//! ## Workflow
//!
//! 1.  **Validation**: The definition is checked statically before it is stored.
//!     Slices must be declared once and have sources, every section must read a
//!     declared slice, every section format must be usable and the branding
//!     color must parse. Source ids are not resolved here, so a template may be
//!     saved before its sources.
//!
//! 2.  **Persistence**: The template replaces any earlier definition with the
//!     same id. Runs already in flight keep the snapshot they started with.

use super::render::validate;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use common::model::template::Template;
use log::info;

/// Actix web handler for the `POST /api/templates` endpoint.
///
/// # Arguments
/// * `state` - Shared application state holding the template store.
/// * `payload` - The full `Template` definition as JSON.
///
/// # Returns
/// - `200 OK` with the stored template.
/// - `400 Bad Request` with the validation error.
/// - `503 Service Unavailable` if the database write fails.
pub(crate) async fn process(state: web::Data<AppState>, payload: web::Json<Template>) -> impl Responder {
    let template = payload.into_inner();
    if let Err(e) = validate(&template) {
        return response::bad_request(e.to_string());
    }
    match state.templates.upsert(&template) {
        Ok(()) => {
            info!(
                "template '{}' saved ({} sections)",
                template.id,
                template.sections.len()
            );
            response::ok("Template saved", template)
        }
        Err(e) => response::unavailable(format!("Error saving template: {}", e)),
    }
}
