//! # Template Service Module
//!
//! Report templates and everything that turns one into a PDF. The HTTP side
//! routes requests under `/api/templates` to the handlers below; the rest of
//! the module is used by the report pipeline.
//!
//! ## Sub-modules:
//! - `store`: SQLite persistence of template definitions and the built-in defaults.
//! - `render`: binds a template to a run's dataset and produces a `Document`.
//! - `format`: locale-aware number, currency and date formatting for sections.
//! - `document`: the renderer's output model.
//! - `pdf`: lays a `Document` out as a PDF with the template's branding.
//! - `get`, `list`, `save`: the HTTP handlers.

pub mod document;
pub mod format;
mod get;
mod list;
pub mod pdf;
pub mod render;
mod save;
pub mod store;

pub use store::TemplateStore;

use actix_web::web::{get, post, scope};
use actix_web::Scope;

/// The base path for all template-related API endpoints.
const API_PATH: &str = "/api/templates";

/// Configures and returns the Actix `Scope` for all template-related routes.
///
/// # Registered Routes:
///
/// *   **`GET /`**:
///     - **Handler**: `list::process`
///     - **Description**: Returns every stored template, ordered by id.
///
/// *   **`POST /`**:
///     - **Handler**: `save::process`
///     - **Description**: Creates or replaces a template. The JSON payload is a full
///       `Template` definition; it is validated statically (declared slices, usable
///       formats, parseable branding) and rejected with `400 Bad Request` otherwise.
///
/// *   **`GET /{template_id}`**:
///     - **Handler**: `get::process`
///     - **Description**: Retrieves one template definition, or `404 Not Found`.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", get().to(list::process))
        .route("", post().to(save::process))
        .route("/{template_id}", get().to(get::process))
}
