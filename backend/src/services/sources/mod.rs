//! # Source Service Module
//!
//! Source definitions and their HTTP endpoints under `/api/sources`. Fetching
//! itself lives in [`crate::services::data_sources`]; this module only stores
//! definitions and asks connectors to check them.
//!
//! ## Sub-modules:
//! - `store`: SQLite persistence of sources and their last fetch record.
//! - `list`, `save`, `health`: the HTTP handlers.

mod health;
mod list;
mod save;
pub mod store;

pub use store::SourceStore;

use crate::services::data_sources::csv;
use actix_web::web::{get, post, scope};
use actix_web::Scope;

/// The base path for all source-related API endpoints.
const API_PATH: &str = "/api/sources";

/// Configures and returns the Actix `Scope` for all source-related routes.
///
/// # Registered Routes:
///
/// *   **`GET /`**:
///     - **Handler**: `list::process`
///     - **Description**: Every configured source with its last fetch record.
///
/// *   **`POST /`**:
///     - **Handler**: `save::process`
///     - **Description**: Creates or replaces a source after a static check of its
///       configuration by the matching connector. Reachability is not tested.
///
/// *   **`GET /{source_id}/health`**:
///     - **Handler**: `health::process`
///     - **Description**: Asks the connector whether the source answers, within
///       the per-source timeout.
///
/// *   **`/csv/...`**:
///     - **Description**: CSV upload and verification, see
///       [`crate::services::data_sources::csv`].
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .service(csv::configure_routes())
        .route("", get().to(list::process))
        .route("", post().to(save::process))
        .route("/{source_id}/health", get().to(health::process))
}
