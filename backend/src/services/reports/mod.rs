//! # Report Service Module
//!
//! Archived reports and manual runs. Every handler reads the report archive;
//! `generate` and `resend` also drive the report pipeline.
//!
//! ## Sub-modules:
//! - `list`: searches committed reports.
//! - `generate`: creates a pending report and queues its run.
//! - `get`: report metadata with the delivery log.
//! - `download`: streams the PDF artifact.
//! - `progress`: live or archived run status.
//! - `resend`: emails a finished report again.

mod download;
mod generate;
mod get;
mod list;
mod progress;
mod resend;

use actix_web::web::{get, post, scope};
use actix_web::Scope;

/// The base path for all report-related API endpoints.
const API_PATH: &str = "/api/reports";
/// Page size of the listing endpoint when the caller sets no `limit`.
const DEFAULT_LIST_LIMIT: usize = 50;

/// Configures and returns the Actix `Scope` for all report-related routes.
///
/// # Registered Routes:
///
/// *   **`GET /`**:
///     - **Handler**: `list::process`
///     - **Description**: Committed reports, newest first. Accepts `from`, `to`,
///       `template_id`, `status` and `limit` as query parameters. Pending runs
///       are never listed.
///
/// *   **`POST /generate`**:
///     - **Handler**: `generate::process`
///     - **Description**: Queues a manual run and answers `202 Accepted` with the
///       new report id. A run naming a busy schedule gets `409 Conflict`.
///
/// *   **`GET /{report_id}`**:
///     - **Handler**: `get::process`
///     - **Description**: Report metadata, including source outcomes and the delivery log.
///
/// *   **`GET /{report_id}/download`**:
///     - **Handler**: `download::process`
///     - **Description**: The PDF of a successful report as an attachment.
///
/// *   **`GET /{report_id}/progress`**:
///     - **Handler**: `progress::process`
///     - **Description**: Live stage and percentage of a run, or its archived
///       status once this process no longer tracks it.
///
/// *   **`POST /{report_id}/resend`**:
///     - **Handler**: `resend::process`
///     - **Description**: Emails a finished successful report again and appends
///       the attempt to its delivery log.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", get().to(list::process))
        .route("/generate", post().to(generate::process))
        .route("/{report_id}", get().to(get::process))
        .route("/{report_id}/download", get().to(download::process))
        .route("/{report_id}/progress", get().to(progress::process))
        .route("/{report_id}/resend", post().to(resend::process))
}
