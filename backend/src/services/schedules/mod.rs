//! # Schedule Service Module
//!
//! Report schedules and the loop that fires them.
//!
//! ## Sub-modules:
//! - `cron`: five-field cron expressions.
//! - `store`: SQLite persistence of schedules and their last claimed slot.
//! - `scheduler`: the tick loop, slot claiming and restart recovery.
//! - `list`, `save`: the HTTP handlers.

pub mod cron;
mod list;
mod save;
pub mod scheduler;
pub mod store;

pub use scheduler::Scheduler;
pub use store::ScheduleStore;

use actix_web::web::{get, post, scope};
use actix_web::Scope;

/// The base path for all schedule-related API endpoints.
const API_PATH: &str = "/api/schedules";

/// Configures and returns the Actix `Scope` for all schedule-related routes.
///
/// # Registered Routes:
///
/// *   **`GET /`**:
///     - **Handler**: `list::process`
///     - **Description**: Every schedule with its current state and, when enabled,
///       its next firing time.
///
/// *   **`POST /`**:
///     - **Handler**: `save::process`
///     - **Description**: Creates or edits a schedule. The cron expression, the
///       recipients and the template are checked first.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("", get().to(list::process))
        .route("", post().to(save::process))
}
