//! CSV sources: the file connector plus the upload and verification endpoints.
//!
//! Routes, mounted under `/api/sources`:
//! - `POST /csv/upload`: multipart upload. A `json` part naming the source
//!   (`{"source_id": ...}`) must precede the `file` part. The header line is
//!   validated before anything is written; the body is streamed to a
//!   temporary file in the data directory and renamed over the source's file
//!   once complete, so a run never reads a half-written upload. The MD5 of
//!   the upload is stored on the source.
//! - `POST /csv/verify`: starts a background job that infers a type for each
//!   column from the first data row and checks every remaining row against
//!   it. Returns the job id immediately.
//! - `GET /csv/status/{job_id}`: polls a verification job. A completed job
//!   carries the inferred columns as JSON.

use actix_web::web::{get, post, scope};
use actix_web::Scope;

pub mod connector;
mod get_status;
mod upload;
mod verify;

/// Mounted inside the `/api/sources` scope.
const API_PATH: &str = "/csv";

/// Configures the CSV routes. Verification is asynchronous: `verify` answers
/// with a job id that `status/{job_id}` reports on.
pub fn configure_routes() -> Scope {
    scope(API_PATH)
        .route("/verify", post().to(verify::process))
        .route("/status/{job_id}", get().to(get_status::process))
        .route("/upload", post().to(upload::process))
}
