//! Models shared between the report service and its API consumers.

pub mod jobs;
pub mod model;
pub mod requests;
