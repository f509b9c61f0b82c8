//! Scheduled business reports: source connectors, aggregation, rendering,
//! PDF export, archiving and email delivery behind a small HTTP API.

pub mod config;
pub mod db;
pub mod error;
pub mod job_controller;
pub mod services;
pub mod state;
