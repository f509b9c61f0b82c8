pub mod aggregate;
pub mod archive;
pub mod data_sources;
pub mod delivery;
pub mod health;
pub mod pipeline;
pub mod reports;
pub mod response;
pub mod schedules;
pub mod sources;
pub mod templates;
