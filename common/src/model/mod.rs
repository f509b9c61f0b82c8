pub mod csv;
pub mod dataset;
pub mod report;
pub mod schedule;
pub mod source;
pub mod table;
pub mod template;
