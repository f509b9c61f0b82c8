//! Background execution: job progress, per-schedule locks and the worker pool.

pub mod locks;
pub mod pool;
pub mod state;
