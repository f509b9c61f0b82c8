//! Per-schedule run exclusivity.
//!
//! A schedule id is held from the moment a run is claimed until its
//! `ScheduleGuard` is dropped, whichever way the run ends.

use crate::error::ScheduleConflictError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct ScheduleLocks {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Releases the schedule when dropped.
#[derive(Debug)]
pub struct ScheduleGuard {
    schedule_id: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl ScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, schedule_id: &str) -> Result<ScheduleGuard, ScheduleConflictError> {
        let mut held = self.held.lock();
        if !held.insert(schedule_id.to_string()) {
            return Err(ScheduleConflictError {
                schedule_id: schedule_id.to_string(),
            });
        }
        Ok(ScheduleGuard {
            schedule_id: schedule_id.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_running(&self, schedule_id: &str) -> bool {
        self.held.lock().contains(schedule_id)
    }
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.schedule_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_conflicts_until_release() {
        let locks = ScheduleLocks::new();
        let guard = locks.try_acquire("weekly").unwrap();
        assert!(locks.is_running("weekly"));
        let err = locks.try_acquire("weekly").unwrap_err();
        assert_eq!(err.schedule_id, "weekly");
        assert!(locks.try_acquire("monthly").is_ok());

        drop(guard);
        assert!(!locks.is_running("weekly"));
        assert!(locks.try_acquire("weekly").is_ok());
    }

    #[test]
    fn concurrent_acquires_admit_exactly_one() {
        let locks = ScheduleLocks::new();
        let winners: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| locks.try_acquire("weekly").ok()))
                .collect();
            handles.into_iter().filter_map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(winners.len(), 1);
    }
}
