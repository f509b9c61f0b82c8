//! `GET /api/schedules`
//!
//! Each schedule is returned with its derived `ScheduleState` and the next
//! time its expression fires. A disabled schedule or
//! one with an expression that no longer parses has no next run.

use super::cron::CronSchedule;
use super::scheduler::state_of;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use chrono::{DateTime, Utc};
use common::model::schedule::{Schedule, ScheduleState};
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ScheduleView {
    #[serde(flatten)]
    schedule: Schedule,
    state: ScheduleState,
    next_run: Option<DateTime<Utc>>,
}

/// # Arguments
/// * `state` - Shared application state with the schedule store and schedule locks.
///
/// # Returns
/// - `200 OK` with one `ScheduleView` per schedule.
/// - `503 Service Unavailable` if the schedules cannot be read.
pub(crate) async fn process(state: web::Data<AppState>) -> impl Responder {
    let schedules = match state.schedules.list() {
        Ok(schedules) => schedules,
        Err(e) => return response::unavailable(format!("Error listing schedules: {}", e)),
    };
    let now = Utc::now();
    let max_catch_up = state.config.scheduler.max_catch_up;
    let views: Vec<ScheduleView> = schedules
        .into_iter()
        .map(|schedule| {
            let next_run = CronSchedule::parse(&schedule.cron)
                .ok()
                .filter(|_| schedule.enabled)
                .and_then(|cron| cron.next_after(now));
            ScheduleView {
                state: state_of(&schedule, &state.locks, now, max_catch_up),
                next_run,
                schedule,
            }
        })
        .collect();
    response::ok(format!("Found {} schedules", views.len()), views)
}
