//! `POST /api/schedules`: creates or edits a schedule.
//!
//! The cron expression and the recipients are checked before anything is
//! stored and the template must exist. An edited schedule keeps its last
//! claimed slot, so changing the expression never replays past slots.

use super::cron::CronSchedule;
use crate::services::delivery::is_valid_recipient;
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use chrono::Utc;
use common::model::schedule::{MissedSlotPolicy, Schedule};
use log::info;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleRequest {
    id: String,
    name: String,
    cron: String,
    template_id: String,
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    missed_policy: Option<MissedSlotPolicy>,
}

fn enabled_by_default() -> bool {
    true
}

pub(crate) async fn process(state: web::Data<AppState>, payload: web::Json<ScheduleRequest>) -> impl Responder {
    let req = payload.into_inner();
    if req.id.trim().is_empty() {
        return response::bad_request("Schedule id must not be empty");
    }
    if let Err(e) = CronSchedule::parse(&req.cron) {
        return response::bad_request(format!("Invalid cron expression: {}", e));
    }
    if let Some(bad) = req.recipients.iter().find(|r| !is_valid_recipient(r)) {
        return response::bad_request(format!("Invalid recipient address: {}", bad));
    }
    match state.templates.get(&req.template_id) {
        Ok(Some(_)) => {}
        Ok(None) => return response::bad_request(format!("Template '{}' not found", req.template_id)),
        Err(e) => return response::unavailable(format!("Error loading template: {}", e)),
    }

    let existing = match state.schedules.get(&req.id) {
        Ok(existing) => existing,
        Err(e) => return response::unavailable(format!("Error loading schedule: {}", e)),
    };
    let schedule = Schedule {
        id: req.id,
        name: req.name,
        cron: req.cron,
        template_id: req.template_id,
        recipients: req.recipients,
        enabled: req.enabled,
        missed_policy: req
            .missed_policy
            .unwrap_or(state.config.scheduler.default_policy),
        last_fired: existing.as_ref().and_then(|s| s.last_fired),
        created_at: existing.map(|s| s.created_at).unwrap_or_else(Utc::now),
    };

    match state.schedules.upsert(&schedule) {
        Ok(()) => {
            info!("schedule '{}' saved ({})", schedule.id, schedule.cron);
            response::ok("Schedule saved", schedule)
        }
        Err(e) => response::unavailable(format!("Error saving schedule: {}", e)),
    }
}
