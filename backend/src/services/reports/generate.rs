//! `POST /api/reports/generate`: queues a manual run.
//!
//! The report row is created in `pending` state before the run is queued,
//! so the returned id can be polled right away. A run naming a schedule
//! takes that schedule's lock and is refused with 409 while another run of
//! the schedule is in progress.

use crate::job_controller::pool::RunRequest;
use crate::services::archive::Completion;
use crate::services::data_sources::TimeWindow;
use crate::services::delivery::is_valid_recipient;
use crate::services::response;
use crate::services::schedules::scheduler::REPORT_WINDOW_DAYS;
use crate::state::AppState;
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse};
use chrono::Utc;
use common::model::report::Report;
use common::requests::GenerateReportRequest;
use log::{error, info};
use serde_json::json;
use uuid::Uuid;

pub(crate) async fn process(state: web::Data<AppState>, payload: web::Json<GenerateReportRequest>) -> HttpResponse {
    let req = payload.into_inner();
    if req.title.trim().is_empty() {
        return response::bad_request("Report title must not be empty");
    }
    let recipients = req
        .recipients
        .unwrap_or_else(|| state.config.run.default_recipients.clone());
    if let Some(bad) = recipients.iter().find(|r| !is_valid_recipient(r)) {
        return response::bad_request(format!("Invalid recipient address: {}", bad));
    }

    let now = Utc::now();
    let window = match (req.from, req.to) {
        (Some(from), to) if from >= to.unwrap_or(now) => {
            return response::bad_request("'from' must be earlier than 'to'");
        }
        (Some(from), Some(to)) => TimeWindow::new(from, to),
        (Some(from), None) => TimeWindow::new(from, now),
        (None, to) => TimeWindow::ending_at(to.unwrap_or(now), REPORT_WINDOW_DAYS),
    };

    match state.templates.get(&req.template_id) {
        Ok(Some(_)) => {}
        Ok(None) => return response::not_found(format!("Template '{}' not found", req.template_id)),
        Err(e) => return response::unavailable(format!("Error loading template: {}", e)),
    }

    let guard = match &req.schedule_id {
        None => None,
        Some(schedule_id) => {
            match state.schedules.get(schedule_id) {
                Ok(Some(_)) => {}
                Ok(None) => return response::not_found(format!("Schedule '{}' not found", schedule_id)),
                Err(e) => return response::unavailable(format!("Error loading schedule: {}", e)),
            }
            match state.locks.try_acquire(schedule_id) {
                Ok(guard) => Some(guard),
                Err(e) => return response::error(StatusCode::CONFLICT, e.to_string()),
            }
        }
    };

    let mut report = Report::pending(Uuid::new_v4().to_string(), req.title, req.template_id.clone(), now);
    report.schedule_id = req.schedule_id;
    if let Err(e) = state.archive.begin(&report) {
        error!("could not create report {}: {}", report.id, e);
        return response::unavailable(format!("Error creating report: {}", e));
    }
    state.jobs.register(&report.id).await;

    let request = RunRequest {
        report_id: report.id.clone(),
        template_id: req.template_id,
        window,
        recipients,
        guard,
    };
    if let Err(rejected) = state.queue.enqueue(request).await {
        if let Err(e) = state
            .archive
            .finalize(&rejected.report_id, &Completion::failed("run queue closed"))
        {
            error!("could not fail report {}: {}", rejected.report_id, e);
        }
        return response::unavailable("Report workers are not running");
    }
    info!("manual report {} queued", report.id);
    response::accepted("Report queued", json!({ "report_id": report.id }))
}
