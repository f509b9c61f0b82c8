//! The scheduler loop: finds due slots, claims them and queues the runs.
//!
//! A schedule is `Running` while its lock is held, `Due` when a slot after
//! its last claimed one has passed, `Idle` otherwise. A running schedule is
//! never claimed again, so runs of one schedule never overlap and a
//! catch-up backlog drains one slot per run.

use super::cron::CronSchedule;
use super::store::ScheduleStore;
use crate::error::ArchiveError;
use crate::job_controller::locks::ScheduleLocks;
use crate::job_controller::pool::{RunQueue, RunRequest};
use crate::job_controller::state::JobsState;
use crate::services::archive::{Completion, ReportArchive};
use crate::services::data_sources::TimeWindow;
use crate::services::templates::TemplateStore;
use chrono::{DateTime, Utc};
use common::model::report::Report;
use common::model::schedule::{MissedSlotPolicy, Schedule, ScheduleState};
use log::{error, info, warn};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Days of data a scheduled run covers, ending at its slot.
pub const REPORT_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub struct Scheduler {
    pub schedules: ScheduleStore,
    pub templates: TemplateStore,
    pub archive: ReportArchive,
    pub locks: ScheduleLocks,
    pub queue: RunQueue,
    pub jobs: JobsState,
    pub max_catch_up: usize,
}

/// The slot a schedule should run next, if any is due at `now`.
pub fn due_slot(schedule: &Schedule, cron: &CronSchedule, now: DateTime<Utc>, max_catch_up: usize) -> Option<DateTime<Utc>> {
    let anchor = schedule.last_fired.unwrap_or(schedule.created_at);
    let slots = cron.slots_between(anchor, now);
    match schedule.missed_policy {
        MissedSlotPolicy::Skip => slots.last(),
        MissedSlotPolicy::CatchUp => {
            // Only the newest `max_catch_up` missed slots are kept as backlog.
            let mut backlog = VecDeque::with_capacity(max_catch_up.max(1));
            for slot in slots {
                if backlog.len() == max_catch_up.max(1) {
                    backlog.pop_front();
                }
                backlog.push_back(slot);
            }
            backlog.pop_front()
        }
    }
}

/// Finalizes every run left `pending` by a previous process as failed and
/// drops its partial artifact. Interrupted runs are not re-executed.
pub fn recover_interrupted(archive: &ReportArchive) -> Result<usize, ArchiveError> {
    let pending = archive.pending_reports()?;
    for report in &pending {
        warn!("report {} was interrupted by a restart, marking it failed", report.id);
        archive.discard_artifact(&report.id)?;
        match archive.finalize(&report.id, &Completion::failed("interrupted by restart")) {
            Ok(_) | Err(ArchiveError::AlreadyTerminal(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(pending.len())
}

pub fn state_of(schedule: &Schedule, locks: &ScheduleLocks, now: DateTime<Utc>, max_catch_up: usize) -> ScheduleState {
    if locks.is_running(&schedule.id) {
        return ScheduleState::Running;
    }
    match CronSchedule::parse(&schedule.cron) {
        Ok(cron) if schedule.enabled && due_slot(schedule, &cron, now, max_catch_up).is_some() => ScheduleState::Due,
        _ => ScheduleState::Idle,
    }
}

impl Scheduler {
    /// One pass over all schedules. Returns the ids of the reports queued.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<String>, ArchiveError> {
        let mut queued = Vec::new();
        for schedule in self.schedules.list()? {
            if !schedule.enabled {
                continue;
            }
            let cron = match CronSchedule::parse(&schedule.cron) {
                Ok(cron) => cron,
                Err(e) => {
                    warn!("schedule '{}' has an invalid cron expression: {}", schedule.id, e);
                    continue;
                }
            };
            let Some(slot) = due_slot(&schedule, &cron, now, self.max_catch_up) else {
                continue;
            };
            // Held from the claim until the run finishes.
            let guard = match self.locks.try_acquire(&schedule.id) {
                Ok(guard) => guard,
                Err(_) => continue,
            };

            let title = match self.templates.get(&schedule.template_id)? {
                Some(template) => format!("{} ({})", template.name, slot.format("%Y-%m-%d")),
                None => format!("{} ({})", schedule.template_id, slot.format("%Y-%m-%d")),
            };
            let mut report = Report::pending(
                uuid::Uuid::new_v4().to_string(),
                title,
                schedule.template_id.clone(),
                now,
            );
            report.schedule_id = Some(schedule.id.clone());
            report.slot = Some(slot);

            if !self.schedules.claim(&schedule.id, slot, &report)? {
                info!("slot {} of schedule '{}' was already claimed", slot, schedule.id);
                continue;
            }
            info!("schedule '{}' fired for slot {} as report {}", schedule.id, slot, report.id);
            self.jobs.register(&report.id).await;

            let request = RunRequest {
                report_id: report.id.clone(),
                template_id: schedule.template_id.clone(),
                window: TimeWindow::ending_at(slot, REPORT_WINDOW_DAYS),
                recipients: schedule.recipients.clone(),
                guard: Some(guard),
            };
            if let Err(rejected) = self.queue.enqueue(request).await {
                error!("run queue is closed, report {} cannot run", rejected.report_id);
                self.archive
                    .finalize(&rejected.report_id, &Completion::failed("run queue closed"))?;
                continue;
            }
            queued.push(report.id);
        }
        Ok(queued)
    }

    /// Ticks every `tick` until `shutdown` is cancelled.
    pub async fn run(self, tick: Duration, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!("scheduler tick failed: {}", e);
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
