mod support;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use common::model::report::{DeliveryStatus, ReportStatus};
use common::model::schedule::{MissedSlotPolicy, Schedule};
use common::model::source::FetchStatus;
use reportgen::error::{ArchiveError, DeliveryError};
use reportgen::job_controller::locks::ScheduleLocks;
use reportgen::job_controller::pool::RunQueue;
use reportgen::services::archive::{Completion, ReportFilter};
use reportgen::services::schedules::scheduler::{recover_interrupted, Scheduler};
use reportgen::services::templates::document::SectionBody;
use support::{Behavior, Harness, TEMPLATE_ID};

#[tokio::test]
async fn optional_source_timeout_yields_partial_report() {
    let h = Harness::new().await;
    h.registry.set("B", Behavior::Hang);

    let report = h.runner.run(h.request(&["ops@example.com"])).await.unwrap();

    assert_eq!(report.status, ReportStatus::SuccessPartial);
    assert_eq!(report.partial_sources, vec!["B".to_string()]);
    let b = report.source_outcomes.iter().find(|o| o.source_id == "B").unwrap();
    assert_eq!(b.status, FetchStatus::Failed);
    assert!(b.error.as_deref().unwrap().contains("timed out"));

    let documents = h.exporter.documents.lock();
    let placeholders: Vec<_> = documents[0].placeholders().collect();
    assert_eq!(placeholders.len(), 1);
    assert_eq!(placeholders[0].title, "Operations");
    assert_eq!(
        placeholders[0].body,
        SectionBody::Placeholder {
            message: "Operations data unavailable".into()
        }
    );

    let (_, artifact) = h.archive.get(&report.id).unwrap();
    assert!(artifact.unwrap().starts_with(b"%PDF"));
    assert_eq!(h.transport.calls(), 1);
    assert!(h.transport.sent.lock()[0].body.contains("Some data was unavailable: B."));
}

#[tokio::test]
async fn required_source_failure_fails_without_artifact() {
    let h = Harness::new().await;
    h.registry.set("A", Behavior::Fail("connection refused".into()));

    let report = h.runner.run(h.request(&["ops@example.com"])).await.unwrap();

    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.artifact_path, None);
    assert!(report.error.as_deref().unwrap().starts_with("required slice 'sales' lost source 'A'"));
    let (_, artifact) = h.archive.get(&report.id).unwrap();
    assert!(artifact.is_none());
    assert!(!h.archive.dir().join(format!("{}.pdf", report.id)).exists());
    assert_eq!(h.transport.calls(), 0);
    assert!(h.exporter.documents.lock().is_empty());

    // The failed run still reports what each source did.
    assert_eq!(report.partial_sources, vec!["A".to_string()]);
    let a = report.source_outcomes.iter().find(|o| o.source_id == "A").unwrap();
    assert_eq!(a.status, FetchStatus::Failed);
    assert!(a.error.as_deref().unwrap().contains("connection refused"));
    let b = report.source_outcomes.iter().find(|o| o.source_id == "B").unwrap();
    assert_eq!(b.status, FetchStatus::Success);

    let recorded = h.sources.get("A").unwrap().unwrap().last_fetch.unwrap();
    assert_eq!(recorded.status, FetchStatus::Failed);
    assert!(recorded.error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn successful_run_records_fetches_and_delivery() {
    let h = Harness::new().await;

    let report = h.runner.run(h.request(&["ops@example.com"])).await.unwrap();

    assert_eq!(report.status, ReportStatus::Success);
    assert!(report.partial_sources.is_empty());
    assert_eq!(report.rows_processed, 3);
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(report.deliveries[0].status, DeliveryStatus::Delivered);
    assert_eq!(report.deliveries[0].message_id.as_deref(), Some("msg-1"));

    let a = h.sources.get("A").unwrap().unwrap().last_fetch.unwrap();
    assert_eq!(a.status, FetchStatus::Success);
    assert_eq!(a.rows, 2);
}

#[tokio::test]
async fn invalid_recipient_is_not_retried() {
    let h = Harness::new().await;

    let report = h.runner.run(h.request(&["not-an-address"])).await.unwrap();

    assert_eq!(report.status, ReportStatus::SuccessUndelivered);
    assert_eq!(report.error.as_deref(), Some("invalid recipient address: not-an-address"));
    assert_eq!(report.deliveries.len(), 1);
    assert_eq!(report.deliveries[0].attempts, 0);
    assert_eq!(h.transport.calls(), 0);
    // The artifact stays downloadable.
    assert!(h.archive.get(&report.id).unwrap().1.is_some());
}

#[tokio::test]
async fn provider_rejection_is_recorded_verbatim_and_resend_appends() {
    let h = Harness::new().await;
    let rejection = "The from address does not match a verified Sender Identity";
    h.transport.script(vec![Err(DeliveryError::Permanent(rejection.into()))]);

    let report = h.runner.run(h.request(&["ops@example.com"])).await.unwrap();
    assert_eq!(report.status, ReportStatus::SuccessUndelivered);
    assert_eq!(report.error.as_deref(), Some(rejection));
    assert_eq!(h.transport.calls(), 1);

    let resent = h.runner.resend(&report.id, &["cfo@example.com".to_string()]).await.unwrap();
    assert_eq!(resent.status, ReportStatus::SuccessUndelivered);
    assert_eq!(resent.deliveries.len(), 2);
    assert_eq!(resent.deliveries[1].status, DeliveryStatus::Delivered);
    assert_eq!(resent.deliveries[1].recipients, vec!["cfo@example.com".to_string()]);
}

#[tokio::test]
async fn finalized_reports_are_immutable_and_searchable() {
    let h = Harness::new().await;
    let pending = h.request(&[]);
    let pending_id = pending.report_id.clone();

    let visible = |h: &Harness| -> Vec<String> {
        h.archive
            .search(ReportFilter::default())
            .map(|r| r.unwrap().id)
            .collect()
    };
    assert!(visible(&h).is_empty(), "pending reports are not listed");

    let report = h.runner.run(pending).await.unwrap();
    assert_eq!(report.id, pending_id);
    assert_eq!(visible(&h), vec![report.id.clone()]);

    let err = h
        .archive
        .finalize(&report.id, &Completion::failed("late writer"))
        .unwrap_err();
    assert!(matches!(err, ArchiveError::AlreadyTerminal(_)));
    assert_eq!(h.archive.metadata(&report.id).unwrap().status, ReportStatus::Success);
}

fn daily_schedule() -> Schedule {
    Schedule {
        id: "daily".into(),
        name: "Daily summary".into(),
        cron: "0 7 * * *".into(),
        template_id: TEMPLATE_ID.into(),
        recipients: vec!["ops@example.com".into()],
        enabled: true,
        missed_policy: MissedSlotPolicy::CatchUp,
        last_fired: None,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
    }
}

fn scheduler(h: &Harness, locks: ScheduleLocks, queue: RunQueue) -> Scheduler {
    Scheduler {
        schedules: h.schedules.clone(),
        templates: h.templates.clone(),
        archive: h.archive.clone(),
        locks,
        queue,
        jobs: h.jobs.clone(),
        max_catch_up: 24,
    }
}

#[tokio::test]
async fn a_restart_never_claims_the_same_slot_twice() {
    let h = Harness::new().await;
    h.schedules.upsert(&daily_schedule()).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

    let (queue, mut rx) = RunQueue::new(8);
    let queued = scheduler(&h, ScheduleLocks::new(), queue).tick(now).await.unwrap();
    assert_eq!(queued.len(), 1);
    let request = rx.recv().await.unwrap();
    assert_eq!(request.window.end, Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap());
    assert_eq!(request.window.start, request.window.end - ChronoDuration::days(7));

    // A new process with fresh locks sees the slot as taken.
    let (queue, _rx) = RunQueue::new(8);
    let again = scheduler(&h, ScheduleLocks::new(), queue).tick(now).await.unwrap();
    assert!(again.is_empty());

    // The first process died before running it.
    drop(request);
    assert_eq!(recover_interrupted(&h.archive).unwrap(), 1);
    let report = h.archive.metadata(&queued[0]).unwrap();
    assert_eq!(report.status, ReportStatus::Failed);
    assert_eq!(report.error.as_deref(), Some("interrupted by restart"));
    assert_eq!(report.slot, Some(Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap()));
}

#[tokio::test]
async fn a_running_schedule_is_not_fired_again() {
    let h = Harness::new().await;
    h.schedules.upsert(&daily_schedule()).unwrap();
    let (queue, mut rx) = RunQueue::new(8);
    let scheduler = scheduler(&h, ScheduleLocks::new(), queue);

    let first = scheduler.tick(Utc.with_ymd_and_hms(2024, 3, 3, 9, 0, 0).unwrap()).await.unwrap();
    assert_eq!(first.len(), 1);
    // Catch-up starts with the oldest missed slot.
    let running = rx.recv().await.unwrap();
    assert_eq!(running.window.end, Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap());

    // Later slots are due, but the first run still holds the schedule.
    let blocked = scheduler.tick(Utc.with_ymd_and_hms(2024, 3, 3, 9, 1, 0).unwrap()).await.unwrap();
    assert!(blocked.is_empty());

    h.runner.run(running).await.unwrap();
    let next = scheduler.tick(Utc.with_ymd_and_hms(2024, 3, 3, 9, 2, 0).unwrap()).await.unwrap();
    assert_eq!(next.len(), 1);
    let request = rx.recv().await.unwrap();
    assert_eq!(request.window.end, Utc.with_ymd_and_hms(2024, 3, 2, 7, 0, 0).unwrap());
}
