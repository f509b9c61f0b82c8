mod support;

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use reportgen::job_controller::locks::ScheduleLocks;
use reportgen::job_controller::pool::RunQueue;
use reportgen::services;
use serde_json::{json, Value};
use support::{Harness, TEMPLATE_ID};

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state))
                .service(services::health::configure_routes())
                .service(services::templates::configure_routes())
                .service(services::schedules::configure_routes())
                .service(services::reports::configure_routes()),
        )
        .await
    };
}

fn weekly_schedule() -> Value {
    json!({
        "id": "weekly",
        "name": "Weekly summary",
        "cron": "0 7 * * 1",
        "template_id": TEMPLATE_ID,
        "recipients": ["ops@example.com"],
    })
}

#[actix_web::test]
async fn manual_runs_of_one_schedule_do_not_overlap() {
    let h = Harness::new().await;
    let (queue, mut rx) = RunQueue::new(8);
    let app = app!(h.app_state(ScheduleLocks::new(), queue));

    let req = test::TestRequest::post()
        .uri("/api/schedules")
        .set_json(weekly_schedule())
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

    let generate = || {
        test::TestRequest::post()
            .uri("/api/reports/generate")
            .set_json(json!({ "title": "Weekly summary", "template_id": TEMPLATE_ID, "schedule_id": "weekly" }))
            .to_request()
    };
    let first = test::call_service(&app, generate()).await;
    assert_eq!(first.status(), StatusCode::ACCEPTED);
    let body: Value = test::read_body_json(first).await;
    let report_id = body["data"]["report_id"].as_str().unwrap().to_string();

    let second = test::call_service(&app, generate()).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);

    let progress = test::TestRequest::get()
        .uri(&format!("/api/reports/{}/progress", report_id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, progress).await;
    assert_eq!(body["data"], json!("Pending"));

    // Pending runs are not listed.
    let list = test::TestRequest::get().uri("/api/reports").to_request();
    let body: Value = test::call_and_read_body_json(&app, list).await;
    assert_eq!(body["data"], json!([]));

    let request = rx.recv().await.unwrap();
    assert_eq!(request.report_id, report_id);
    h.runner.run(request).await.unwrap();

    // The lock went with the finished run.
    let third = test::call_service(&app, generate()).await;
    assert_eq!(third.status(), StatusCode::ACCEPTED);

    let list = test::TestRequest::get().uri("/api/reports?status=success").to_request();
    let body: Value = test::call_and_read_body_json(&app, list).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], json!(report_id));

    let download = test::TestRequest::get()
        .uri(&format!("/api/reports/{}/download", report_id))
        .to_request();
    let resp = test::call_service(&app, download).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("content-type").unwrap(), "application/pdf");
    let bytes = test::read_body(resp).await;
    assert!(bytes.starts_with(b"%PDF"));
}

#[actix_web::test]
async fn failed_and_unknown_reports_have_no_download() {
    let h = Harness::new().await;
    h.registry.set("A", support::Behavior::Fail("boom".into()));
    let failed = h.runner.run(h.request(&[])).await.unwrap();
    let (queue, _rx) = RunQueue::new(8);
    let app = app!(h.app_state(ScheduleLocks::new(), queue));

    let req = test::TestRequest::get()
        .uri(&format!("/api/reports/{}/download", failed.id))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get().uri("/api/reports/nope").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::get()
        .uri(&format!("/api/reports/{}", failed.id))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], json!("failed"));
    assert!(body["data"]["error"].as_str().unwrap().contains("boom"));
}

#[actix_web::test]
async fn invalid_requests_are_rejected() {
    let h = Harness::new().await;
    let (queue, _rx) = RunQueue::new(8);
    let app = app!(h.app_state(ScheduleLocks::new(), queue));

    let mut bad_cron = weekly_schedule();
    bad_cron["cron"] = json!("0 7 * *");
    let req = test::TestRequest::post().uri("/api/schedules").set_json(bad_cron).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri("/api/reports/generate")
        .set_json(json!({ "title": "Adhoc", "template_id": "missing" }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

    let req = test::TestRequest::post()
        .uri("/api/reports/generate")
        .set_json(json!({ "title": "Adhoc", "recipients": ["bogus@"] }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::get().uri("/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["status"], json!("ok"));
}
