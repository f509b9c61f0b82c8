use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::{info, warn};
use reportgen::config::Config;
use reportgen::db::Db;
use reportgen::job_controller::locks::ScheduleLocks;
use reportgen::job_controller::pool::{start_workers, RunQueue};
use reportgen::job_controller::state::{start_job_updater, JobsState};
use reportgen::services;
use reportgen::services::archive::ReportArchive;
use reportgen::services::data_sources::{ConnectorRegistry, KindRegistry};
use reportgen::services::delivery::Dispatcher;
use reportgen::services::pipeline::ReportRunner;
use reportgen::services::schedules::scheduler::{recover_interrupted, Scheduler};
use reportgen::services::schedules::ScheduleStore;
use reportgen::services::sources::SourceStore;
use reportgen::services::templates::pdf::{Exporter, PdfExporter};
use reportgen::services::templates::TemplateStore;
use reportgen::state::AppState;
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn startup_error(what: &str, e: impl std::fmt::Display) -> io::Error {
    io::Error::other(format!("{}: {}", what, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    env_logger::init_from_env(Env::default().default_filter_or("info"));
    let config = Arc::new(Config::from_env().map_err(|e| startup_error("invalid configuration", e))?);

    let db = Db::open(&config.database_path).map_err(|e| startup_error("cannot open database", e))?;
    let archive = ReportArchive::new(db.clone(), &config.archive_dir)
        .map_err(|e| startup_error("cannot open report archive", e))?;
    let recovered = recover_interrupted(&archive).map_err(|e| startup_error("recovery failed", e))?;
    if recovered > 0 {
        warn!("{} interrupted report(s) marked failed", recovered);
    }

    let sources = SourceStore::new(db.clone());
    let templates = TemplateStore::new(db.clone());
    let schedules = ScheduleStore::new(db.clone());
    if config.demo_mode {
        sources.seed_demo().map_err(|e| startup_error("cannot seed demo sources", e))?;
        info!("demo mode: sources read generated fixtures");
    }
    let seeded = templates
        .seed_defaults()
        .map_err(|e| startup_error("cannot seed templates", e))?;
    if seeded > 0 {
        info!("installed {} default template(s)", seeded);
    }
    if schedules
        .seed_default(&config)
        .map_err(|e| startup_error("cannot seed schedule", e))?
    {
        info!("installed default schedule '{}'", config.scheduler.default_cron);
    }

    let registry: Arc<dyn ConnectorRegistry> =
        Arc::new(KindRegistry::new(&config).map_err(|e| startup_error("cannot build connectors", e))?);
    let (jobs, updates) = JobsState::new(256);
    tokio::spawn(start_job_updater(jobs.clone(), updates));

    let dispatcher = Arc::new(
        Dispatcher::from_settings(&config.delivery).map_err(|e| startup_error("cannot build mail client", e))?,
    );
    let exporter: Arc<dyn Exporter> = Arc::new(PdfExporter::new(config.page.clone()));
    let runner = Arc::new(ReportRunner::new(
        &config,
        archive.clone(),
        templates.clone(),
        sources.clone(),
        registry.clone(),
        exporter,
        dispatcher,
        jobs.clone(),
    ));

    let (queue, requests) = RunQueue::new(config.worker_count * 8);
    let worker_runner = runner.clone();
    start_workers(config.worker_count, requests, move |request| {
        let runner = worker_runner.clone();
        async move {
            runner.run(request).await;
        }
    });

    let locks = ScheduleLocks::new();
    let shutdown = CancellationToken::new();
    let scheduler = Scheduler {
        schedules: schedules.clone(),
        templates: templates.clone(),
        archive: archive.clone(),
        locks: locks.clone(),
        queue: queue.clone(),
        jobs: jobs.clone(),
        max_catch_up: config.scheduler.max_catch_up,
    };
    tokio::spawn(scheduler.run(config.scheduler.tick, shutdown.clone()));

    let state = AppState {
        config: config.clone(),
        db,
        archive,
        sources,
        templates,
        schedules,
        registry,
        runner,
        locks,
        jobs: jobs.clone(),
        queue,
    };

    info!("Server running at http://{}:{}", config.host, config.port);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::JsonConfig::default().limit(10 * 1024 * 1024)) // 10 MB
            .app_data(web::Data::new(state.clone()))
            .app_data(web::Data::new(jobs.clone()))
            .service(services::health::configure_routes())
            .service(services::sources::configure_routes())
            .service(services::templates::configure_routes())
            .service(services::schedules::configure_routes())
            .service(services::reports::configure_routes())
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await;

    shutdown.cancel();
    server
}
