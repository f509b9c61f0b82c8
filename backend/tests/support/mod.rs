#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use common::model::report::Report;
use common::model::source::{Source, SourceConfig};
use common::model::table::Table;
use common::model::template::{Branding, Directive, SectionFormat, SectionSpec, SliceSpec, Template};
use parking_lot::Mutex;
use reportgen::config::Config;
use reportgen::db::Db;
use reportgen::error::{ConnectorError, DeliveryError, RenderError};
use reportgen::job_controller::locks::ScheduleLocks;
use reportgen::job_controller::pool::{RunQueue, RunRequest};
use reportgen::job_controller::state::{start_job_updater, JobsState};
use reportgen::services::archive::ReportArchive;
use reportgen::services::data_sources::{Connector, ConnectorRegistry, Fetched, TimeWindow};
use reportgen::services::delivery::{Dispatcher, Email, EmailTransport};
use reportgen::services::pipeline::ReportRunner;
use reportgen::services::schedules::ScheduleStore;
use reportgen::services::sources::SourceStore;
use reportgen::services::templates::document::Document;
use reportgen::services::templates::pdf::Exporter;
use reportgen::services::templates::TemplateStore;
use reportgen::state::AppState;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const TEMPLATE_ID: &str = "weekly";

#[derive(Clone)]
pub enum Behavior {
    Rows(Table),
    Hang,
    Fail(String),
}

struct FakeConnector {
    behavior: Behavior,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn fetch(&self, _window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        match &self.behavior {
            Behavior::Rows(table) => Ok(Fetched::complete(table.clone())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(ConnectorError::Network("never answered".into()))
            }
            Behavior::Fail(message) => Err(ConnectorError::Network(message.clone())),
        }
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Hands out a scripted connector per source id.
#[derive(Default)]
pub struct FakeRegistry {
    behaviors: Mutex<HashMap<String, Behavior>>,
}

impl FakeRegistry {
    pub fn set(&self, source_id: &str, behavior: Behavior) {
        self.behaviors.lock().insert(source_id.to_string(), behavior);
    }
}

impl ConnectorRegistry for FakeRegistry {
    fn connector(&self, source: &Source) -> Result<Arc<dyn Connector>, ConnectorError> {
        let behavior = self
            .behaviors
            .lock()
            .get(&source.id)
            .cloned()
            .ok_or_else(|| ConnectorError::Config(format!("no behavior for {}", source.id)))?;
        Ok(Arc::new(FakeConnector { behavior }))
    }
}

/// Keeps every rendered document instead of laying out a real PDF.
#[derive(Default)]
pub struct RecordingExporter {
    pub documents: Mutex<Vec<Document>>,
}

impl Exporter for RecordingExporter {
    fn export(&self, document: &Document, _branding: &Branding) -> Result<Vec<u8>, RenderError> {
        self.documents.lock().push(document.clone());
        Ok(format!("%PDF-1.4 {}", document.title).into_bytes())
    }
}

/// Answers sends from a script, then succeeds.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<Vec<Result<String, DeliveryError>>>,
    pub sent: Mutex<Vec<Email>>,
}

impl ScriptedTransport {
    pub fn script(&self, mut replies: Vec<Result<String, DeliveryError>>) {
        replies.reverse();
        *self.replies.lock() = replies;
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl EmailTransport for ScriptedTransport {
    async fn send(&self, email: &Email) -> Result<String, DeliveryError> {
        self.sent.lock().push(email.clone());
        self.replies
            .lock()
            .pop()
            .unwrap_or_else(|| Ok(format!("msg-{}", self.sent.lock().len())))
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub config: Arc<Config>,
    pub db: Db,
    pub archive: ReportArchive,
    pub sources: SourceStore,
    pub templates: TemplateStore,
    pub schedules: ScheduleStore,
    pub jobs: JobsState,
    pub registry: Arc<FakeRegistry>,
    pub exporter: Arc<RecordingExporter>,
    pub transport: Arc<ScriptedTransport>,
    pub runner: Arc<ReportRunner>,
}

pub fn table(rows: &[(&str, i64)]) -> Table {
    Table {
        columns: vec!["region".into(), "amount".into()],
        rows: rows.iter().map(|(r, a)| vec![json!(r), json!(a)]).collect(),
    }
}

fn section(title: &str, slice: &str, optional: bool) -> SectionSpec {
    SectionSpec {
        title: title.into(),
        slice: slice.into(),
        optional,
        directive: Directive::Table {
            columns: Vec::new(),
            max_rows: None,
            group_by: None,
        },
        format: SectionFormat::default(),
        empty_message: optional.then(|| format!("{} data unavailable", title)),
    }
}

/// Sales (source A) is required, operations (source B) is optional.
pub fn weekly_template() -> Template {
    Template {
        id: TEMPLATE_ID.into(),
        name: "Weekly summary".into(),
        description: String::new(),
        slices: vec![
            SliceSpec {
                name: "sales".into(),
                sources: vec!["A".into()],
                dedupe_key: None,
            },
            SliceSpec {
                name: "ops".into(),
                sources: vec!["B".into()],
                dedupe_key: None,
            },
        ],
        sections: vec![section("Sales", "sales", false), section("Operations", "ops", true)],
        branding: None,
    }
}

impl Harness {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let vars = vec![
            ("SOURCE_TIMEOUT_SECS", "1"),
            ("RUN_DEADLINE_SECS", "30"),
            ("DELIVERY_MAX_ATTEMPTS", "3"),
            ("DELIVERY_BACKOFF_MS", "1"),
            ("DEFAULT_RECIPIENTS", "ops@example.com"),
        ];
        let mut config = Config::from_vars(vars.into_iter().map(|(k, v)| (k.to_string(), v.to_string()))).unwrap();
        config.database_path = dir.path().join("reportgen.sqlite");
        config.archive_dir = dir.path().join("reports");
        config.data_dir = dir.path().join("data");
        let config = Arc::new(config);

        let db = Db::open(&config.database_path).unwrap();
        let archive = ReportArchive::new(db.clone(), &config.archive_dir).unwrap();
        let sources = SourceStore::new(db.clone());
        let templates = TemplateStore::new(db.clone());
        let schedules = ScheduleStore::new(db.clone());
        for id in ["A", "B"] {
            sources
                .upsert(&Source {
                    id: id.into(),
                    name: format!("Source {}", id),
                    config: SourceConfig::Demo {
                        dataset: "sales".into(),
                    },
                    last_fetch: None,
                })
                .unwrap();
        }
        templates.upsert(&weekly_template()).unwrap();

        let (jobs, updates) = JobsState::new(64);
        tokio::spawn(start_job_updater(jobs.clone(), updates));

        let registry = Arc::new(FakeRegistry::default());
        registry.set("A", Behavior::Rows(table(&[("north", 120), ("south", 80)])));
        registry.set("B", Behavior::Rows(table(&[("east", 40)])));
        let exporter = Arc::new(RecordingExporter::default());
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = Arc::new(Dispatcher::new(transport.clone(), 3, Duration::from_millis(1)));

        let runner = Arc::new(ReportRunner::new(
            &config,
            archive.clone(),
            templates.clone(),
            sources.clone(),
            registry.clone(),
            exporter.clone(),
            dispatcher,
            jobs.clone(),
        ));

        Self {
            dir,
            config,
            db,
            archive,
            sources,
            templates,
            schedules,
            jobs,
            registry,
            exporter,
            transport,
            runner,
        }
    }

    /// Creates a pending manual report and the request that runs it.
    pub fn request(&self, recipients: &[&str]) -> RunRequest {
        let now = Utc::now();
        let report = Report::pending(
            uuid::Uuid::new_v4().to_string(),
            "Weekly summary".into(),
            TEMPLATE_ID.into(),
            now,
        );
        self.archive.begin(&report).unwrap();
        RunRequest {
            report_id: report.id,
            template_id: TEMPLATE_ID.into(),
            window: TimeWindow::ending_at(now, 7),
            recipients: recipients.iter().map(|r| r.to_string()).collect(),
            guard: None,
        }
    }

    pub fn app_state(&self, locks: ScheduleLocks, queue: RunQueue) -> AppState {
        AppState {
            config: self.config.clone(),
            db: self.db.clone(),
            archive: self.archive.clone(),
            sources: self.sources.clone(),
            templates: self.templates.clone(),
            schedules: self.schedules.clone(),
            registry: self.registry.clone(),
            runner: self.runner.clone(),
            locks,
            jobs: self.jobs.clone(),
            queue,
        }
    }
}
