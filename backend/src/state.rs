//! Shared application state handed to every handler through `web::Data`.

use crate::config::Config;
use crate::db::Db;
use crate::job_controller::locks::ScheduleLocks;
use crate::job_controller::pool::RunQueue;
use crate::job_controller::state::JobsState;
use crate::services::archive::ReportArchive;
use crate::services::data_sources::ConnectorRegistry;
use crate::services::pipeline::ReportRunner;
use crate::services::schedules::ScheduleStore;
use crate::services::sources::SourceStore;
use crate::services::templates::TemplateStore;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Db,
    pub archive: ReportArchive,
    pub sources: SourceStore,
    pub templates: TemplateStore,
    pub schedules: ScheduleStore,
    pub registry: Arc<dyn ConnectorRegistry>,
    pub runner: Arc<ReportRunner>,
    pub locks: ScheduleLocks,
    pub jobs: JobsState,
    pub queue: RunQueue,
}
