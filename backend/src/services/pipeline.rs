//! One report run, start to finish.
//!
//! Stages run strictly in order: load the template snapshot, aggregate the
//! sources, render, export to PDF on the blocking pool, store the artifact,
//! deliver, finalize. Every run ends in exactly one `finalize` call; on any
//! failure the stored artifact is discarded first so that a failed report
//! never has a downloadable file. Progress is published under the report id.

use crate::config::{Config, RunSettings};
use crate::error::{AggregationError, ArchiveError, RunError};
use crate::job_controller::pool::RunRequest;
use crate::job_controller::state::JobsState;
use crate::services::aggregate::Aggregator;
use crate::services::archive::{Completion, ReportArchive};
use crate::services::data_sources::ConnectorRegistry;
use crate::services::delivery::{Attachment, Dispatcher, Email};
use crate::services::sources::SourceStore;
use crate::services::templates::pdf::Exporter;
use crate::services::templates::render::{render, RenderContext};
use crate::services::templates::TemplateStore;
use chrono::Utc;
use common::jobs::JobStatus;
use common::model::dataset::Dataset;
use common::model::report::{DeliveryStatus, Report, ReportStatus};
use common::model::source::{FetchRecord, FetchStatus, Source, SourceOutcome};
use common::model::template::Branding;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

pub struct ReportRunner {
    archive: ReportArchive,
    templates: TemplateStore,
    sources: SourceStore,
    aggregator: Aggregator,
    exporter: Arc<dyn Exporter>,
    dispatcher: Arc<Dispatcher>,
    jobs: JobsState,
    branding: Branding,
    run: RunSettings,
}

/// What a successful execution produced, before delivery decides the status.
struct Produced {
    dataset: Dataset,
    artifact_name: String,
    artifact: Vec<u8>,
    title: String,
}

impl ReportRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        archive: ReportArchive,
        templates: TemplateStore,
        sources: SourceStore,
        registry: Arc<dyn ConnectorRegistry>,
        exporter: Arc<dyn Exporter>,
        dispatcher: Arc<Dispatcher>,
        jobs: JobsState,
    ) -> Self {
        Self {
            aggregator: Aggregator::new(registry, &config.run),
            archive,
            templates,
            sources,
            exporter,
            dispatcher,
            jobs,
            branding: config.branding.clone(),
            run: config.run.clone(),
        }
    }

    async fn progress(&self, report_id: &str, stage: &str, percent: u32) {
        self.jobs
            .publish(report_id, JobStatus::in_progress(stage, percent))
            .await;
    }

    fn load_sources(&self, ids: impl Iterator<Item = String>) -> Result<HashMap<String, Source>, RunError> {
        let mut sources = HashMap::new();
        for id in ids {
            if sources.contains_key(&id) {
                continue;
            }
            if let Some(source) = self.sources.get(&id).map_err(ArchiveError::from)? {
                sources.insert(id, source);
            }
        }
        Ok(sources)
    }

    /// Everything up to the stored artifact. Source outcomes are copied into
    /// `outcomes` as soon as they are known, so a later failure still records them.
    async fn produce(
        &self,
        request: &RunRequest,
        report: &Report,
        started: Instant,
        outcomes: &mut Vec<SourceOutcome>,
    ) -> Result<Produced, RunError> {
        let deadline = self.run.run_deadline;
        let remaining = || deadline.saturating_sub(started.elapsed());

        let template = self
            .templates
            .get(&request.template_id)
            .map_err(ArchiveError::from)?
            .ok_or_else(|| RunError::TemplateNotFound(request.template_id.clone()))?;
        let sources = self.load_sources(template.slices.iter().flat_map(|s| s.sources.iter().cloned()))?;

        self.progress(&report.id, "fetching", 10).await;
        let dataset = match self
            .aggregator
            .aggregate(&template, &sources, &request.window, remaining())
            .await
        {
            Ok(dataset) => dataset,
            Err(e) => {
                if let AggregationError::RequiredSource { outcomes: gathered, .. } = &e {
                    outcomes.clone_from(gathered);
                }
                return Err(e.into());
            }
        };
        outcomes.clone_from(&dataset.outcomes);

        self.progress(&report.id, "rendering", 50).await;
        let branding = template.branding.clone().unwrap_or_else(|| self.branding.clone());
        let context = RenderContext {
            title: report.title.clone(),
            company_name: branding.company_name.clone(),
            generated_at: report.generated_at,
            window: request.window,
        };
        let document = render(&template, &dataset, &context)?;

        self.progress(&report.id, "exporting", 70).await;
        let exporter = self.exporter.clone();
        let export = tokio::task::spawn_blocking(move || exporter.export(&document, &branding));
        let artifact = match tokio::time::timeout(remaining(), export).await {
            Err(_) => return Err(RunError::Timeout(deadline, "exporting")),
            Ok(Err(join)) => return Err(RunError::Worker(join.to_string())),
            Ok(Ok(result)) => result?,
        };

        self.progress(&report.id, "archiving", 85).await;
        let artifact_name = self.archive.store_artifact(&report.id, &artifact)?;
        if self.run.retain_datasets {
            if let Err(e) = self.archive.retain_dataset(&report.id, &dataset) {
                warn!("could not retain dataset of report {}: {}", report.id, e);
            }
        }
        Ok(Produced {
            dataset,
            artifact_name,
            artifact,
            title: template.name,
        })
    }

    /// Executes a queued run and returns the finalized report. Never panics on
    /// run errors: they end up in the report's `error` field.
    pub async fn run(&self, request: RunRequest) -> Option<Report> {
        let started = Instant::now();
        let report = match self.archive.metadata(&request.report_id) {
            Ok(report) => report,
            Err(e) => {
                error!("cannot start report {}: {}", request.report_id, e);
                self.jobs.finish(&request.report_id, JobStatus::Failed(e.to_string())).await;
                return None;
            }
        };
        info!("report {} started (template '{}')", report.id, request.template_id);

        let mut outcomes = Vec::new();
        let completion = match self.produce(&request, &report, started, &mut outcomes).await {
            Ok(produced) => self.deliver(&request, &report, produced).await,
            Err(e) => {
                error!("report {} failed: {}", report.id, e);
                if let Err(discard) = self.archive.discard_artifact(&report.id) {
                    warn!("could not discard artifact of report {}: {}", report.id, discard);
                }
                let partial = Dataset {
                    slices: Default::default(),
                    outcomes,
                };
                Completion {
                    partial_sources: partial.partial_sources(),
                    source_outcomes: partial.outcomes,
                    ..Completion::failed(e.to_string())
                }
            }
        };

        let finalized = match self.archive.finalize(&report.id, &completion) {
            Ok(done) => done,
            Err(e) => {
                error!("could not finalize report {}: {}", report.id, e);
                self.jobs.finish(&report.id, JobStatus::Failed(e.to_string())).await;
                return None;
            }
        };
        self.record_fetches(&finalized.source_outcomes);

        let status = match finalized.status {
            ReportStatus::Failed => JobStatus::Failed(finalized.error.clone().unwrap_or_default()),
            other => JobStatus::Completed(other.as_str().to_string()),
        };
        self.jobs.finish(&finalized.id, status).await;
        info!(
            "report {} finished as {} in {:?}",
            finalized.id,
            finalized.status.as_str(),
            started.elapsed()
        );
        // Dropping the request releases the schedule lock.
        drop(request);
        Some(finalized)
    }

    async fn deliver(&self, request: &RunRequest, report: &Report, produced: Produced) -> Completion {
        let partial_sources = produced.dataset.partial_sources();
        let mut status = if partial_sources.is_empty() {
            ReportStatus::Success
        } else {
            ReportStatus::SuccessPartial
        };
        let mut error = None;

        if !request.recipients.is_empty() {
            self.progress(&report.id, "delivering", 95).await;
            let email = report_email(
                report,
                &produced.title,
                &partial_sources,
                &request.recipients,
                produced.artifact,
            );
            let outcome = self.dispatcher.deliver(&email).await;
            if let Err(e) = self.archive.record_delivery(&report.id, &outcome) {
                warn!("could not record delivery of report {}: {}", report.id, e);
            }
            if outcome.status == DeliveryStatus::Failed {
                status = ReportStatus::SuccessUndelivered;
                error = outcome.error;
            }
        }

        Completion {
            status,
            artifact_path: Some(produced.artifact_name),
            partial_sources,
            rows_processed: produced.dataset.rows(),
            source_outcomes: produced.dataset.outcomes,
            error,
        }
    }

    /// Stores each source's latest fetch result. A source feeding several
    /// slices gets one record: its worst outcome and its largest row count.
    fn record_fetches(&self, outcomes: &[SourceOutcome]) {
        let now = Utc::now();
        let mut records: Vec<(String, FetchRecord)> = Vec::new();
        for outcome in outcomes {
            match records.iter_mut().find(|(id, _)| *id == outcome.source_id) {
                Some((_, record)) => {
                    record.rows = record.rows.max(outcome.rows);
                    if severity(outcome.status) > severity(record.status) {
                        record.status = outcome.status;
                        record.error = outcome.error.clone();
                    }
                }
                None => records.push((
                    outcome.source_id.clone(),
                    FetchRecord {
                        at: now,
                        status: outcome.status,
                        rows: outcome.rows,
                        error: outcome.error.clone(),
                    },
                )),
            }
        }
        for (id, record) in records {
            if let Err(e) = self.sources.record_fetch(&id, &record) {
                warn!("could not record fetch of source '{}': {}", id, e);
            }
        }
    }

    /// Sends an already finalized successful report again. The report itself
    /// is not modified; the attempt is appended to its delivery log.
    pub async fn resend(&self, report_id: &str, recipients: &[String]) -> Result<Report, RunError> {
        let (report, artifact) = self.archive.get(report_id)?;
        let artifact = artifact.ok_or_else(|| RunError::Worker(format!("report '{}' has no artifact", report_id)))?;
        let template_name = self
            .templates
            .get(&report.template_id)
            .map_err(ArchiveError::from)?
            .map(|t| t.name)
            .unwrap_or_else(|| report.title.clone());
        let email = report_email(&report, &template_name, &report.partial_sources, recipients, artifact);
        let outcome = self.dispatcher.deliver(&email).await;
        self.archive.record_delivery(report_id, &outcome)?;
        Ok(self.archive.metadata(report_id)?)
    }
}

fn severity(status: FetchStatus) -> u8 {
    match status {
        FetchStatus::Success => 0,
        FetchStatus::Partial => 1,
        FetchStatus::Failed => 2,
    }
}

fn report_email(
    report: &Report,
    template_name: &str,
    partial_sources: &[String],
    recipients: &[String],
    artifact: Vec<u8>,
) -> Email {
    let mut body = format!(
        "{}\nGenerated {}.\n",
        report.title,
        report.generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    if !partial_sources.is_empty() {
        body.push_str(&format!("Some data was unavailable: {}.\n", partial_sources.join(", ")));
    }
    Email {
        recipients: recipients.to_vec(),
        subject: format!("{}: {}", template_name, report.title),
        body,
        attachment: Attachment {
            filename: format!("{}.pdf", report.id),
            content_type: "application/pdf".to_string(),
            content: artifact,
        },
    }
}
