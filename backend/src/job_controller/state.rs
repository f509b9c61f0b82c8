//! Progress tracking for work running outside the request/response cycle:
//! report runs (keyed by report id) and CSV verification jobs (keyed by a
//! generated job id).
//!
//! Producers never write the map directly. They push a `JobUpdate` on the
//! channel and `start_job_updater` applies it, so a slow poller holding a
//! read lock never stalls a worker.

use common::jobs::JobStatus;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{mpsc, RwLock};

/// Shared job table plus the sender producers report through. Clone is cheap.
#[derive(Clone)]
pub struct JobsState {
    /// Job id to last reported status. Read by the status/progress endpoints.
    pub jobs: Arc<RwLock<HashMap<String, JobStatus>>>,
    pub tx: mpsc::Sender<JobUpdate>,
}

#[derive(Debug)]
pub struct JobUpdate {
    pub(crate) job_id: String,
    pub(crate) status: JobStatus,
}

impl JobsState {
    /// Creates the state and the receiver to hand to `start_job_updater`.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<JobUpdate>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            JobsState {
                jobs: Arc::new(RwLock::new(HashMap::new())),
                tx,
            },
            rx,
        )
    }

    /// Registers a job as pending, synchronously visible to pollers.
    pub async fn register(&self, job_id: &str) {
        self.jobs
            .write()
            .await
            .insert(job_id.to_string(), JobStatus::Pending);
    }

    /// Queues a status change. Updates are dropped if the updater is gone.
    pub async fn publish(&self, job_id: &str, status: JobStatus) {
        let _ = self
            .tx
            .send(JobUpdate {
                job_id: job_id.to_string(),
                status,
            })
            .await;
    }

    /// Same as `publish`, for callers on the blocking pool.
    pub fn publish_blocking(&self, job_id: &str, status: JobStatus) {
        let _ = self.tx.blocking_send(JobUpdate {
            job_id: job_id.to_string(),
            status,
        });
    }

    /// Writes a final status directly, bypassing the channel so that it
    /// cannot be overtaken by an earlier queued progress update.
    pub async fn finish(&self, job_id: &str, status: JobStatus) {
        self.jobs.write().await.insert(job_id.to_string(), status);
    }

    pub async fn get(&self, job_id: &str) -> Option<JobStatus> {
        self.jobs.read().await.get(job_id).cloned()
    }
}

/// Applies queued updates until every sender is dropped. A finished job is
/// never moved back to an in-progress state by a late update.
pub async fn start_job_updater(state: JobsState, mut rx: mpsc::Receiver<JobUpdate>) {
    while let Some(update) = rx.recv().await {
        let mut jobs = state.jobs.write().await;
        let finished = jobs
            .get(&update.job_id)
            .map(JobStatus::is_finished)
            .unwrap_or(false);
        if !finished {
            jobs.insert(update.job_id, update.status);
        }
    }
}
