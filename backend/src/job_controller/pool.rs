//! Bounded run queue and the worker tasks draining it.
//!
//! Every report run, scheduled or manual, goes through one [`RunQueue`].
//! `WORKER_COUNT` workers share the receiving end, so at most that many runs
//! execute at once and a burst of triggers waits in the queue instead of
//! piling up tasks.

use super::locks::ScheduleGuard;
use crate::services::data_sources::TimeWindow;
use log::{debug, info};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// One queued run. The report row already exists in `pending` state.
#[derive(Debug)]
pub struct RunRequest {
    pub report_id: String,
    pub template_id: String,
    pub window: TimeWindow,
    pub recipients: Vec<String>,
    /// Held for scheduled runs and manual runs of a schedule; released when
    /// the request is dropped at the end of the run.
    pub guard: Option<ScheduleGuard>,
}

#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<RunRequest>,
}

impl RunQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RunRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (RunQueue { tx }, rx)
    }

    /// Waits for queue space. Gives the request back if the workers are gone.
    pub async fn enqueue(&self, request: RunRequest) -> Result<(), RunRequest> {
        self.tx.send(request).await.map_err(|e| e.0)
    }
}

/// Spawns `count` workers that call `handler` for each request, one request
/// per worker at a time. Workers exit once every queue handle is dropped.
pub fn start_workers<F, Fut>(count: usize, rx: mpsc::Receiver<RunRequest>, handler: F) -> Vec<JoinHandle<()>>
where
    F: Fn(RunRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let rx = Arc::new(Mutex::new(rx));
    let handler = Arc::new(handler);
    (0..count.max(1))
        .map(|worker| {
            let rx = rx.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    // The lock is only held while waiting for the next request.
                    let next = rx.lock().await.recv().await;
                    let Some(request) = next else { break };
                    debug!("worker {} picked up report {}", worker, request.report_id);
                    handler(request).await;
                }
                info!("worker {} stopped", worker);
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn request(id: usize) -> RunRequest {
        RunRequest {
            report_id: format!("r{}", id),
            template_id: "weekly_summary".into(),
            window: TimeWindow::ending_at(Utc::now(), 7),
            recipients: Vec::new(),
            guard: None,
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_worker_count() {
        let (queue, rx) = RunQueue::new(16);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        let (r, p, d) = (running.clone(), peak.clone(), done.clone());
        let workers = start_workers(2, rx, move |_req| {
            let (r, p, d) = (r.clone(), p.clone(), d.clone());
            async move {
                let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                r.fetch_sub(1, Ordering::SeqCst);
                d.fetch_add(1, Ordering::SeqCst);
            }
        });

        for i in 0..6 {
            queue.enqueue(request(i)).await.unwrap();
        }
        drop(queue);
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}
