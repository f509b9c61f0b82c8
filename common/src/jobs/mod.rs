use serde::{Deserialize, Serialize};

/// Progress of a background job as seen by pollers.
///
/// Report runs are tracked under their report id, CSV verification jobs
/// under a generated job id.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    /// Current stage name and completion percentage (0..=100).
    InProgress { stage: String, percent: u32 },
    Completed(String),
    Failed(String),
}

impl JobStatus {
    pub fn in_progress(stage: &str, percent: u32) -> Self {
        JobStatus::InProgress {
            stage: stage.to_string(),
            percent: percent.min(100),
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed(_) | JobStatus::Failed(_))
    }
}
