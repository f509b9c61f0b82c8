use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What to do with slots that came due while the service was down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedSlotPolicy {
    /// Run every missed slot, oldest first, one at a time.
    CatchUp,
    /// Run only the most recent due slot and drop the older ones.
    Skip,
}

impl MissedSlotPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissedSlotPolicy::CatchUp => "catch_up",
            MissedSlotPolicy::Skip => "skip",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "catch_up" => Some(MissedSlotPolicy::CatchUp),
            "skip" => Some(MissedSlotPolicy::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: String,
    pub name: String,
    /// Five field cron expression evaluated in UTC.
    pub cron: String,
    pub template_id: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    pub enabled: bool,
    pub missed_policy: MissedSlotPolicy,
    /// Durable record of the latest claimed slot.
    pub last_fired: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Runtime state of a schedule as derived by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Idle,
    Due,
    Running,
}
