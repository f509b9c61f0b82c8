use crate::model::source::{FetchStatus, SourceOutcome};
use crate::model::table::Table;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Merged data of one run: a table per slice plus the outcome of every
/// source fetch. A slice whose sources all failed is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub slices: BTreeMap<String, Table>,
    pub outcomes: Vec<SourceOutcome>,
}

impl Dataset {
    pub fn slice(&self, name: &str) -> Option<&Table> {
        self.slices.get(name)
    }

    /// Sources that failed or returned truncated data, in first-seen order.
    pub fn partial_sources(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for outcome in &self.outcomes {
            if outcome.status != FetchStatus::Success && !ids.contains(&outcome.source_id) {
                ids.push(outcome.source_id.clone());
            }
        }
        ids
    }

    /// Total rows across the merged slices.
    pub fn rows(&self) -> usize {
        self.slices.values().map(Table::len).sum()
    }
}
