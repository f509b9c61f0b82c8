//! Output-format independent document produced by the renderer.
//!
//! Every cell and figure is already formatted text; exporters only lay it
//! out. A section whose optional data is missing carries a `Placeholder`
//! body instead of its directive's body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub company_name: String,
    pub generated_at: DateTime<Utc>,
    /// Human readable reporting period, e.g. `2024-02-26 to 2024-03-04`.
    pub period: String,
    pub sections: Vec<DocSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocSection {
    pub title: String,
    pub body: SectionBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SectionBody {
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        /// Rows cut by `max_rows`.
        omitted: usize,
    },
    Chart {
        series: String,
        points: Vec<ChartPoint>,
    },
    Text {
        paragraphs: Vec<String>,
    },
    Metrics {
        items: Vec<MetricItem>,
    },
    Placeholder {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
    pub display: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricItem {
    pub label: String,
    pub value: String,
}

impl Document {
    pub fn placeholders(&self) -> impl Iterator<Item = &DocSection> {
        self.sections
            .iter()
            .filter(|s| matches!(s.body, SectionBody::Placeholder { .. }))
    }
}
