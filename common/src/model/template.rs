use serde::{Deserialize, Serialize};

/// A report layout: named data slices fed by sources, and an ordered list of
/// sections bound to those slices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub slices: Vec<SliceSpec>,
    pub sections: Vec<SectionSpec>,
    /// Overrides the service-wide branding when present.
    #[serde(default)]
    pub branding: Option<Branding>,
}

impl Template {
    pub fn slice(&self, name: &str) -> Option<&SliceSpec> {
        self.slices.iter().find(|s| s.name == name)
    }

    /// A slice is required when at least one non-optional section reads it.
    pub fn is_slice_required(&self, name: &str) -> bool {
        self.sections.iter().any(|s| s.slice == name && !s.optional)
    }
}

/// One named slice of the dataset. Sources are listed in precedence order:
/// a later source wins over an earlier one when rows collide on `dedupe_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSpec {
    pub name: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub title: String,
    pub slice: String,
    #[serde(default)]
    pub optional: bool,
    pub directive: Directive,
    #[serde(default)]
    pub format: SectionFormat,
    /// Shown instead of the section body when an optional slice has no data.
    #[serde(default)]
    pub empty_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    Table {
        /// Columns to show, in order. Empty shows every column.
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        max_rows: Option<usize>,
        #[serde(default)]
        group_by: Option<GroupBy>,
    },
    Chart {
        label_column: String,
        value_column: String,
    },
    Text {
        body: String,
    },
    Metrics {
        metrics: Vec<MetricSpec>,
    },
}

/// Collapses rows sharing `key`, summing the `sum` columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupBy {
    pub key: String,
    pub sum: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub label: String,
    pub aggregate: Aggregate,
    /// Ignored for `Count`.
    #[serde(default)]
    pub column: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// Explicit per-section formatting. Nothing is inferred from the data or
/// from the host environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionFormat {
    /// Locale name understood by the number formatter, e.g. `en`, `de`, `fr`.
    pub locale: String,
    /// Digits after the decimal separator for non-integral numbers.
    pub precision: u8,
    /// Fixed UTC offset (`UTC`, `+02:00`, `-0500`) used to display timestamps.
    pub timezone: String,
    /// chrono `strftime` pattern for dates.
    pub date_format: String,
}

impl Default for SectionFormat {
    fn default() -> Self {
        Self {
            locale: "en".to_string(),
            precision: 2,
            timezone: "UTC".to_string(),
            date_format: "%Y-%m-%d".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branding {
    pub company_name: String,
    #[serde(default)]
    pub logo_path: Option<String>,
    /// Hex color such as `#3b82f6`.
    pub primary_color: String,
    #[serde(default)]
    pub font_family: Option<String>,
}
