use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind tag used to pick the connector implementation for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Api,
    Database,
    Spreadsheet,
    Csv,
    Airtable,
    Demo,
}

impl ConnectorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::Api => "api",
            ConnectorKind::Database => "database",
            ConnectorKind::Spreadsheet => "spreadsheet",
            ConnectorKind::Csv => "csv",
            ConnectorKind::Airtable => "airtable",
            ConnectorKind::Demo => "demo",
        }
    }
}

/// Connection settings, one variant per connector kind.
///
/// `credential` fields name a secret supplied through the environment
/// (`REPORTGEN_SECRET_<NAME>`); the secret itself is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Api {
        base_url: String,
        #[serde(default = "default_endpoint")]
        endpoint: String,
        #[serde(default)]
        params: BTreeMap<String, String>,
        /// Dot separated path to the array of records inside the response body.
        #[serde(default)]
        records_path: Option<String>,
        #[serde(default)]
        credential: Option<String>,
    },
    Database {
        path: String,
        query: String,
    },
    Spreadsheet {
        spreadsheet_id: String,
        range: String,
        #[serde(default)]
        credential: Option<String>,
    },
    Csv {
        file: String,
    },
    Airtable {
        base_id: String,
        table: String,
        #[serde(default)]
        view: Option<String>,
        #[serde(default)]
        credential: Option<String>,
    },
    Demo {
        dataset: String,
    },
}

fn default_endpoint() -> String {
    "/data".to_string()
}

impl SourceConfig {
    pub fn kind(&self) -> ConnectorKind {
        match self {
            SourceConfig::Api { .. } => ConnectorKind::Api,
            SourceConfig::Database { .. } => ConnectorKind::Database,
            SourceConfig::Spreadsheet { .. } => ConnectorKind::Spreadsheet,
            SourceConfig::Csv { .. } => ConnectorKind::Csv,
            SourceConfig::Airtable { .. } => ConnectorKind::Airtable,
            SourceConfig::Demo { .. } => ConnectorKind::Demo,
        }
    }
}

/// Outcome class of fetching one source during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    /// Rows were returned but the connector stopped before the end.
    Partial,
    Failed,
}

/// Last fetch result recorded on a source after a run completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub at: DateTime<Utc>,
    pub status: FetchStatus,
    pub rows: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub config: SourceConfig,
    #[serde(default)]
    pub last_fetch: Option<FetchRecord>,
}

impl Source {
    pub fn kind(&self) -> ConnectorKind {
        self.config.kind()
    }
}

/// Per-source record attached to a dataset and, later, to the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub slice: String,
    pub status: FetchStatus,
    pub rows: usize,
    pub error: Option<String>,
}
