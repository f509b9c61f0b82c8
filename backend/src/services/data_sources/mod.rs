//! Source connectors: one adapter per connector kind behind a common
//! capability set (`fetch`, `validate_config`, `health_check`).
//!
//! The kind tag on a source's configuration picks the implementation
//! through a [`ConnectorRegistry`]. In demo mode the registry hands out the
//! fixture connector for every source and no network is touched.
//!
//! Connectors hold no state between runs and only ever read from the
//! systems they wrap.

pub mod airtable;
pub mod api;
pub mod csv;
pub mod database;
pub mod demo;
pub mod spreadsheet;

use crate::config::Config;
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::model::source::{Source, SourceConfig};
use common::model::table::Table;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Half-open interval `[start, end)` of data a run reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` long window ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, days: i64) -> Self {
        Self {
            start: end - ChronoDuration::days(days),
            end,
        }
    }
}

/// Rows returned by a connector. `complete` is false when the connector
/// stopped early (page cap) and the rows are only a prefix of the data.
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub table: Table,
    pub complete: bool,
}

impl Fetched {
    pub fn complete(table: Table) -> Self {
        Self {
            table,
            complete: true,
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Reads the rows of the given window. Must not modify the source.
    async fn fetch(&self, window: &TimeWindow) -> Result<Fetched, ConnectorError>;

    /// Static checks on the configuration, without any I/O.
    fn validate_config(&self) -> Result<(), ConnectorError>;

    /// Checks that the source answers without fetching a window.
    async fn health_check(&self) -> Result<(), ConnectorError>;
}

/// Builds the connector for a source from its kind tag.
pub trait ConnectorRegistry: Send + Sync {
    fn connector(&self, source: &Source) -> Result<Arc<dyn Connector>, ConnectorError>;
}

/// Production registry: dispatches on `SourceConfig`'s variant.
pub struct KindRegistry {
    demo_mode: bool,
    data_dir: PathBuf,
    secrets: HashMap<String, String>,
    http: reqwest::Client,
}

impl KindRegistry {
    pub fn new(config: &Config) -> Result<Self, ConnectorError> {
        let http = reqwest::Client::builder()
            .timeout(config.run.source_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ConnectorError::Config(e.to_string()))?;
        Ok(Self {
            demo_mode: config.demo_mode,
            data_dir: config.data_dir.clone(),
            secrets: config.secrets.clone(),
            http,
        })
    }

    fn credential(&self, name: &Option<String>) -> Result<Option<String>, ConnectorError> {
        match name {
            None => Ok(None),
            Some(name) => self
                .secrets
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| ConnectorError::MissingCredential(name.clone())),
        }
    }
}

impl ConnectorRegistry for KindRegistry {
    fn connector(&self, source: &Source) -> Result<Arc<dyn Connector>, ConnectorError> {
        if self.demo_mode {
            return Ok(Arc::new(demo::DemoConnector::for_source(source)));
        }
        let connector: Arc<dyn Connector> = match &source.config {
            SourceConfig::Api {
                base_url,
                endpoint,
                params,
                records_path,
                credential,
            } => Arc::new(api::ApiConnector {
                client: self.http.clone(),
                base_url: base_url.clone(),
                endpoint: endpoint.clone(),
                params: params.clone(),
                records_path: records_path.clone(),
                token: self.credential(credential)?,
            }),
            SourceConfig::Database { path, query } => Arc::new(database::DatabaseConnector {
                path: PathBuf::from(path),
                query: query.clone(),
            }),
            SourceConfig::Spreadsheet {
                spreadsheet_id,
                range,
                credential,
            } => Arc::new(spreadsheet::SpreadsheetConnector {
                client: self.http.clone(),
                api_base: spreadsheet::SHEETS_API_BASE.to_string(),
                spreadsheet_id: spreadsheet_id.clone(),
                range: range.clone(),
                api_key: self.credential(credential)?,
            }),
            SourceConfig::Csv { file } => Arc::new(csv::connector::CsvConnector {
                data_dir: self.data_dir.clone(),
                file: file.clone(),
            }),
            SourceConfig::Airtable {
                base_id,
                table,
                view,
                credential,
            } => Arc::new(airtable::AirtableConnector {
                client: self.http.clone(),
                api_base: airtable::AIRTABLE_API_BASE.to_string(),
                base_id: base_id.clone(),
                table: table.clone(),
                view: view.clone(),
                token: self.credential(credential)?,
                max_pages: airtable::MAX_PAGES,
            }),
            SourceConfig::Demo { .. } => Arc::new(demo::DemoConnector::for_source(source)),
        };
        Ok(connector)
    }
}

/// Normalizes a raw text cell: trims, strips one layer of surrounding
/// quotes, and replaces non-breaking spaces.
pub fn normalize_cell(cell: &str) -> String {
    let s = cell.trim();
    let s = s
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s);
    s.replace('\u{00A0}', " ").trim().to_string()
}

/// Converts a text cell into a typed JSON value: empty cells become null,
/// integers and decimals become numbers, `true`/`false` become booleans.
pub fn typed_cell(raw: &str) -> Value {
    let cell = normalize_cell(raw);
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match cell.to_ascii_lowercase().as_str() {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(cell),
    }
}

/// Builds a table from a header row and text rows, typing every cell.
/// Short rows are padded with nulls, extra cells are dropped.
pub fn table_from_text_rows<I, R, S>(header: Vec<String>, rows: I) -> Table
where
    I: IntoIterator<Item = R>,
    R: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let width = header.len();
    let mut table = Table::new(header);
    for row in rows {
        let mut cells: Vec<Value> = row
            .into_iter()
            .take(width)
            .map(|c| typed_cell(c.as_ref()))
            .collect();
        cells.resize(width, Value::Null);
        table.rows.push(cells);
    }
    table
}

/// Follows a dot separated path (`data.items`) into a JSON document.
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .filter(|p| !p.is_empty())
        .try_fold(value, |current, key| current.get(key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn typed_cell_recognises_basic_types() {
        assert_eq!(typed_cell(" 42 "), json!(42));
        assert_eq!(typed_cell("3.5"), json!(3.5));
        assert_eq!(typed_cell("\"North\""), json!("North"));
        assert_eq!(typed_cell("TRUE"), json!(true));
        assert_eq!(typed_cell(""), Value::Null);
        assert_eq!(typed_cell("NaN"), json!("NaN"));
    }

    #[test]
    fn short_rows_are_padded() {
        let table = table_from_text_rows(
            vec!["a".to_string(), "b".to_string()],
            vec![vec!["1"], vec!["2", "x", "extra"]],
        );
        assert_eq!(table.rows[0], vec![json!(1), Value::Null]);
        assert_eq!(table.rows[1], vec![json!(2), json!("x")]);
    }

    #[test]
    fn json_path_walks_objects() {
        let doc = json!({"data": {"items": [1, 2]}});
        assert_eq!(json_path(&doc, "data.items"), Some(&json!([1, 2])));
        assert_eq!(json_path(&doc, ""), Some(&doc));
        assert_eq!(json_path(&doc, "data.missing"), None);
    }
}
