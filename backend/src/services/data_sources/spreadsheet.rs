//! Google Sheets connector (values API, API key authentication).
//!
//! The first row of the range is the header; remaining rows are data.

use super::{table_from_text_rows, Connector, Fetched, TimeWindow};
use crate::error::ConnectorError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

pub const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

pub struct SpreadsheetConnector {
    pub client: reqwest::Client,
    pub api_base: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub api_key: Option<String>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl SpreadsheetConnector {
    fn values_url(&self) -> String {
        format!(
            "{}/{}/values/{}",
            self.api_base.trim_end_matches('/'),
            self.spreadsheet_id,
            self.range
        )
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.api_key {
            Some(key) => builder.query(&[("key", key.as_str())]),
            None => builder,
        }
    }
}

#[async_trait]
impl Connector for SpreadsheetConnector {
    async fn fetch(&self, _window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        let range: ValueRange = self
            .request(self.values_url())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut rows = range.values.into_iter();
        let header: Vec<String> = match rows.next() {
            Some(header) => header.iter().map(cell_text).collect(),
            None => return Ok(Fetched::complete(Default::default())),
        };
        let text_rows = rows.map(|row| row.iter().map(cell_text).collect::<Vec<_>>());
        Ok(Fetched::complete(table_from_text_rows(header, text_rows)))
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        if self.spreadsheet_id.trim().is_empty() {
            return Err(ConnectorError::Config("spreadsheet_id is empty".to_string()));
        }
        if self.range.trim().is_empty() {
            return Err(ConnectorError::Config("range is empty".to_string()));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        let url = format!(
            "{}/{}",
            self.api_base.trim_end_matches('/'),
            self.spreadsheet_id
        );
        self.request(url)
            .query(&[("fields", "spreadsheetId")])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
