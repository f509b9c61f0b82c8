//! Airtable connector. Follows the `offset` cursor page by page, up to
//! `max_pages`; hitting the cap yields a partial fetch.

use super::{Connector, Fetched, TimeWindow};
use crate::error::ConnectorError;
use async_trait::async_trait;
use common::model::table::Table;
use serde::Deserialize;
use serde_json::{Map, Value};

pub const AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";
pub const MAX_PAGES: usize = 50;

pub struct AirtableConnector {
    pub client: reqwest::Client,
    pub api_base: String,
    pub base_id: String,
    pub table: String,
    pub view: Option<String>,
    pub token: Option<String>,
    pub max_pages: usize,
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<Record>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Deserialize)]
struct Record {
    #[serde(default)]
    fields: Map<String, Value>,
}

impl AirtableConnector {
    fn table_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.base_id,
            self.table
        )
    }

    async fn page(&self, offset: Option<&str>) -> Result<Page, ConnectorError> {
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(view) = &self.view {
            query.push(("view", view.as_str()));
        }
        if let Some(offset) = offset {
            query.push(("offset", offset));
        }
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ConnectorError::MissingCredential("airtable token".to_string()))?;
        Ok(self
            .client
            .get(self.table_url())
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl Connector for AirtableConnector {
    async fn fetch(&self, _window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        let mut fields: Vec<Map<String, Value>> = Vec::new();
        let mut offset: Option<String> = None;
        let mut complete = false;

        for _ in 0..self.max_pages {
            let page = self.page(offset.as_deref()).await?;
            fields.extend(page.records.into_iter().map(|r| r.fields));
            match page.offset {
                Some(next) => offset = Some(next),
                None => {
                    complete = true;
                    break;
                }
            }
        }

        Ok(Fetched {
            table: Table::from_records(&fields),
            complete,
        })
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        if self.base_id.trim().is_empty() || self.table.trim().is_empty() {
            return Err(ConnectorError::Config(
                "base_id and table are required".to_string(),
            ));
        }
        if self.token.is_none() {
            return Err(ConnectorError::Config(
                "an Airtable credential is required".to_string(),
            ));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        self.page(None).await.map(|_| ())
    }
}
