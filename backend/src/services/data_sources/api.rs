//! REST API connector.
//!
//! Issues a `GET` on `base_url + endpoint` with the configured query
//! parameters plus `from`/`to` for the time window, and expects a JSON array
//! of objects (either at the root, under `data`, or at `records_path`).

use super::{json_path, Connector, Fetched, TimeWindow};
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::SecondsFormat;
use common::model::table::Table;
use log::debug;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub struct ApiConnector {
    pub client: reqwest::Client,
    pub base_url: String,
    pub endpoint: String,
    pub params: BTreeMap<String, String>,
    pub records_path: Option<String>,
    pub token: Option<String>,
}

impl ApiConnector {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let builder = self.client.get(url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn records<'a>(&self, body: &'a Value) -> Result<&'a Vec<Value>, ConnectorError> {
        let target = match &self.records_path {
            Some(path) => json_path(body, path).ok_or_else(|| {
                ConnectorError::Malformed(format!("records path '{}' not found", path))
            })?,
            None => match body {
                Value::Object(obj) if obj.contains_key("data") => &obj["data"],
                other => other,
            },
        };
        target
            .as_array()
            .ok_or_else(|| ConnectorError::Malformed("expected an array of records".to_string()))
    }
}

/// Converts API records into rows. Non-object records are rejected.
pub(crate) fn records_to_table(records: &[Value]) -> Result<Table, ConnectorError> {
    let objects: Vec<Map<String, Value>> = records
        .iter()
        .map(|r| {
            r.as_object()
                .cloned()
                .ok_or_else(|| ConnectorError::Malformed("record is not an object".to_string()))
        })
        .collect::<Result<_, _>>()?;
    Ok(Table::from_records(&objects))
}

#[async_trait]
impl Connector for ApiConnector {
    async fn fetch(&self, window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        let mut query: Vec<(String, String)> = self
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        query.push((
            "from".to_string(),
            window.start.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));
        query.push((
            "to".to_string(),
            window.end.to_rfc3339_opts(SecondsFormat::Secs, true),
        ));

        let url = self.url(&self.endpoint);
        debug!("GET {} ({} params)", url, query.len());
        let body: Value = self
            .request(url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let table = records_to_table(self.records(&body)?)?;
        Ok(Fetched::complete(table))
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        let url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| ConnectorError::Config(format!("base_url: {}", e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConnectorError::Config(format!(
                "base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if !self.endpoint.starts_with('/') {
            return Err(ConnectorError::Config(
                "endpoint must start with '/'".to_string(),
            ));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        self.request(self.url("/health"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connector(records_path: Option<&str>) -> ApiConnector {
        ApiConnector {
            client: reqwest::Client::new(),
            base_url: "https://api.example.com/".to_string(),
            endpoint: "/data".to_string(),
            params: BTreeMap::new(),
            records_path: records_path.map(str::to_string),
            token: None,
        }
    }

    #[test]
    fn records_default_to_root_or_data_key() {
        let c = connector(None);
        let root = json!([{"a": 1}]);
        assert_eq!(c.records(&root).unwrap().len(), 1);
        let wrapped = json!({"data": [{"a": 1}, {"a": 2}]});
        assert_eq!(c.records(&wrapped).unwrap().len(), 2);
    }

    #[test]
    fn records_path_is_followed() {
        let c = connector(Some("result.items"));
        let body = json!({"result": {"items": [{"a": 1}]}});
        assert_eq!(c.records(&body).unwrap().len(), 1);
        assert!(matches!(
            c.records(&json!({"result": {}})),
            Err(ConnectorError::Malformed(_))
        ));
    }

    #[test]
    fn non_object_records_are_malformed() {
        assert!(matches!(
            records_to_table(&[json!(1)]),
            Err(ConnectorError::Malformed(_))
        ));
    }

    #[test]
    fn validate_rejects_bad_urls() {
        assert!(connector(None).validate_config().is_ok());
        let mut c = connector(None);
        c.base_url = "ftp://example.com".to_string();
        assert!(c.validate_config().is_err());
        let mut c = connector(None);
        c.endpoint = "data".to_string();
        assert!(c.validate_config().is_err());
    }
}
