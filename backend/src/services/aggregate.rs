//! Data aggregation: fetches every source a template reads, concurrently,
//! and merges the results into one dataset per run.
//!
//! Fetches share a semaphore (`MAX_PARALLEL_FETCHES`), each runs under the
//! per-source timeout, and the whole fan-out runs under the run deadline.
//! When the deadline passes, the cancellation token is triggered and every
//! in-flight fetch stops at its next await point before the error is
//! returned.

use crate::config::RunSettings;
use crate::error::{AggregationError, ConnectorError};
use crate::services::data_sources::{ConnectorRegistry, Fetched, TimeWindow};
use common::model::dataset::Dataset;
use common::model::source::{FetchStatus, Source, SourceOutcome};
use common::model::table::Table;
use common::model::template::Template;
use futures_util::future::join_all;
use log::{info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

pub struct Aggregator {
    registry: Arc<dyn ConnectorRegistry>,
    source_timeout: Duration,
    max_parallel: usize,
}

impl Aggregator {
    pub fn new(registry: Arc<dyn ConnectorRegistry>, settings: &RunSettings) -> Self {
        Self {
            registry,
            source_timeout: settings.source_timeout,
            max_parallel: settings.max_parallel_fetches.max(1),
        }
    }

    async fn fetch_one(
        &self,
        source: &Source,
        window: &TimeWindow,
        permits: &Semaphore,
        cancel: &CancellationToken,
    ) -> Result<Fetched, ConnectorError> {
        let _permit = tokio::select! {
            _ = cancel.cancelled() => return Err(ConnectorError::Cancelled),
            permit = permits.acquire() => permit.map_err(|_| ConnectorError::Cancelled)?,
        };
        let connector = self.registry.connector(source)?;
        connector.validate_config()?;
        tokio::select! {
            _ = cancel.cancelled() => Err(ConnectorError::Cancelled),
            fetched = tokio::time::timeout(self.source_timeout, connector.fetch(window)) => {
                fetched.map_err(|_| ConnectorError::Timeout(self.source_timeout))?
            }
        }
    }

    /// Fetches and merges the template's slices. `sources` must hold every
    /// source the template references.
    pub async fn aggregate(
        &self,
        template: &Template,
        sources: &HashMap<String, Source>,
        window: &TimeWindow,
        deadline: Duration,
    ) -> Result<Dataset, AggregationError> {
        let mut order: Vec<&Source> = Vec::new();
        for slice in &template.slices {
            for id in &slice.sources {
                let source = sources.get(id).ok_or_else(|| AggregationError::UnknownSource {
                    slice: slice.name.clone(),
                    source_id: id.clone(),
                })?;
                if !order.iter().any(|s| s.id == source.id) {
                    order.push(source);
                }
            }
        }

        let permits = Semaphore::new(self.max_parallel);
        let cancel = CancellationToken::new();
        let fetches = join_all(
            order
                .iter()
                .map(|source| self.fetch_one(source, window, &permits, &cancel)),
        );
        tokio::pin!(fetches);

        let results = tokio::select! {
            results = &mut fetches => results,
            _ = tokio::time::sleep(deadline) => {
                cancel.cancel();
                fetches.await;
                return Err(AggregationError::DeadlineExceeded(deadline));
            }
        };

        let fetched: HashMap<&str, Result<Fetched, ConnectorError>> = order
            .iter()
            .map(|s| s.id.as_str())
            .zip(results)
            .collect();

        let mut dataset = Dataset::default();
        // The first failure of a required slice; outcomes keep being collected.
        let mut required_failure: Option<(String, String, String)> = None;
        for slice in &template.slices {
            let required = template.is_slice_required(&slice.name);
            let mut tables: Vec<&Table> = Vec::new();
            for id in &slice.sources {
                let outcome = match fetched.get(id.as_str()) {
                    Some(Ok(f)) => {
                        tables.push(&f.table);
                        SourceOutcome {
                            source_id: id.clone(),
                            slice: slice.name.clone(),
                            status: if f.complete {
                                FetchStatus::Success
                            } else {
                                FetchStatus::Partial
                            },
                            rows: f.table.len(),
                            error: None,
                        }
                    }
                    Some(Err(e)) => {
                        if required {
                            warn!("required source '{}' failed for slice '{}': {}", id, slice.name, e);
                            required_failure.get_or_insert_with(|| (slice.name.clone(), id.clone(), e.to_string()));
                        } else {
                            warn!("optional source '{}' failed for slice '{}': {}", id, slice.name, e);
                        }
                        SourceOutcome {
                            source_id: id.clone(),
                            slice: slice.name.clone(),
                            status: FetchStatus::Failed,
                            rows: 0,
                            error: Some(e.to_string()),
                        }
                    }
                    None => continue,
                };
                dataset.outcomes.push(outcome);
            }
            if !tables.is_empty() && required_failure.is_none() {
                let merged = merge(&tables, slice.dedupe_key.as_deref());
                info!("slice '{}': {} rows from {} source(s)", slice.name, merged.len(), tables.len());
                dataset.slices.insert(slice.name.clone(), merged);
            }
        }
        if let Some((slice, source_id, cause)) = required_failure {
            return Err(AggregationError::RequiredSource {
                slice,
                source_id,
                cause,
                outcomes: dataset.outcomes,
            });
        }
        Ok(dataset)
    }
}

fn key_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Concatenates tables over the union of their columns, in the given order.
///
/// With a dedupe key, a row whose key was already seen overwrites the
/// earlier row in place: the earlier row keeps its position and takes the
/// later row's values for every column the later table has. Rows with a
/// null or missing key are never deduplicated.
pub fn merge(tables: &[&Table], dedupe_key: Option<&str>) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for table in tables {
        for column in &table.columns {
            if !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }
    let key_idx = dedupe_key.and_then(|k| columns.iter().position(|c| c == k));

    let mut merged = Table::new(columns);
    let mut seen: HashMap<String, usize> = HashMap::new();
    for table in tables {
        let mapping: Vec<usize> = table
            .columns
            .iter()
            .map(|c| merged.column_index(c).unwrap_or_default())
            .collect();
        for row in &table.rows {
            let mut cells = vec![Value::Null; merged.columns.len()];
            for (cell, &idx) in row.iter().zip(&mapping) {
                cells[idx] = cell.clone();
            }
            let key = key_idx.and_then(|k| key_of(&cells[k]));
            match key.as_ref().and_then(|k| seen.get(k)) {
                Some(&position) => {
                    let target = &mut merged.rows[position];
                    for (cell, &idx) in row.iter().zip(&mapping) {
                        target[idx] = cell.clone();
                    }
                }
                None => {
                    if let Some(key) = key {
                        seen.insert(key, merged.rows.len());
                    }
                    merged.rows.push(cells);
                }
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::data_sources::Connector;
    use async_trait::async_trait;
    use chrono::Utc;
    use common::model::source::SourceConfig;
    use common::model::template::{Directive, SectionFormat, SectionSpec, SliceSpec};
    use serde_json::json;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
        Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    #[test]
    fn later_source_wins_at_first_position() {
        let a = table(
            &["id", "amount", "region"],
            vec![
                vec![json!(1), json!(10), json!("North")],
                vec![json!(2), json!(20), json!("South")],
            ],
        );
        let b = table(
            &["id", "amount", "rep"],
            vec![
                vec![json!(2), json!(25), json!("Rep 3")],
                vec![json!(3), json!(30), json!("Rep 1")],
            ],
        );
        let merged = merge(&[&a, &b], Some("id"));
        assert_eq!(merged.columns, vec!["id", "amount", "region", "rep"]);
        assert_eq!(
            merged.rows,
            vec![
                vec![json!(1), json!(10), json!("North"), Value::Null],
                vec![json!(2), json!(25), json!("South"), json!("Rep 3")],
                vec![json!(3), json!(30), Value::Null, json!("Rep 1")],
            ]
        );
    }

    #[test]
    fn without_key_rows_are_concatenated() {
        let a = table(&["id"], vec![vec![json!(1)]]);
        let b = table(&["id"], vec![vec![json!(1)]]);
        assert_eq!(merge(&[&a, &b], None).len(), 2);
        let nulls = table(&["id"], vec![vec![Value::Null], vec![Value::Null]]);
        assert_eq!(merge(&[&nulls], Some("id")).len(), 2);
    }

    enum Behaviour {
        Rows(usize),
        Fail,
        Hang,
    }

    struct FakeConnector(Behaviour);

    #[async_trait]
    impl Connector for FakeConnector {
        async fn fetch(&self, _window: &TimeWindow) -> Result<Fetched, ConnectorError> {
            match self.0 {
                Behaviour::Rows(n) => Ok(Fetched::complete(table(
                    &["n"],
                    (0..n).map(|i| vec![json!(i)]).collect(),
                ))),
                Behaviour::Fail => Err(ConnectorError::Network("connection refused".into())),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    unreachable!()
                }
            }
        }

        fn validate_config(&self) -> Result<(), ConnectorError> {
            Ok(())
        }

        async fn health_check(&self) -> Result<(), ConnectorError> {
            Ok(())
        }
    }

    struct FakeRegistry;

    impl ConnectorRegistry for FakeRegistry {
        fn connector(&self, source: &Source) -> Result<Arc<dyn crate::services::data_sources::Connector>, ConnectorError> {
            let behaviour = match source.id.as_str() {
                "slow" => Behaviour::Hang,
                "broken" => Behaviour::Fail,
                _ => Behaviour::Rows(10),
            };
            Ok(Arc::new(FakeConnector(behaviour)))
        }
    }

    fn sources(ids: &[&str]) -> HashMap<String, Source> {
        ids.iter()
            .map(|id| {
                (
                    id.to_string(),
                    Source {
                        id: id.to_string(),
                        name: id.to_string(),
                        config: SourceConfig::Demo {
                            dataset: "sales".into(),
                        },
                        last_fetch: None,
                    },
                )
            })
            .collect()
    }

    fn template(optional_source: &str, optional: bool) -> Template {
        let section = |slice: &str, optional: bool| SectionSpec {
            title: slice.to_string(),
            slice: slice.to_string(),
            optional,
            directive: Directive::Text {
                body: "{{count}} rows".into(),
            },
            format: SectionFormat::default(),
            empty_message: None,
        };
        Template {
            id: "t".into(),
            name: "t".into(),
            description: String::new(),
            slices: vec![
                SliceSpec {
                    name: "main".into(),
                    sources: vec!["a".into()],
                    dedupe_key: None,
                },
                SliceSpec {
                    name: "extra".into(),
                    sources: vec![optional_source.into()],
                    dedupe_key: None,
                },
            ],
            sections: vec![section("main", false), section("extra", optional)],
            branding: None,
        }
    }

    fn aggregator(timeout: Duration) -> Aggregator {
        Aggregator {
            registry: Arc::new(FakeRegistry),
            source_timeout: timeout,
            max_parallel: 2,
        }
    }

    #[tokio::test]
    async fn optional_timeout_is_absorbed() {
        let window = TimeWindow::ending_at(Utc::now(), 7);
        let dataset = aggregator(Duration::from_millis(50))
            .aggregate(
                &template("slow", true),
                &sources(&["a", "slow"]),
                &window,
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(dataset.slice("main").unwrap().len(), 10);
        assert!(dataset.slice("extra").is_none());
        assert_eq!(dataset.partial_sources(), vec!["slow"]);
        let failed = dataset.outcomes.iter().find(|o| o.source_id == "slow").unwrap();
        assert!(failed.error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn required_failure_is_an_aggregation_error() {
        let window = TimeWindow::ending_at(Utc::now(), 7);
        let err = aggregator(Duration::from_secs(1))
            .aggregate(
                &template("broken", false),
                &sources(&["a", "broken"]),
                &window,
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        let (source_id, outcomes) = match err {
            AggregationError::RequiredSource { source_id, outcomes, .. } => (source_id, outcomes),
            other => panic!("expected a required source failure, got {other:?}"),
        };
        assert_eq!(source_id, "broken");
        // The healthy source's outcome survives the failure.
        assert_eq!(outcomes.len(), 2);
        let broken = outcomes.iter().find(|o| o.source_id == "broken").unwrap();
        assert_eq!(broken.status, FetchStatus::Failed);
        assert!(broken.error.is_some());
        assert!(outcomes.iter().any(|o| o.source_id == "a" && o.status == FetchStatus::Success));
    }

    #[tokio::test]
    async fn run_deadline_cancels_fetches() {
        let window = TimeWindow::ending_at(Utc::now(), 7);
        let started = std::time::Instant::now();
        let err = aggregator(Duration::from_secs(3600))
            .aggregate(
                &template("slow", true),
                &sources(&["a", "slow"]),
                &window,
                Duration::from_millis(50),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::DeadlineExceeded(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn unknown_source_is_rejected() {
        let window = TimeWindow::ending_at(Utc::now(), 7);
        let err = aggregator(Duration::from_secs(1))
            .aggregate(&template("ghost", true), &sources(&["a"]), &window, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::UnknownSource { .. }));
    }
}
