//! Relational source backed by a SQLite database file.
//!
//! The configured query runs on a read-only connection. Named parameters
//! `:start` and `:end` are bound to the run's time window (RFC 3339) when the
//! query declares them.

use super::{Connector, Fetched, TimeWindow};
use crate::db::ts;
use crate::error::ConnectorError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::model::table::Table;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::path::PathBuf;

pub struct DatabaseConnector {
    pub path: PathBuf,
    pub query: String,
}

impl DatabaseConnector {
    fn open(&self) -> Result<Connection, ConnectorError> {
        Ok(Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?)
    }
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(BASE64.encode(b)),
    }
}

/// Runs `query` and collects every row. Blocking.
pub(crate) fn run_query(
    conn: &Connection,
    query: &str,
    window: &TimeWindow,
) -> Result<Table, ConnectorError> {
    let mut stmt = conn.prepare(query)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let start = ts(&window.start);
    let end = ts(&window.end);
    if let Some(idx) = stmt.parameter_index(":start")? {
        stmt.raw_bind_parameter(idx, &start)?;
    }
    if let Some(idx) = stmt.parameter_index(":end")? {
        stmt.raw_bind_parameter(idx, &end)?;
    }

    let width = columns.len();
    let mut table = Table::new(columns);
    let mut rows = stmt.raw_query();
    while let Some(row) = rows.next()? {
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(to_json(row.get_ref(i)?));
        }
        table.rows.push(cells);
    }
    Ok(table)
}

#[async_trait]
impl Connector for DatabaseConnector {
    async fn fetch(&self, window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        let conn = self.open()?;
        let query = self.query.clone();
        let window = *window;
        let table = tokio::task::spawn_blocking(move || run_query(&conn, &query, &window))
            .await
            .map_err(|e| ConnectorError::Network(format!("query task failed: {}", e)))??;
        Ok(Fetched::complete(table))
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        let head = self
            .query
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_ascii_uppercase();
        if head != "SELECT" && head != "WITH" {
            return Err(ConnectorError::Config(
                "query must be a SELECT statement".to_string(),
            ));
        }
        if self.path.as_os_str().is_empty() {
            return Err(ConnectorError::Config("database path is empty".to_string()));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        let conn = self.open()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}
