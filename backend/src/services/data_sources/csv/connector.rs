//! CSV file connector. Files live under the data directory; the delimiter
//! is detected from the header line.

use super::super::{normalize_cell, table_from_text_rows, Connector, Fetched, TimeWindow};
use crate::error::ConnectorError;
use async_trait::async_trait;
use common::model::table::Table;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

pub struct CsvConnector {
    pub data_dir: PathBuf,
    pub file: String,
}

/// Picks the candidate delimiter that occurs most often in the header.
pub fn detect_delimiter(header_line: &str) -> u8 {
    [b',', b';', b'\t', b'|']
        .iter()
        .max_by_key(|&&d| header_line.matches(d as char).count())
        .copied()
        .unwrap_or(b',')
}

/// Reads a whole CSV file into a table. Blocking.
pub fn read_table(path: &Path) -> Result<Table, ConnectorError> {
    let mut header_line = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header_line)?;
    let delimiter = detect_delimiter(header_line.trim_end_matches(['\n', '\r']));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(normalize_cell).collect();
    if header.iter().all(|h| h.is_empty()) {
        return Err(ConnectorError::Malformed("CSV header is empty".to_string()));
    }
    let records = reader
        .records()
        .collect::<Result<Vec<csv::StringRecord>, _>>()?;
    Ok(table_from_text_rows(
        header,
        records.iter().map(|r| r.iter().collect::<Vec<_>>()),
    ))
}

impl CsvConnector {
    pub fn path(&self) -> PathBuf {
        self.data_dir.join(&self.file)
    }
}

#[async_trait]
impl Connector for CsvConnector {
    async fn fetch(&self, _window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        self.validate_config()?;
        let path = self.path();
        let table = tokio::task::spawn_blocking(move || read_table(&path))
            .await
            .map_err(|e| ConnectorError::Malformed(format!("csv task failed: {}", e)))??;
        Ok(Fetched::complete(table))
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        let relative = Path::new(&self.file);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if self.file.trim().is_empty() || escapes {
            return Err(ConnectorError::Config(format!(
                "csv file must be a relative path inside the data directory, got '{}'",
                self.file
            )));
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        self.validate_config()?;
        let mut header = String::new();
        BufReader::new(File::open(self.path())?).read_line(&mut header)?;
        if header.trim().is_empty() {
            return Err(ConnectorError::Malformed("CSV header is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::fs;

    #[test]
    fn delimiter_detection() {
        assert_eq!(detect_delimiter("a;b;c"), b';');
        assert_eq!(detect_delimiter("a,b"), b',');
        assert_eq!(detect_delimiter("a\tb\tc"), b'\t');
        assert_eq!(detect_delimiter("single"), b',');
    }

    #[tokio::test]
    async fn reads_semicolon_file_with_types() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("sales.csv"),
            "region;revenue;note\nNorth;10.5;\"first\"\nSouth;7\n",
        )
        .unwrap();
        let connector = CsvConnector {
            data_dir: dir.path().to_path_buf(),
            file: "sales.csv".to_string(),
        };
        let fetched = connector
            .fetch(&TimeWindow::ending_at(Utc::now(), 7))
            .await
            .unwrap();
        assert_eq!(fetched.table.columns, vec!["region", "revenue", "note"]);
        assert_eq!(fetched.table.rows[0], vec![json!("North"), json!(10.5), json!("first")]);
        assert_eq!(fetched.table.rows[1][2], serde_json::Value::Null);
    }

    #[test]
    fn paths_outside_data_dir_are_rejected() {
        let connector = CsvConnector {
            data_dir: PathBuf::from("data"),
            file: "../secrets.csv".to_string(),
        };
        assert!(connector.validate_config().is_err());
        let connector = CsvConnector {
            data_dir: PathBuf::from("data"),
            file: "/etc/passwd".to_string(),
        };
        assert!(connector.validate_config().is_err());
    }
}
