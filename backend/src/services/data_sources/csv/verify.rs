use super::connector::{detect_delimiter, CsvConnector};
use crate::job_controller::state::JobsState;
use crate::services::data_sources::{normalize_cell, Connector};
use crate::services::response;
use crate::state::AppState;
use actix_web::{web, Responder};
use chrono::{DateTime, NaiveDate};
use common::jobs::JobStatus;
use common::model::csv::{ColumnCheck, ColumnType};
use common::model::source::SourceConfig;
use common::requests::CsvSourceRequest;
use log::info;
use rayon::prelude::*;
use serde_json::json;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;

const CHUNK_SIZE: usize = 250_000;
const CURRENCY_SYMBOLS: [char; 4] = ['$', '€', '£', '¥'];

fn looks_like_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(value).is_ok()
}

fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = value
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.parse::<f64>().ok()
}

/// Empty cells are accepted for every type.
fn validate_value(column_type: ColumnType, value: &str) -> bool {
    let value = normalize_cell(value);
    if value.is_empty() {
        return true;
    }
    match column_type {
        ColumnType::Text => true,
        ColumnType::Number => value.parse::<f64>().is_ok(),
        ColumnType::Currency => parse_amount(&value).is_some(),
        ColumnType::Email => value.contains('@') && value.contains('.'),
        ColumnType::Date => looks_like_date(&value),
    }
}

/// Guesses a type per column from the first data row.
pub fn infer_column_checks(titles: &[String], first_row: &[String]) -> Vec<ColumnCheck> {
    titles
        .iter()
        .enumerate()
        .map(|(idx, title)| {
            let sample = first_row.get(idx).map(|c| normalize_cell(c));
            let column_type = match sample.as_deref() {
                Some(v) if v.contains('@') && v.contains('.') => ColumnType::Email,
                Some(v) if v.chars().any(|ch| CURRENCY_SYMBOLS.contains(&ch)) => ColumnType::Currency,
                Some(v) if !v.is_empty() && v.parse::<f64>().is_ok() => ColumnType::Number,
                Some(v) if looks_like_date(v) => ColumnType::Date,
                _ => ColumnType::Text,
            };
            ColumnCheck {
                title: title.clone(),
                column_type,
                first_row: sample.filter(|s| !s.is_empty()),
            }
        })
        .collect()
}

/// Returns the 1-based file line and column title of the first bad cell in the chunk.
fn find_first_invalid(chunk: &[(usize, csv::StringRecord)], columns: &[ColumnCheck]) -> Option<(usize, String)> {
    chunk
        .par_iter()
        .filter_map(|(idx, record)| {
            columns.iter().enumerate().find_map(|(col_idx, col)| {
                let valid = record
                    .get(col_idx)
                    .map(|cell| validate_value(col.column_type, cell))
                    .unwrap_or(true);
                (!valid).then(|| (idx + 3, col.title.clone())) // header + first data row
            })
        })
        .min_by_key(|(row, _)| *row)
}

/// Checks the whole file and returns the inferred columns.
fn verify_csv_blocking(jobs: &JobsState, job_id: &str, path: &Path) -> Result<Vec<ColumnCheck>, String> {
    let start = Instant::now();
    let total_bytes = std::fs::metadata(path).map_err(|e| e.to_string())?.len().max(1);

    let mut header_line = String::new();
    BufReader::new(File::open(path).map_err(|e| e.to_string())?)
        .read_line(&mut header_line)
        .map_err(|e| e.to_string())?;
    let delimiter = detect_delimiter(header_line.trim_end_matches(['\n', '\r']));

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .map_err(|e| e.to_string())?;
    let titles: Vec<String> = reader
        .headers()
        .map_err(|e| e.to_string())?
        .iter()
        .map(normalize_cell)
        .collect();

    let mut records = reader.records();
    let first: Vec<String> = match records.next() {
        Some(record) => record
            .map_err(|e| e.to_string())?
            .iter()
            .map(str::to_string)
            .collect(),
        None => Vec::new(),
    };
    let columns = infer_column_checks(&titles, &first);

    let mut chunk = Vec::with_capacity(CHUNK_SIZE.min(4096));
    let mut rows_checked = 0usize;
    for (i, record) in records.enumerate() {
        let record = record.map_err(|e| e.to_string())?;
        let offset = record.position().map(|p| p.byte()).unwrap_or(0);
        chunk.push((i, record));
        if chunk.len() == CHUNK_SIZE {
            if let Some((row, title)) = find_first_invalid(&chunk, &columns) {
                return Err(format!("First invalid row at: row {}, column '{}'", row, title));
            }
            rows_checked += chunk.len();
            chunk.clear();
            let percent = (offset.saturating_mul(100) / total_bytes) as u32;
            jobs.publish_blocking(job_id, JobStatus::in_progress("verify", percent));
        }
    }
    if let Some((row, title)) = find_first_invalid(&chunk, &columns) {
        return Err(format!("First invalid row at: row {}, column '{}'", row, title));
    }
    rows_checked += chunk.len();

    info!(
        "verified {} ({} rows) in {:.2?}",
        path.display(),
        rows_checked + usize::from(!first.is_empty()),
        start.elapsed()
    );
    Ok(columns)
}

pub(crate) async fn process(
    state: web::Data<AppState>,
    jobs: web::Data<JobsState>,
    req: web::Json<CsvSourceRequest>,
) -> impl Responder {
    let source = match state.sources.get(&req.source_id) {
        Ok(Some(source)) => source,
        Ok(None) => return response::not_found("Source not found"),
        Err(e) => return response::unavailable(format!("Error loading source: {}", e)),
    };
    let connector = match source.config {
        SourceConfig::Csv { file } => CsvConnector {
            data_dir: state.config.data_dir.clone(),
            file,
        },
        _ => return response::bad_request("Source is not a CSV source"),
    };
    if let Err(e) = connector.validate_config() {
        return response::bad_request(e.to_string());
    }
    let path = connector.path();
    if !path.exists() {
        return response::not_found("CSV file not found; upload it first");
    }

    let job_id = schedule_verify_job(jobs.get_ref().clone(), path).await;
    response::accepted("Verification started", json!({ "job_id": job_id }))
}

async fn schedule_verify_job(jobs: JobsState, path: PathBuf) -> String {
    let job_id = uuid::Uuid::new_v4().to_string();
    jobs.register(&job_id).await;

    let id = job_id.clone();
    tokio::spawn(async move {
        let blocking_jobs = jobs.clone();
        let blocking_id = id.clone();
        let handle =
            tokio::task::spawn_blocking(move || verify_csv_blocking(&blocking_jobs, &blocking_id, &path));

        let status = match handle.await {
            Ok(Ok(columns)) => match serde_json::to_string(&columns) {
                Ok(payload) => JobStatus::Completed(payload),
                Err(e) => JobStatus::Failed(e.to_string()),
            },
            Ok(Err(e)) => JobStatus::Failed(e),
            Err(join_err) => JobStatus::Failed(format!("join error: {}", join_err)),
        };
        jobs.finish(&id, status).await;
    });

    job_id
}
