use super::connector::{detect_delimiter, CsvConnector};
use crate::services::data_sources::{normalize_cell, Connector};
use crate::services::response;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, Responder};
use common::model::source::SourceConfig;
use common::requests::CsvSourceRequest;
use futures_util::StreamExt;
use log::info;
use md5::Context;
use regex::Regex;
use serde_json::{from_slice, json};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Validates each header cell: not empty, only letters, digits, spaces, `-` and `_`.
fn validate_header_cells(header: &str, header_re: &Regex) -> Result<(), Box<dyn std::error::Error>> {
    let delimiter = detect_delimiter(header) as char;
    for cell in header.split(delimiter) {
        let cell = normalize_cell(cell);
        if cell.is_empty() {
            return Err("CSV header cells must not be empty".into());
        }
        if !header_re.is_match(&cell) {
            return Err(format!(
                "CSV header cell '{}' may only contain letters, digits, spaces, '-' and '_'",
                cell
            )
            .into());
        }
    }
    Ok(())
}

/// Strips the line terminator and checks the header line.
fn check_header_line(line: &[u8], header_re: &Regex) -> Result<(), Box<dyn std::error::Error>> {
    let mut line = line.to_vec();
    if line.ends_with(b"\n") {
        line.pop();
    }
    if line.ends_with(b"\r") {
        line.pop();
    }
    let header = String::from_utf8(line).map_err(|_| "Header is not valid UTF-8")?;
    let header = header.trim_start_matches('\u{feff}');
    validate_header_cells(header, header_re)
}

pub(crate) async fn process(state: web::Data<AppState>, payload: Multipart) -> impl Responder {
    match upload_csv(&state, payload).await {
        Ok(unchanged) => response::ok(
            if unchanged { "File unchanged" } else { "File stored" },
            json!({ "unchanged": unchanged }),
        ),
        Err(e) => response::bad_request(format!("Error: {}", e)),
    }
}

/// Stores the uploaded file for a CSV source. Returns `true` when the upload
/// is byte-identical to the stored one.
async fn upload_csv(state: &AppState, mut payload: Multipart) -> Result<bool, Box<dyn std::error::Error>> {
    let header_re = Regex::new(r"^[\p{L}\p{M}\p{N}\s\-_]+$")?;

    let mut target: Option<(String, PathBuf)> = None;
    let mut previous_md5: Option<String> = None;
    let mut staged: Option<NamedTempFile> = None;
    let mut md5_hasher = Context::new();

    while let Some(item) = payload.next().await {
        let mut field = item?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|n| n.to_string()));

        match name.as_deref() {
            Some("json") => {
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    bytes.extend_from_slice(&chunk?);
                }
                let request: CsvSourceRequest = from_slice(&bytes)?;
                let source = state
                    .sources
                    .get(&request.source_id)?
                    .ok_or("Source not found")?;
                let file = match source.config {
                    SourceConfig::Csv { file } => file,
                    _ => return Err("Source is not a CSV source".into()),
                };
                let connector = CsvConnector {
                    data_dir: state.config.data_dir.clone(),
                    file,
                };
                connector.validate_config()?;
                previous_md5 = state.sources.csv_md5(&source.id)?;
                target = Some((source.id, connector.path()));
            }

            Some("file") => {
                let filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename().map(|f| f.to_string()))
                    .unwrap_or_default();
                if !filename.to_ascii_lowercase().ends_with(".csv") {
                    return Err("The file must end with .csv".into());
                }
                let (_, path) = target
                    .as_ref()
                    .ok_or("The json part must be sent before the file")?;
                let dir = path.parent().ok_or("Invalid target path")?;
                std::fs::create_dir_all(dir)?;

                let temp = NamedTempFile::new_in(dir)?;
                let mut writer = BufWriter::new(temp.reopen()?);
                let mut header_buf: Vec<u8> = Vec::new();
                let mut header_validated = false;

                while let Some(chunk) = field.next().await {
                    let chunk = chunk?;
                    md5_hasher.consume(&chunk);
                    if header_validated {
                        writer.write_all(&chunk)?;
                        continue;
                    }
                    header_buf.extend_from_slice(&chunk);
                    if let Some(pos) = header_buf.iter().position(|&b| b == b'\n') {
                        check_header_line(&header_buf[..=pos], &header_re)?;
                        writer.write_all(&header_buf)?;
                        header_buf.clear();
                        header_validated = true;
                    }
                }
                if !header_validated {
                    // Header-only file without a trailing newline.
                    check_header_line(&header_buf, &header_re)?;
                    writer.write_all(&header_buf)?;
                }
                writer.flush()?;
                staged = Some(temp);
            }

            _ => {}
        }
    }

    let (source_id, path) = target.ok_or("Missing source")?;
    let staged = staged.ok_or("Missing file")?;
    let computed_md5 = format!("{:x}", md5_hasher.finalize());

    if previous_md5.as_deref() == Some(computed_md5.as_str()) && path.exists() {
        return Ok(true);
    }
    staged.persist(&path)?;
    state.sources.set_csv_md5(&source_id, &computed_md5)?;
    info!("stored CSV for source '{}' at {}", source_id, path.display());
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn re() -> Regex {
        Regex::new(r"^[\p{L}\p{M}\p{N}\s\-_]+$").unwrap()
    }

    #[test]
    fn header_validation() {
        assert!(check_header_line(b"region;revenue_2024;Unit price\r\n", &re()).is_ok());
        assert!(check_header_line(b"\"name\",\"email\"", &re()).is_ok());
        assert!(check_header_line(b"a,,c\n", &re()).is_err());
        assert!(check_header_line(b"total ($)\n", &re()).is_err());
    }
}
