//! Process configuration, read once from the environment at startup.
//!
//! A `.env` file in the working directory is loaded first (through `dotenvy`),
//! then every setting falls back to a default when its variable is unset.
//! Secrets referenced by source configurations are collected here from
//! `REPORTGEN_SECRET_<NAME>` variables so that connectors never touch the
//! environment mid-run.

use crate::error::ConfigError;
use common::model::schedule::MissedSlotPolicy;
use common::model::template::Branding;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

const SECRET_PREFIX: &str = "REPORTGEN_SECRET_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSize {
    Letter,
    A4,
    Legal,
}

impl FromStr for PageSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "letter" => Ok(PageSize::Letter),
            "a4" => Ok(PageSize::A4),
            "legal" => Ok(PageSize::Legal),
            other => Err(format!("unknown page size '{}'", other)),
        }
    }
}

/// Layout settings handed to the PDF exporter.
#[derive(Debug, Clone)]
pub struct PageOptions {
    pub page_size: PageSize,
    pub margins_mm: u32,
    pub font_dir: PathBuf,
    pub font_family: String,
}

/// Timeouts and limits for a single report run.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub source_timeout: Duration,
    pub run_deadline: Duration,
    pub max_parallel_fetches: usize,
    pub retain_datasets: bool,
    pub default_recipients: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub sendgrid_api_key: Option<String>,
    pub from_email: String,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub tick: Duration,
    pub default_cron: String,
    pub default_policy: MissedSlotPolicy,
    pub max_catch_up: usize,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    pub archive_dir: PathBuf,
    pub data_dir: PathBuf,
    pub demo_mode: bool,
    pub worker_count: usize,
    pub branding: Branding,
    pub page: PageOptions,
    pub run: RunSettings,
    pub delivery: DeliverySettings,
    pub scheduler: SchedulerSettings,
    pub secrets: HashMap<String, String>,
}

impl Config {
    /// Loads `.env` (if any) and reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(env::vars())
    }

    /// Builds the configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();
        let get = |key: &str| vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

        let secrets = vars
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(SECRET_PREFIX)
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();

        let policy = match get("MISSED_SLOT_POLICY") {
            Some(raw) => MissedSlotPolicy::parse(raw).ok_or_else(|| ConfigError::Invalid {
                key: "MISSED_SLOT_POLICY".to_string(),
                reason: format!("expected catch_up or skip, got '{}'", raw),
            })?,
            None => MissedSlotPolicy::Skip,
        };

        Ok(Config {
            host: get("REPORTGEN_HOST").unwrap_or("127.0.0.1").to_string(),
            port: parse_or(&vars, "REPORTGEN_PORT", 8080)?,
            database_path: PathBuf::from(get("REPORTGEN_DB").unwrap_or("reportgen.sqlite")),
            archive_dir: PathBuf::from(get("ARCHIVE_DIR").unwrap_or("reports")),
            data_dir: PathBuf::from(get("DATA_DIR").unwrap_or("data")),
            demo_mode: parse_bool(&vars, "DEMO_MODE", false)?,
            worker_count: parse_or::<usize>(&vars, "WORKER_COUNT", 2)?.max(1),
            branding: Branding {
                company_name: get("COMPANY_NAME").unwrap_or("Your Company").to_string(),
                logo_path: get("COMPANY_LOGO_PATH").map(str::to_string),
                primary_color: get("PRIMARY_COLOR").unwrap_or("#3b82f6").to_string(),
                font_family: None,
            },
            page: PageOptions {
                page_size: parse_or(&vars, "PAGE_SIZE", PageSize::Letter)?,
                margins_mm: parse_or(&vars, "PAGE_MARGIN_MM", 20)?,
                font_dir: PathBuf::from(get("FONT_DIR").unwrap_or("./fonts")),
                font_family: get("FONT_FAMILY").unwrap_or("LiberationSans").to_string(),
            },
            run: RunSettings {
                source_timeout: Duration::from_secs(parse_or(&vars, "SOURCE_TIMEOUT_SECS", 30)?),
                run_deadline: Duration::from_secs(parse_or(&vars, "RUN_DEADLINE_SECS", 300)?),
                max_parallel_fetches: parse_or::<usize>(&vars, "MAX_PARALLEL_FETCHES", 4)?.max(1),
                retain_datasets: parse_bool(&vars, "RETAIN_DATASETS", false)?,
                default_recipients: get("DEFAULT_RECIPIENTS")
                    .map(split_list)
                    .unwrap_or_default(),
            },
            delivery: DeliverySettings {
                sendgrid_api_key: get("SENDGRID_API_KEY").map(str::to_string),
                from_email: get("FROM_EMAIL").unwrap_or("reports@example.com").to_string(),
                max_attempts: parse_or::<u32>(&vars, "DELIVERY_MAX_ATTEMPTS", 3)?.max(1),
                initial_backoff: Duration::from_millis(parse_or(&vars, "DELIVERY_BACKOFF_MS", 500)?),
            },
            scheduler: SchedulerSettings {
                tick: Duration::from_secs(parse_or::<u64>(&vars, "SCHEDULER_TICK_SECS", 30)?.max(1)),
                default_cron: get("REPORT_SCHEDULE").unwrap_or("0 7 * * 1").to_string(),
                default_policy: policy,
                max_catch_up: parse_or(&vars, "MAX_CATCH_UP", 24)?,
            },
            secrets,
        })
    }
}

/// Splits a comma separated list, dropping empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw.parse::<T>().map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str, default: bool) -> Result<bool, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key: key.to_string(),
                reason: format!("expected a boolean, got '{}'", v),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_vars(Vec::new()).unwrap();
        assert_eq!(config.port, 8080);
        assert!(!config.demo_mode);
        assert_eq!(config.scheduler.default_cron, "0 7 * * 1");
        assert_eq!(config.page.page_size, PageSize::Letter);
        assert_eq!(config.run.source_timeout, Duration::from_secs(30));
    }

    #[test]
    fn secrets_are_collected_by_prefix() {
        let config = Config::from_vars(vars(&[
            ("REPORTGEN_SECRET_SALES_API", "token-1"),
            ("UNRELATED", "x"),
        ]))
        .unwrap();
        assert_eq!(config.secrets.get("SALES_API").map(String::as_str), Some("token-1"));
        assert_eq!(config.secrets.len(), 1);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_vars(vars(&[("DEMO_MODE", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("DEMO_MODE"));
        assert!(Config::from_vars(vars(&[("PAGE_SIZE", "tabloid")])).is_err());
        assert!(Config::from_vars(vars(&[("MISSED_SLOT_POLICY", "later")])).is_err());
    }

    #[test]
    fn recipients_are_split_and_trimmed() {
        let config = Config::from_vars(vars(&[("DEFAULT_RECIPIENTS", "a@x.io, b@x.io,,")])).unwrap();
        assert_eq!(config.run.default_recipients, vec!["a@x.io", "b@x.io"]);
    }
}
