//! Fixture connector used in demo mode.
//!
//! Produces sales, operations or finance rows from a seeded generator, so
//! two fetches of the same window always return identical tables.

use super::{Connector, Fetched, TimeWindow};
use crate::error::ConnectorError;
use async_trait::async_trait;
use chrono::Duration;
use common::model::source::{Source, SourceConfig};
use common::model::table::Table;
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoDataset {
    Sales,
    Operations,
    Finance,
}

impl DemoDataset {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sales" => Some(DemoDataset::Sales),
            "ops" | "operations" => Some(DemoDataset::Operations),
            "finance" => Some(DemoDataset::Finance),
            _ => None,
        }
    }

    fn seed(&self) -> u64 {
        match self {
            DemoDataset::Sales => 0x5a1e5,
            DemoDataset::Operations => 0x0b5,
            DemoDataset::Finance => 0xf1aa,
        }
    }
}

pub struct DemoConnector {
    pub dataset: DemoDataset,
}

impl DemoConnector {
    /// Picks the fixture from the source's demo config, or guesses it from the
    /// source id and name when the source is a real connector being substituted.
    pub fn for_source(source: &Source) -> Self {
        let explicit = match &source.config {
            SourceConfig::Demo { dataset } => DemoDataset::parse(dataset),
            _ => None,
        };
        let dataset = explicit
            .or_else(|| DemoDataset::parse(&source.id))
            .or_else(|| {
                let name = source.name.to_ascii_lowercase();
                if name.contains("op") {
                    Some(DemoDataset::Operations)
                } else if name.contains("financ") || name.contains("budget") {
                    Some(DemoDataset::Finance)
                } else {
                    None
                }
            })
            .unwrap_or(DemoDataset::Sales);
        Self { dataset }
    }
}

/// xorshift64*; small and reproducible.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[self.below(items.len() as u64) as usize]
    }

    /// Uniform in `[lo, hi)`, rounded to cents.
    fn amount(&mut self, lo: f64, hi: f64) -> f64 {
        let unit = (self.next() >> 11) as f64 / (1u64 << 53) as f64;
        ((lo + unit * (hi - lo)) * 100.0).round() / 100.0
    }
}

fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> Table {
    Table {
        columns: columns.iter().map(|c| c.to_string()).collect(),
        rows,
    }
}

fn sales(window: &TimeWindow, rng: &mut Rng) -> Table {
    let regions = ["North", "South", "East", "West"];
    let products = ["Widget A", "Widget B", "Service Pro", "Enterprise Suite"];
    let span = (window.end - window.start).num_days().max(1) as u64;
    let rows = (0..50)
        .map(|i| {
            let day = window.end - Duration::days(rng.below(span) as i64 + 1);
            vec![
                json!(format!("ORD-{:04}", 1000 + i)),
                json!(day.format("%Y-%m-%d").to_string()),
                json!(rng.pick(&regions)),
                json!(rng.pick(&products)),
                json!(rng.below(100) + 1),
                json!(rng.amount(100.0, 10_000.0)),
                json!(format!("Rep {}", rng.below(10) + 1)),
            ]
        })
        .collect();
    table(
        &["order_id", "date", "region", "product", "quantity", "revenue", "rep"],
        rows,
    )
}

fn operations(window: &TimeWindow, rng: &mut Rng) -> Table {
    let categories = ["Shipping", "Support", "Manufacturing", "QA"];
    let statuses = ["Completed", "In Progress", "Delayed", "Blocked"];
    let priorities = ["Low", "Medium", "High", "Critical"];
    let rows = (0..30)
        .map(|i| {
            let created = window.end - Duration::days(rng.below(14) as i64 + 1);
            let status = rng.pick(&statuses);
            let resolved = if status == "Completed" {
                json!((created + Duration::days(rng.below(3) as i64)).format("%Y-%m-%d").to_string())
            } else {
                Value::Null
            };
            vec![
                json!(format!("OPS-{}", 1000 + i)),
                json!(rng.pick(&categories)),
                json!(status),
                json!(created.format("%Y-%m-%d").to_string()),
                resolved,
                json!(rng.pick(&priorities)),
            ]
        })
        .collect();
    table(
        &["ticket_id", "category", "status", "created", "resolved", "priority"],
        rows,
    )
}

fn finance(window: &TimeWindow, rng: &mut Rng) -> Table {
    let categories = ["Revenue", "COGS", "Marketing", "Payroll", "Operations", "R&D"];
    let mut rows = Vec::new();
    for category in categories {
        for back in (0..3).rev() {
            let month = window.end - Duration::days(30 * back);
            let budget = rng.amount(50_000.0, 500_000.0);
            let actual = ((budget * (0.8 + rng.amount(0.0, 0.4))) * 100.0).round() / 100.0;
            let variance = ((actual - budget) * 100.0).round() / 100.0;
            rows.push(vec![
                json!(category),
                json!(month.format("%Y-%m").to_string()),
                json!(budget),
                json!(actual),
                json!(variance),
                json!(((variance / budget) * 1000.0).round() / 10.0),
            ]);
        }
    }
    table(
        &["category", "month", "budget", "actual", "variance", "variance_pct"],
        rows,
    )
}

/// Generates the fixture table for a window. Pure.
pub fn generate(dataset: DemoDataset, window: &TimeWindow) -> Table {
    let mut rng = Rng::new(dataset.seed() ^ window.end.timestamp() as u64);
    match dataset {
        DemoDataset::Sales => sales(window, &mut rng),
        DemoDataset::Operations => operations(window, &mut rng),
        DemoDataset::Finance => finance(window, &mut rng),
    }
}

#[async_trait]
impl Connector for DemoConnector {
    async fn fetch(&self, window: &TimeWindow) -> Result<Fetched, ConnectorError> {
        Ok(Fetched::complete(generate(self.dataset, window)))
    }

    fn validate_config(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ConnectorError> {
        Ok(())
    }
}
