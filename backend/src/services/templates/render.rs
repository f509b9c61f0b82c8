//! Binds a template snapshot to a run's dataset and produces a [`Document`].
//!
//! Rendering is a pure function of its inputs. A section whose optional
//! slice is absent becomes a placeholder block; a section bound to an
//! undeclared slice is a malformed template.

use super::document::{ChartPoint, DocSection, Document, MetricItem, SectionBody};
use super::format::Formatter;
use super::pdf::parse_color;
use crate::error::RenderError;
use crate::services::data_sources::TimeWindow;
use chrono::{DateTime, Utc};
use common::model::dataset::Dataset;
use common::model::table::Table;
use common::model::template::{Aggregate, Directive, GroupBy, MetricSpec, SectionSpec, Template};
use regex::{Captures, Regex};
use serde_json::Value;
use std::collections::HashMap;

pub const DEFAULT_EMPTY_MESSAGE: &str = "No data available.";

/// Run-level values printed in the document header.
#[derive(Debug, Clone)]
pub struct RenderContext {
    pub title: String,
    pub company_name: String,
    pub generated_at: DateTime<Utc>,
    pub window: TimeWindow,
}

/// Static checks run when a template is saved: every section reads a
/// declared slice, every slice has sources, every format is usable and
/// branding colors parse.
pub fn validate(template: &Template) -> Result<(), RenderError> {
    let malformed = |msg: String| Err(RenderError::MalformedTemplate(msg));
    if template.id.trim().is_empty() {
        return malformed("template id must not be empty".to_string());
    }
    for (i, slice) in template.slices.iter().enumerate() {
        if slice.sources.is_empty() {
            return malformed(format!("slice '{}' has no sources", slice.name));
        }
        if template.slices[..i].iter().any(|s| s.name == slice.name) {
            return malformed(format!("slice '{}' is declared twice", slice.name));
        }
    }
    for section in &template.sections {
        if template.slice(&section.slice).is_none() {
            return malformed(format!(
                "section '{}' reads undeclared slice '{}'",
                section.title, section.slice
            ));
        }
        Formatter::new(&section.format)?;
    }
    if let Some(branding) = &template.branding {
        if parse_color(&branding.primary_color).is_none() {
            return malformed(format!("invalid primary color '{}'", branding.primary_color));
        }
    }
    Ok(())
}

pub fn render(template: &Template, dataset: &Dataset, context: &RenderContext) -> Result<Document, RenderError> {
    let token_re = Regex::new(r"\{\{\s*([a-z]+)(?::([^}]+?))?\s*\}\}")
        .map_err(|e| RenderError::MalformedTemplate(e.to_string()))?;

    let mut sections = Vec::with_capacity(template.sections.len());
    for section in &template.sections {
        if template.slice(&section.slice).is_none() {
            return Err(RenderError::MalformedTemplate(format!(
                "section '{}' reads undeclared slice '{}'",
                section.title, section.slice
            )));
        }
        let formatter = Formatter::new(&section.format)?;
        let body = match dataset.slice(&section.slice) {
            Some(table) => render_body(section, table, &formatter, &token_re)?,
            None if section.optional => SectionBody::Placeholder {
                message: section
                    .empty_message
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EMPTY_MESSAGE.to_string()),
            },
            None => {
                return Err(RenderError::MalformedTemplate(format!(
                    "required slice '{}' has no data",
                    section.slice
                )))
            }
        };
        sections.push(DocSection {
            title: section.title.clone(),
            body,
        });
    }

    Ok(Document {
        title: context.title.clone(),
        company_name: context.company_name.clone(),
        generated_at: context.generated_at,
        period: format!(
            "{} to {}",
            context.window.start.format("%Y-%m-%d"),
            context.window.end.format("%Y-%m-%d")
        ),
        sections,
    })
}

fn render_body(
    section: &SectionSpec,
    table: &Table,
    formatter: &Formatter,
    token_re: &Regex,
) -> Result<SectionBody, RenderError> {
    match &section.directive {
        Directive::Table {
            columns,
            max_rows,
            group_by,
        } => {
            let grouped;
            let source = match group_by {
                Some(group) => {
                    grouped = group_rows(table, group)?;
                    &grouped
                }
                None => table,
            };
            let headers: Vec<String> = if columns.is_empty() {
                source.columns.clone()
            } else {
                columns.clone()
            };
            let indexes: Vec<Option<usize>> = headers.iter().map(|h| source.column_index(h)).collect();
            let limit = max_rows.unwrap_or(usize::MAX);
            let rows = source
                .rows
                .iter()
                .take(limit)
                .map(|row| {
                    indexes
                        .iter()
                        .map(|idx| idx.and_then(|i| row.get(i)).map(|v| formatter.cell(v)).unwrap_or_default())
                        .collect()
                })
                .collect();
            Ok(SectionBody::Table {
                headers,
                rows,
                omitted: source.len().saturating_sub(limit),
            })
        }
        Directive::Chart {
            label_column,
            value_column,
        } => Ok(SectionBody::Chart {
            series: value_column.clone(),
            points: chart_points(table, label_column, value_column, formatter),
        }),
        Directive::Text { body } => {
            let text = expand_tokens(body, table, formatter, token_re)?;
            Ok(SectionBody::Text {
                paragraphs: text.split("\n\n").map(|p| p.trim().to_string()).collect(),
            })
        }
        Directive::Metrics { metrics } => {
            let items = metrics
                .iter()
                .map(|metric| {
                    Ok(MetricItem {
                        label: metric.label.clone(),
                        value: metric_value(metric, table, formatter)?,
                    })
                })
                .collect::<Result<Vec<_>, RenderError>>()?;
            Ok(SectionBody::Metrics { items })
        }
    }
}

fn label_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Collapses rows by `group.key` in order of first appearance. Summed
/// columns stay integral when every input is an integer; other columns keep
/// the first row's value.
fn group_rows(table: &Table, group: &GroupBy) -> Result<Table, RenderError> {
    let key_idx = table.column_index(&group.key).ok_or_else(|| {
        RenderError::MalformedTemplate(format!("group_by key '{}' is not a column", group.key))
    })?;
    let sum_idx: Vec<Option<usize>> = group.sum.iter().map(|c| table.column_index(c)).collect();

    let mut columns = vec![group.key.clone()];
    columns.extend(group.sum.iter().cloned());
    columns.extend(
        table
            .columns
            .iter()
            .filter(|c| **c != group.key && !group.sum.contains(c))
            .cloned(),
    );
    let rest_idx: Vec<usize> = columns[1 + group.sum.len()..]
        .iter()
        .filter_map(|c| table.column_index(c))
        .collect();

    struct Acc {
        first: Vec<Value>,
        ints: Vec<Option<i64>>,
        floats: Vec<f64>,
    }
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Acc> = HashMap::new();
    for row in &table.rows {
        let key = label_of(&row[key_idx]);
        let acc = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key);
            Acc {
                first: row.clone(),
                ints: vec![Some(0); sum_idx.len()],
                floats: vec![0.0; sum_idx.len()],
            }
        });
        for (n, idx) in sum_idx.iter().enumerate() {
            let cell = idx.and_then(|i| row.get(i)).unwrap_or(&Value::Null);
            acc.floats[n] += number_of(cell).unwrap_or(0.0);
            acc.ints[n] = match (acc.ints[n], cell) {
                (Some(total), Value::Number(v)) => v.as_i64().and_then(|v| total.checked_add(v)),
                (Some(total), Value::Null) => Some(total),
                _ => None,
            };
        }
    }

    let mut grouped = Table::new(columns);
    for key in order {
        if let Some(acc) = groups.remove(&key) {
            let mut row = vec![acc.first[key_idx].clone()];
            for n in 0..sum_idx.len() {
                row.push(match acc.ints[n] {
                    Some(total) => Value::from(total),
                    None => Value::from(acc.floats[n]),
                });
            }
            row.extend(rest_idx.iter().map(|&i| acc.first[i].clone()));
            grouped.rows.push(row);
        }
    }
    Ok(grouped)
}

fn chart_points(table: &Table, label_column: &str, value_column: &str, formatter: &Formatter) -> Vec<ChartPoint> {
    let (Some(label_idx), Some(value_idx)) = (table.column_index(label_column), table.column_index(value_column))
    else {
        return Vec::new();
    };
    let mut points: Vec<ChartPoint> = Vec::new();
    for row in &table.rows {
        let label = label_of(&row[label_idx]);
        let value = number_of(&row[value_idx]).unwrap_or(0.0);
        match points.iter_mut().find(|p| p.label == label) {
            Some(point) => point.value += value,
            None => points.push(ChartPoint {
                label,
                value,
                display: String::new(),
            }),
        }
    }
    for point in &mut points {
        point.display = formatter.decimal(point.value);
    }
    points
}

fn aggregate(kind: Aggregate, column: Option<&str>, table: &Table, formatter: &Formatter) -> Result<String, RenderError> {
    if kind == Aggregate::Count {
        return Ok(formatter.integer(table.len() as i64));
    }
    let column = column.ok_or_else(|| {
        RenderError::MalformedTemplate(format!("{:?} needs a column", kind).to_lowercase())
    })?;
    let values: Vec<f64> = table.numbers(column).collect();
    if values.is_empty() {
        return Ok("n/a".to_string());
    }
    let result = match kind {
        Aggregate::Sum => values.iter().sum(),
        Aggregate::Avg => values.iter().sum::<f64>() / values.len() as f64,
        Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Aggregate::Count => unreachable!("handled above"),
    };
    Ok(formatter.decimal(result))
}

fn metric_value(metric: &MetricSpec, table: &Table, formatter: &Formatter) -> Result<String, RenderError> {
    aggregate(metric.aggregate, metric.column.as_deref(), table, formatter)
}

/// Expands `{{count}}` and `{{sum:col}}`-style tokens against the slice.
fn expand_tokens(body: &str, table: &Table, formatter: &Formatter, token_re: &Regex) -> Result<String, RenderError> {
    let resolve = |caps: &Captures<'_>| -> Result<String, RenderError> {
        let name = &caps[1];
        let column = caps.get(2).map(|m| m.as_str().trim());
        let which = match name {
            "count" => Aggregate::Count,
            "sum" => Aggregate::Sum,
            "avg" => Aggregate::Avg,
            "min" => Aggregate::Min,
            "max" => Aggregate::Max,
            other => {
                return Err(RenderError::MalformedTemplate(format!("unknown token '{{{{{}}}}}'", other)))
            }
        };
        aggregate(which, column, table, formatter)
    };

    for caps in token_re.captures_iter(body) {
        resolve(&caps)?;
    }
    Ok(token_re
        .replace_all(body, |caps: &Captures<'_>| resolve(caps).unwrap_or_default())
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::model::template::{Branding, SectionFormat, SliceSpec};
    use serde_json::json;

    fn sales() -> Table {
        Table {
            columns: vec!["region".into(), "revenue".into(), "units".into()],
            rows: vec![
                vec![json!("North"), json!(1000.5), json!(3)],
                vec![json!("South"), json!(250.0), json!(1)],
                vec![json!("North"), json!(500.25), json!(2)],
            ],
        }
    }

    fn section(slice: &str, optional: bool, directive: Directive) -> SectionSpec {
        SectionSpec {
            title: slice.to_string(),
            slice: slice.to_string(),
            optional,
            directive,
            format: SectionFormat::default(),
            empty_message: None,
        }
    }

    fn template(sections: Vec<SectionSpec>) -> Template {
        Template {
            id: "t".into(),
            name: "T".into(),
            description: String::new(),
            slices: ["sales", "ops"]
                .iter()
                .map(|name| SliceSpec {
                    name: name.to_string(),
                    sources: vec![name.to_string()],
                    dedupe_key: None,
                })
                .collect(),
            sections,
            branding: None,
        }
    }

    fn context() -> RenderContext {
        let end = Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap();
        RenderContext {
            title: "Weekly".into(),
            company_name: "Acme".into(),
            generated_at: end,
            window: TimeWindow::ending_at(end, 7),
        }
    }

    fn dataset() -> Dataset {
        let mut dataset = Dataset::default();
        dataset.slices.insert("sales".into(), sales());
        dataset
    }

    #[test]
    fn missing_optional_slice_becomes_placeholder() {
        let mut ops = section("ops", true, Directive::Text { body: "x".into() });
        ops.empty_message = Some("Operations data unavailable".into());
        let doc = render(
            &template(vec![section("sales", false, Directive::Text { body: "{{count}} orders".into() }), ops]),
            &dataset(),
            &context(),
        )
        .unwrap();
        assert_eq!(doc.period, "2024-02-26 to 2024-03-04");
        assert_eq!(
            doc.sections[0].body,
            SectionBody::Text {
                paragraphs: vec!["3 orders".into()]
            }
        );
        assert_eq!(
            doc.sections[1].body,
            SectionBody::Placeholder {
                message: "Operations data unavailable".into()
            }
        );
    }

    #[test]
    fn grouped_table_sums_in_first_seen_order() {
        let directive = Directive::Table {
            columns: vec![],
            max_rows: Some(1),
            group_by: Some(GroupBy {
                key: "region".into(),
                sum: vec!["revenue".into(), "units".into()],
            }),
        };
        let doc = render(&template(vec![section("sales", false, directive)]), &dataset(), &context()).unwrap();
        match &doc.sections[0].body {
            SectionBody::Table { headers, rows, omitted } => {
                assert_eq!(headers, &vec!["region", "revenue", "units"]);
                assert_eq!(rows, &vec![vec!["North".to_string(), "1,500.75".into(), "5".into()]]);
                assert_eq!(*omitted, 1);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn tokens_metrics_and_chart() {
        let sections = vec![
            section(
                "sales",
                false,
                Directive::Text {
                    body: "Revenue {{sum:revenue}}, best {{ max:revenue }}.\n\nAverage {{avg:units}}".into(),
                },
            ),
            section(
                "sales",
                false,
                Directive::Metrics {
                    metrics: vec![MetricSpec {
                        label: "Orders".into(),
                        aggregate: Aggregate::Count,
                        column: None,
                    }],
                },
            ),
            section(
                "sales",
                false,
                Directive::Chart {
                    label_column: "region".into(),
                    value_column: "revenue".into(),
                },
            ),
        ];
        let doc = render(&template(sections), &dataset(), &context()).unwrap();
        assert_eq!(
            doc.sections[0].body,
            SectionBody::Text {
                paragraphs: vec!["Revenue 1,750.75, best 1,000.50.".into(), "Average 2.00".into()]
            }
        );
        assert_eq!(
            doc.sections[1].body,
            SectionBody::Metrics {
                items: vec![MetricItem {
                    label: "Orders".into(),
                    value: "3".into()
                }]
            }
        );
        match &doc.sections[2].body {
            SectionBody::Chart { points, .. } => {
                assert_eq!(points.len(), 2);
                assert_eq!(points[0].label, "North");
                assert!((points[0].value - 1500.75).abs() < 1e-9);
            }
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[test]
    fn malformed_templates_are_rejected() {
        let undeclared = template(vec![section("payroll", true, Directive::Text { body: "x".into() })]);
        assert!(matches!(
            render(&undeclared, &dataset(), &context()),
            Err(RenderError::MalformedTemplate(_))
        ));
        let bad_token = template(vec![section("sales", false, Directive::Text { body: "{{median:revenue}}".into() })]);
        assert!(matches!(
            render(&bad_token, &dataset(), &context()),
            Err(RenderError::MalformedTemplate(_))
        ));
    }

    #[test]
    fn validation_checks_slices_and_formats() {
        let good = template(vec![section("sales", false, Directive::Text { body: "x".into() })]);
        assert!(validate(&good).is_ok());

        let mut empty_slice = good.clone();
        empty_slice.slices[0].sources.clear();
        assert!(validate(&empty_slice).is_err());

        let mut bad_locale = good.clone();
        bad_locale.sections[0].format.locale = "zz-nowhere".into();
        assert!(matches!(validate(&bad_locale), Err(RenderError::MalformedTemplate(_))));

        let undeclared = template(vec![section("payroll", false, Directive::Text { body: "x".into() })]);
        assert!(validate(&undeclared).is_err());

        let mut branded = good.clone();
        branded.branding = Some(Branding {
            company_name: "Acme".into(),
            logo_path: None,
            primary_color: "#ééé".into(),
            font_family: None,
        });
        assert!(matches!(validate(&branded), Err(RenderError::MalformedTemplate(_))));
        if let Some(b) = branded.branding.as_mut() {
            b.primary_color = "#3b82f6".into();
        }
        assert!(validate(&branded).is_ok());
    }

    #[test]
    fn rendering_is_deterministic() {
        let t = template(vec![
            section("sales", false, Directive::Table { columns: vec![], max_rows: None, group_by: None }),
            section("ops", true, Directive::Text { body: "x".into() }),
        ]);
        assert_eq!(render(&t, &dataset(), &context()).unwrap(), render(&t, &dataset(), &context()).unwrap());
    }
}
