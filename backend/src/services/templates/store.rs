//! Persistence of report templates.
//!
//! The whole template is kept as one JSON document; runs load it once and
//! work on that snapshot, so an edit never affects a run already in flight.

use crate::db::{from_json, ts, Db};
use chrono::Utc;
use common::model::template::{
    Aggregate, Directive, GroupBy, MetricSpec, SectionFormat, SectionSpec, SliceSpec, Template,
};
use rusqlite::{params, OptionalExtension};

#[derive(Debug, Clone)]
pub struct TemplateStore {
    db: Db,
}

impl TemplateStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> rusqlite::Result<Option<Template>> {
        let conn = self.db.connect()?;
        let body: Option<String> = conn
            .query_row("SELECT body FROM templates WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        body.map(|raw| from_json(0, &raw)).transpose()
    }

    pub fn list(&self) -> rusqlite::Result<Vec<Template>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare("SELECT body FROM templates ORDER BY id")?;
        let templates = stmt
            .query_map([], |row| {
                let raw: String = row.get(0)?;
                from_json(0, &raw)
            })?
            .collect();
        templates
    }

    pub fn upsert(&self, template: &Template) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        let body = serde_json::to_string(template)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "INSERT INTO templates (id, name, description, body, updated_at) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, description = excluded.description,
                 body = excluded.body, updated_at = excluded.updated_at",
            params![template.id, template.name, template.description, body, ts(&Utc::now())],
        )?;
        Ok(())
    }

    /// Installs the built-in templates that are missing. Existing templates,
    /// edited or not, are left alone.
    pub fn seed_defaults(&self) -> rusqlite::Result<usize> {
        let mut added = 0;
        for template in default_templates() {
            if self.get(&template.id)?.is_none() {
                self.upsert(&template)?;
                added += 1;
            }
        }
        Ok(added)
    }
}

fn slice(name: &str) -> SliceSpec {
    SliceSpec {
        name: name.to_string(),
        sources: vec![name.to_string()],
        dedupe_key: None,
    }
}

fn section(title: &str, slice: &str, optional: bool, directive: Directive) -> SectionSpec {
    SectionSpec {
        title: title.to_string(),
        slice: slice.to_string(),
        optional,
        directive,
        format: SectionFormat::default(),
        empty_message: None,
    }
}

fn metric(label: &str, aggregate: Aggregate, column: Option<&str>) -> MetricSpec {
    MetricSpec {
        label: label.to_string(),
        aggregate,
        column: column.map(str::to_string),
    }
}

fn grouped_table(key: &str, sum: &[&str]) -> Directive {
    Directive::Table {
        columns: Vec::new(),
        max_rows: None,
        group_by: Some(GroupBy {
            key: key.to_string(),
            sum: sum.iter().map(|s| s.to_string()).collect(),
        }),
    }
}

fn sales_sections(optional: bool) -> Vec<SectionSpec> {
    vec![
        section(
            "Sales overview",
            "sales",
            optional,
            Directive::Metrics {
                metrics: vec![
                    metric("Orders", Aggregate::Count, None),
                    metric("Revenue", Aggregate::Sum, Some("revenue")),
                    metric("Average order", Aggregate::Avg, Some("revenue")),
                    metric("Largest order", Aggregate::Max, Some("revenue")),
                ],
            },
        ),
        section(
            "Revenue by region",
            "sales",
            optional,
            Directive::Chart {
                label_column: "region".to_string(),
                value_column: "revenue".to_string(),
            },
        ),
        section("Products", "sales", optional, grouped_table("product", &["quantity", "revenue"])),
    ]
}

fn operations_sections(optional: bool) -> Vec<SectionSpec> {
    vec![
        section(
            "Operations summary",
            "operations",
            optional,
            Directive::Text {
                body: "{{count}} tickets were opened during the period.".to_string(),
            },
        ),
        section(
            "Open tickets",
            "operations",
            optional,
            Directive::Table {
                columns: ["ticket_id", "category", "status", "priority", "created"]
                    .iter()
                    .map(|c| c.to_string())
                    .collect(),
                max_rows: Some(15),
                group_by: None,
            },
        ),
    ]
}

fn finance_sections(optional: bool) -> Vec<SectionSpec> {
    vec![section(
        "Budget vs actual",
        "finance",
        optional,
        Directive::Table {
            columns: ["category", "month", "budget", "actual", "variance"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            max_rows: None,
            group_by: None,
        },
    )]
}

/// Built-in templates over the demo sources.
pub fn default_templates() -> Vec<Template> {
    let mut weekly = sales_sections(false);
    weekly.extend(operations_sections(true));
    weekly.extend(finance_sections(true));

    vec![
        Template {
            id: "weekly_summary".to_string(),
            name: "Weekly business summary".to_string(),
            description: "Sales, operations and finance in one report".to_string(),
            slices: vec![slice("sales"), slice("operations"), slice("finance")],
            sections: weekly,
            branding: None,
        },
        Template {
            id: "sales_report".to_string(),
            name: "Sales report".to_string(),
            description: "Orders and revenue for the period".to_string(),
            slices: vec![slice("sales")],
            sections: sales_sections(false),
            branding: None,
        },
        Template {
            id: "ops_report".to_string(),
            name: "Operations report".to_string(),
            description: "Ticket volume and status".to_string(),
            slices: vec![slice("operations")],
            sections: operations_sections(false),
            branding: None,
        },
        Template {
            id: "finance_report".to_string(),
            name: "Finance report".to_string(),
            description: "Budget against actual spend".to_string(),
            slices: vec![slice("finance")],
            sections: finance_sections(false),
            branding: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::templates::render::validate;

    fn store() -> (tempfile::TempDir, TemplateStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.sqlite")).unwrap();
        (dir, TemplateStore::new(db))
    }

    #[test]
    fn defaults_are_valid() {
        for template in default_templates() {
            validate(&template).unwrap();
        }
    }

    #[test]
    fn seeding_keeps_edits() {
        let (_dir, store) = store();
        assert_eq!(store.seed_defaults().unwrap(), 4);

        let mut edited = store.get("sales_report").unwrap().unwrap();
        edited.name = "Sales (edited)".into();
        store.upsert(&edited).unwrap();

        assert_eq!(store.seed_defaults().unwrap(), 0);
        assert_eq!(store.get("sales_report").unwrap().unwrap().name, "Sales (edited)");
        assert_eq!(store.list().unwrap().len(), 4);
        assert!(store.get("nope").unwrap().is_none());
    }
}
