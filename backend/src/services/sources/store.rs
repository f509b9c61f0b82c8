//! Persistence of source definitions.

use crate::db::{from_json, Db};
use common::model::source::{FetchRecord, Source, SourceConfig};
use rusqlite::{params, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct SourceStore {
    db: Db,
}

fn map_source(row: &Row<'_>) -> rusqlite::Result<Source> {
    let config: String = row.get(2)?;
    let last_fetch: Option<String> = row.get(3)?;
    Ok(Source {
        id: row.get(0)?,
        name: row.get(1)?,
        config: from_json(2, &config)?,
        last_fetch: last_fetch.map(|raw| from_json(3, &raw)).transpose()?,
    })
}

impl SourceStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> rusqlite::Result<Option<Source>> {
        let conn = self.db.connect()?;
        conn.query_row(
            "SELECT id, name, config, last_fetch FROM sources WHERE id = ?1",
            params![id],
            map_source,
        )
        .optional()
    }

    pub fn list(&self) -> rusqlite::Result<Vec<Source>> {
        let conn = self.db.connect()?;
        let mut stmt = conn.prepare("SELECT id, name, config, last_fetch FROM sources ORDER BY id")?;
        let sources = stmt.query_map([], map_source)?.collect();
        sources
    }

    /// Inserts or replaces the definition. The last fetch record and the
    /// stored CSV checksum survive an edit.
    pub fn upsert(&self, source: &Source) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        let config = serde_json::to_string(&source.config)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "INSERT INTO sources (id, name, kind, config) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, kind = excluded.kind, config = excluded.config",
            params![source.id, source.name, source.kind().as_str(), config],
        )?;
        Ok(())
    }

    /// Records the outcome of the latest run. Called once per run, after
    /// the run is finalized.
    pub fn record_fetch(&self, id: &str, record: &FetchRecord) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        let raw = serde_json::to_string(record)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "UPDATE sources SET last_fetch = ?1 WHERE id = ?2",
            params![raw, id],
        )?;
        Ok(())
    }

    pub fn csv_md5(&self, id: &str) -> rusqlite::Result<Option<String>> {
        let conn = self.db.connect()?;
        let md5: Option<Option<String>> = conn
            .query_row(
                "SELECT csv_md5 FROM sources WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(md5.flatten())
    }

    pub fn set_csv_md5(&self, id: &str, md5: &str) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        conn.execute(
            "UPDATE sources SET csv_md5 = ?1 WHERE id = ?2",
            params![md5, id],
        )?;
        Ok(())
    }

    /// Inserts the three fixture sources unless they already exist.
    pub fn seed_demo(&self) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        for (id, name) in [
            ("sales", "Sales pipeline"),
            ("operations", "Operations tracker"),
            ("finance", "Finance ledger"),
        ] {
            let config = SourceConfig::Demo {
                dataset: id.to_string(),
            };
            let config = serde_json::to_string(&config)
                .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
            conn.execute(
                "INSERT OR IGNORE INTO sources (id, name, kind, config) VALUES (?1, ?2, 'demo', ?3)",
                params![id, name, config],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::model::source::FetchStatus;

    fn store() -> (tempfile::TempDir, SourceStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.sqlite")).unwrap();
        (dir, SourceStore::new(db))
    }

    #[test]
    fn upsert_keeps_last_fetch() {
        let (_dir, store) = store();
        let mut source = Source {
            id: "crm".into(),
            name: "CRM".into(),
            config: SourceConfig::Csv {
                file: "crm.csv".into(),
            },
            last_fetch: None,
        };
        store.upsert(&source).unwrap();
        let record = FetchRecord {
            at: Utc::now(),
            status: FetchStatus::Success,
            rows: 12,
            error: None,
        };
        store.record_fetch("crm", &record).unwrap();

        source.name = "CRM export".into();
        store.upsert(&source).unwrap();
        let loaded = store.get("crm").unwrap().unwrap();
        assert_eq!(loaded.name, "CRM export");
        assert_eq!(loaded.last_fetch.unwrap().rows, 12);
    }

    #[test]
    fn seeding_is_idempotent() {
        let (_dir, store) = store();
        store.seed_demo().unwrap();
        store.seed_demo().unwrap();
        assert_eq!(store.list().unwrap().len(), 3);
        assert!(store.get("missing").unwrap().is_none());
    }
}
