//! Persistence of schedules and the slot-claim transaction.

use crate::config::Config;
use crate::db::{from_json, parse_opt_ts, parse_ts, ts, Db};
use crate::error::ArchiveError;
use crate::services::archive::{insert_report, is_constraint_violation};
use chrono::{DateTime, Utc};
use common::model::report::Report;
use common::model::schedule::{MissedSlotPolicy, Schedule};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};

pub const DEFAULT_SCHEDULE_ID: &str = "default";
pub const DEFAULT_TEMPLATE_ID: &str = "weekly_summary";

const COLUMNS: &str = "id, name, cron, template_id, recipients, enabled, missed_policy, last_fired, created_at";

#[derive(Debug, Clone)]
pub struct ScheduleStore {
    db: Db,
}

fn map_schedule(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    let recipients: String = row.get(4)?;
    let policy: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    Ok(Schedule {
        id: row.get(0)?,
        name: row.get(1)?,
        cron: row.get(2)?,
        template_id: row.get(3)?,
        recipients: from_json(4, &recipients)?,
        enabled: row.get(5)?,
        missed_policy: MissedSlotPolicy::parse(&policy).unwrap_or(MissedSlotPolicy::Skip),
        last_fired: parse_opt_ts(row.get(7)?)?,
        created_at: parse_ts(&created_at)?,
    })
}

impl ScheduleStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn get(&self, id: &str) -> rusqlite::Result<Option<Schedule>> {
        let conn = self.db.connect()?;
        let sql = format!("SELECT {} FROM schedules WHERE id = ?1", COLUMNS);
        conn.query_row(&sql, params![id], map_schedule).optional()
    }

    pub fn list(&self) -> rusqlite::Result<Vec<Schedule>> {
        let conn = self.db.connect()?;
        let sql = format!("SELECT {} FROM schedules ORDER BY id", COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let schedules = stmt.query_map([], map_schedule)?.collect();
        schedules
    }

    /// Creates or edits a schedule. `last_fired` and `created_at` of an
    /// existing schedule are kept, so editing never re-fires old slots.
    pub fn upsert(&self, schedule: &Schedule) -> rusqlite::Result<()> {
        let conn = self.db.connect()?;
        let recipients = serde_json::to_string(&schedule.recipients)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        conn.execute(
            "INSERT INTO schedules (id, name, cron, template_id, recipients, enabled, missed_policy, last_fired, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, cron = excluded.cron,
                 template_id = excluded.template_id, recipients = excluded.recipients,
                 enabled = excluded.enabled, missed_policy = excluded.missed_policy",
            params![
                schedule.id,
                schedule.name,
                schedule.cron,
                schedule.template_id,
                recipients,
                schedule.enabled,
                schedule.missed_policy.as_str(),
                schedule.last_fired.as_ref().map(ts),
                ts(&schedule.created_at),
            ],
        )?;
        Ok(())
    }

    /// Installs the schedule described by `REPORT_SCHEDULE` unless one with
    /// the default id exists.
    pub fn seed_default(&self, config: &Config) -> rusqlite::Result<bool> {
        if self.get(DEFAULT_SCHEDULE_ID)?.is_some() {
            return Ok(false);
        }
        self.upsert(&Schedule {
            id: DEFAULT_SCHEDULE_ID.to_string(),
            name: "Weekly summary".to_string(),
            cron: config.scheduler.default_cron.clone(),
            template_id: DEFAULT_TEMPLATE_ID.to_string(),
            recipients: config.run.default_recipients.clone(),
            enabled: true,
            missed_policy: config.scheduler.default_policy,
            last_fired: None,
            created_at: Utc::now(),
        })?;
        Ok(true)
    }

    /// Claims `slot` for the schedule and records `report` as its pending run,
    /// in one transaction. Returns `false` when the slot was already claimed
    /// (by an earlier process or a racing tick); nothing is written then.
    pub fn claim(&self, schedule_id: &str, slot: DateTime<Utc>, report: &Report) -> Result<bool, ArchiveError> {
        let mut conn = self.db.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let advanced = tx.execute(
            "UPDATE schedules SET last_fired = ?1
             WHERE id = ?2 AND (last_fired IS NULL OR last_fired < ?1)",
            params![ts(&slot), schedule_id],
        )?;
        if advanced == 0 {
            return Ok(false);
        }
        match insert_report(&tx, report, false) {
            Ok(()) => {}
            Err(e) if is_constraint_violation(&e) => return Ok(false),
            Err(e) => return Err(e.into()),
        }
        tx.commit()?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Db::open(dir.path().join("t.sqlite")).unwrap();
        (dir, ScheduleStore::new(db))
    }

    fn schedule() -> Schedule {
        Schedule {
            id: "weekly".into(),
            name: "Weekly".into(),
            cron: "0 7 * * 1".into(),
            template_id: "weekly_summary".into(),
            recipients: vec!["ops@example.com".into()],
            enabled: true,
            missed_policy: MissedSlotPolicy::CatchUp,
            last_fired: None,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        }
    }

    fn report(id: &str, slot: DateTime<Utc>) -> Report {
        let mut report = Report::pending(id.into(), "Weekly".into(), "weekly_summary".into(), slot);
        report.schedule_id = Some("weekly".into());
        report.slot = Some(slot);
        report
    }

    #[test]
    fn a_slot_is_claimed_once() {
        let (_dir, store) = store();
        store.upsert(&schedule()).unwrap();
        let slot = Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap();

        assert!(store.claim("weekly", slot, &report("r1", slot)).unwrap());
        assert!(!store.claim("weekly", slot, &report("r2", slot)).unwrap());
        assert_eq!(store.get("weekly").unwrap().unwrap().last_fired, Some(slot));

        let earlier = Utc.with_ymd_and_hms(2024, 2, 26, 7, 0, 0).unwrap();
        assert!(!store.claim("weekly", earlier, &report("r3", earlier)).unwrap());
    }

    #[test]
    fn editing_keeps_last_fired() {
        let (_dir, store) = store();
        store.upsert(&schedule()).unwrap();
        let slot = Utc.with_ymd_and_hms(2024, 3, 4, 7, 0, 0).unwrap();
        store.claim("weekly", slot, &report("r1", slot)).unwrap();

        let mut edited = schedule();
        edited.cron = "0 8 * * 1".into();
        store.upsert(&edited).unwrap();
        let loaded = store.get("weekly").unwrap().unwrap();
        assert_eq!(loaded.cron, "0 8 * * 1");
        assert_eq!(loaded.last_fired, Some(slot));
    }

    #[test]
    fn default_schedule_is_seeded_once() {
        let (_dir, store) = store();
        let config = Config::from_vars(vec![("REPORT_SCHEDULE".to_string(), "0 6 * * *".to_string())]).unwrap();
        assert!(store.seed_default(&config).unwrap());
        assert!(!store.seed_default(&config).unwrap());
        let seeded = store.get(DEFAULT_SCHEDULE_ID).unwrap().unwrap();
        assert_eq!(seeded.cron, "0 6 * * *");
        assert_eq!(seeded.template_id, DEFAULT_TEMPLATE_ID);
    }
}
