//! Five-field cron expressions evaluated in UTC on top of the `cron` crate.
//!
//! `minute hour day-of-month month day-of-week`, each field accepting `*`,
//! values, `a-b` ranges, `/step` suffixes and comma lists. Months and
//! weekdays also take three-letter names; weekdays count from `0` (Sunday)
//! and `7` is Sunday too. When both day fields are restricted a day matches
//! if either does, as in classic cron. `@hourly`, `@daily`, `@weekly`,
//! `@monthly` and `@yearly` are accepted.
//!
//! The `cron` crate wants a leading seconds field, numbers weekdays from
//! `1` (Sunday) and requires both day fields to match, so expressions are
//! rewritten before they reach it.

use crate::error::CronError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

const FIELDS: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];
const DOM: usize = 2;
const DOW: usize = 4;

#[derive(Clone)]
pub struct CronSchedule {
    expr: String,
    /// Matching any one of these is a firing time.
    schedules: Vec<::cron::Schedule>,
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expr).finish()
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expr == other.expr
    }
}

impl Eq for CronSchedule {}

fn invalid(field: &'static str, value: &str) -> CronError {
    CronError::InvalidField {
        field,
        value: value.to_string(),
    }
}

/// Rejects zero steps and descending numeric ranges.
fn check_items(raw: &str, field: &'static str) -> Result<(), CronError> {
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (item, None),
        };
        if matches!(step.map(str::parse::<u32>), Some(Ok(0)) | Some(Err(_))) {
            return Err(invalid(field, raw));
        }
        if let Some((lo, hi)) = range.split_once('-') {
            if let (Ok(lo), Ok(hi)) = (lo.parse::<u32>(), hi.parse::<u32>()) {
                if lo > hi {
                    return Err(invalid(field, raw));
                }
            }
        }
    }
    Ok(())
}

/// Renumbers numeric weekdays from the `0..=7` convention to the crate's
/// `1..=7`, where `1` is Sunday. Names and `*` based items pass unchanged.
fn weekday_field(raw: &str) -> Result<String, CronError> {
    let field = FIELDS[DOW];
    let mut items = Vec::new();
    for item in raw.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().map_err(|_| invalid(field, raw))?),
            None => (item, 1),
        };
        let number = |s: &str| s.parse::<u32>().ok();
        let (lo, hi) = match range.split_once('-') {
            Some((a, b)) => match (number(a), number(b)) {
                (Some(a), Some(b)) => (a, b),
                (None, None) => {
                    items.push(item.to_string());
                    continue;
                }
                _ => return Err(invalid(field, raw)),
            },
            None => match number(range) {
                // `1/2` runs from Monday to the end of the week.
                Some(v) if item.contains('/') => (v, 6),
                Some(v) => (v, v),
                None => {
                    items.push(item.to_string());
                    continue;
                }
            },
        };
        if lo > hi || hi > 7 || step == 0 {
            return Err(invalid(field, raw));
        }
        items.extend((lo..=hi).step_by(step).map(|d| (d % 7 + 1).to_string()));
    }
    Ok(items.join(","))
}

/// Whether a day field narrows the days, in the classic cron sense.
fn restricts(field: &str) -> bool {
    !field.starts_with('*') && field != "?"
}

fn build(fields: &[String; 5]) -> Option<::cron::Schedule> {
    ::cron::Schedule::from_str(&format!("0 {}", fields.join(" "))).ok()
}

/// Finds the field the crate refused by parsing each one on its own.
fn blame(fields: &[String; 5]) -> CronError {
    for (idx, name) in FIELDS.iter().enumerate() {
        let mut alone: [String; 5] = Default::default();
        for (i, slot) in alone.iter_mut().enumerate() {
            *slot = if i == idx { fields[i].clone() } else { "*".to_string() };
        }
        if build(&alone).is_none() {
            return invalid(name, &fields[idx]);
        }
    }
    invalid("expression", &fields.join(" "))
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, CronError> {
        let expanded = match expr.trim() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            other => other,
        };
        let raw: Vec<&str> = expanded.split_whitespace().collect();
        if raw.len() != FIELDS.len() {
            return Err(CronError::FieldCount(raw.len()));
        }
        for (value, field) in raw.iter().zip(FIELDS) {
            check_items(value, field)?;
        }
        let mut fields: [String; 5] = Default::default();
        for (slot, value) in fields.iter_mut().zip(&raw) {
            *slot = value.to_string();
        }
        fields[DOW] = weekday_field(raw[DOW])?;

        let variants = if restricts(&fields[DOM]) && restricts(&fields[DOW]) {
            let mut by_date = fields.clone();
            by_date[DOW] = "*".to_string();
            let mut by_weekday = fields.clone();
            by_weekday[DOM] = "*".to_string();
            vec![by_date, by_weekday]
        } else {
            vec![fields.clone()]
        };
        let schedules = variants
            .iter()
            .map(|f| build(f).ok_or_else(|| blame(f)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            expr: fields.join(" "),
            schedules,
        })
    }

    /// First firing time strictly after `after`, or `None` if the expression
    /// cannot fire (e.g. February 30th).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
    }

    /// Firing times in `(after, until]`, oldest first.
    pub fn slots_between(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> impl Iterator<Item = DateTime<Utc>> + '_ {
        std::iter::successors(self.next_after(after), move |prev| self.next_after(*prev))
            .take_while(move |slot| *slot <= until)
    }
}
