//! Per-section value formatting.
//!
//! Numbers are grouped with the section locale's separators (num-format's
//! CLDR tables); timestamps are shifted to the section's fixed UTC offset.
//! Nothing depends on the host locale or timezone.

use crate::error::RenderError;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use common::model::template::SectionFormat;
use num_format::{Locale, ToFormattedString};
use serde_json::Value;
use std::fmt::Write;

const MAX_PRECISION: u8 = 10;

#[derive(Debug, Clone)]
pub struct Formatter {
    locale: Locale,
    precision: usize,
    offset: FixedOffset,
    date_format: String,
}

/// Parses `UTC`, `Z`, `+02:00`, `-0500` or `+02`.
pub fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("utc") || raw == "Z" {
        return FixedOffset::east_opt(0);
    }
    let (sign, rest) = match raw.chars().next()? {
        '+' => (1, &raw[1..]),
        '-' => (-1, &raw[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (digits[..2].parse::<i32>().ok()?, digits[2..].parse::<i32>().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

impl Formatter {
    pub fn new(format: &SectionFormat) -> Result<Self, RenderError> {
        let locale = Locale::from_name(&format.locale).map_err(|_| {
            RenderError::MalformedTemplate(format!("unknown locale '{}'", format.locale))
        })?;
        if format.precision > MAX_PRECISION {
            return Err(RenderError::MalformedTemplate(format!(
                "precision {} exceeds {}",
                format.precision, MAX_PRECISION
            )));
        }
        let offset = parse_offset(&format.timezone).ok_or_else(|| {
            RenderError::MalformedTemplate(format!("unsupported timezone '{}'", format.timezone))
        })?;
        if StrftimeItems::new(&format.date_format).any(|item| matches!(item, Item::Error)) {
            return Err(RenderError::MalformedTemplate(format!(
                "invalid date format '{}'",
                format.date_format
            )));
        }
        Ok(Self {
            locale,
            precision: format.precision as usize,
            offset,
            date_format: format.date_format.clone(),
        })
    }

    pub fn integer(&self, value: i64) -> String {
        let digits = value.unsigned_abs().to_formatted_string(&self.locale);
        if value < 0 {
            format!("{}{}", self.locale.minus_sign(), digits)
        } else {
            digits
        }
    }

    /// Formats with the section precision.
    pub fn decimal(&self, value: f64) -> String {
        if !value.is_finite() {
            return "n/a".to_string();
        }
        let fixed = format!("{:.*}", self.precision, value.abs());
        let (int_part, frac_part) = match fixed.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (fixed.as_str(), None),
        };
        let grouped = int_part
            .parse::<u64>()
            .map(|i| i.to_formatted_string(&self.locale))
            .unwrap_or_else(|_| int_part.to_string());
        let is_zero = fixed.chars().all(|c| c == '0' || c == '.');
        let sign = if value < 0.0 && !is_zero {
            self.locale.minus_sign()
        } else {
            ""
        };
        match frac_part {
            Some(frac) => format!("{}{}{}{}", sign, grouped, self.locale.decimal(), frac),
            None => format!("{}{}", sign, grouped),
        }
    }

    /// Integral JSON numbers keep no decimals; everything else uses the precision.
    pub fn number(&self, value: &serde_json::Number) -> String {
        match value.as_i64() {
            Some(i) => self.integer(i),
            None => self.decimal(value.as_f64().unwrap_or(f64::NAN)),
        }
    }

    fn timestamp(&self, at: DateTime<FixedOffset>) -> Option<String> {
        let mut out = String::new();
        write!(out, "{}", at.format(&self.date_format)).ok()?;
        Some(out)
    }

    /// Re-renders RFC 3339 timestamps and `YYYY-MM-DD` dates; `None` for
    /// any other text. Plain dates are taken as midnight in the section offset.
    pub fn date_text(&self, raw: &str) -> Option<String> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return self.timestamp(ts.with_timezone(&self.offset));
        }
        let midnight = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()?
            .and_hms_opt(0, 0, 0)?;
        let local = self.offset.from_local_datetime(&midnight).single()?;
        self.timestamp(local)
    }

    pub fn cell(&self, value: &Value) -> String {
        match value {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => self.number(n),
            Value::String(s) => self.date_text(s).unwrap_or_else(|| s.clone()),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn formatter(locale: &str, precision: u8, timezone: &str) -> Formatter {
        Formatter::new(&SectionFormat {
            locale: locale.to_string(),
            precision,
            timezone: timezone.to_string(),
            date_format: "%d.%m.%Y %H:%M".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn numbers_follow_locale_and_precision() {
        let en = formatter("en", 2, "UTC");
        assert_eq!(en.cell(&json!(1234567)), "1,234,567");
        assert_eq!(en.cell(&json!(1234.5)), "1,234.50");
        assert_eq!(en.decimal(-0.001), "0.00");
        assert_eq!(en.decimal(-12.346), "-12.35");

        let de = formatter("de", 1, "UTC");
        assert_eq!(de.cell(&json!(1234.56)), "1.234,6");
    }

    #[test]
    fn timestamps_use_fixed_offset() {
        let f = formatter("en", 2, "+02:00");
        assert_eq!(f.cell(&json!("2024-03-04T23:30:00Z")), "05.03.2024 01:30");
        assert_eq!(f.cell(&json!("2024-03-04")), "04.03.2024 00:00");
        assert_eq!(f.cell(&json!("North")), "North");
    }

    #[test]
    fn offsets() {
        assert_eq!(parse_offset("-0500"), FixedOffset::west_opt(5 * 3600));
        assert_eq!(parse_offset("+05:30"), FixedOffset::east_opt(5 * 3600 + 1800));
        assert_eq!(parse_offset("Europe/Paris"), None);
    }

    #[test]
    fn invalid_settings_are_malformed() {
        let bad = |f: SectionFormat| matches!(Formatter::new(&f), Err(RenderError::MalformedTemplate(_)));
        assert!(bad(SectionFormat {
            locale: "xx-nowhere".into(),
            ..SectionFormat::default()
        }));
        assert!(bad(SectionFormat {
            timezone: "CET".into(),
            ..SectionFormat::default()
        }));
        assert!(bad(SectionFormat {
            date_format: "%Q".into(),
            ..SectionFormat::default()
        }));
    }
}
