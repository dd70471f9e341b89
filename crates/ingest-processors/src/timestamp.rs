// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Timestamp extraction for text captured out of log payloads.
//!
//! Zone-aware formats are converted to UTC directly. Formats that carry no zone are
//! interpreted in the configured [`TimeZone`] (UTC unless overridden).

use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, FixedOffset, Local, NaiveDateTime, TimeDelta, TimeZone as _, Utc,
};
use chrono_tz::Tz;

/// Formats that carry their own offset.
const ZONED_FORMATS: &[&str] = &[
    // Apache access log
    "%d/%b/%Y:%H:%M:%S %z",
    // Ruby date
    "%a %b %d %H:%M:%S %z %Y",
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
];

/// Formats without an offset.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    // ANSIC
    "%a %b %e %H:%M:%S %Y",
    "%d/%b/%Y:%H:%M:%S",
    "%Y/%m/%d %H:%M:%S%.f",
];

const ZULU_NAMES: &[&str] = &["UTC", "GMT", "Z", "UT"];

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("captured timestamp is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("invalid timezone {0:?}, expected UTC, Local, an IANA name or an offset like +05:30")]
    InvalidTimezone(String),

    #[error("invalid timestamp format {0:?}")]
    InvalidFormat(String),
}

/// Zone used for timestamps that do not carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeZone {
    #[default]
    Utc,
    Local,
    Fixed(FixedOffset),
    /// IANA location, daylight saving aware.
    Named(Tz),
}

impl TimeZone {
    pub fn parse(text: &str) -> Result<Self, TimestampError> {
        let trimmed = text.trim();
        if ZULU_NAMES.iter().any(|z| z.eq_ignore_ascii_case(trimmed)) {
            return Ok(TimeZone::Utc);
        }
        if trimmed.eq_ignore_ascii_case("local") {
            return Ok(TimeZone::Local);
        }
        if let Some(offset) = parse_offset(trimmed) {
            return Ok(TimeZone::Fixed(offset));
        }
        trimmed
            .parse::<Tz>()
            .map(TimeZone::Named)
            .map_err(|_| TimestampError::InvalidTimezone(text.to_string()))
    }

    fn resolve(&self, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            TimeZone::Utc => Some(Utc.from_utc_datetime(naive)),
            TimeZone::Local => resolve_in(&Local, naive),
            TimeZone::Fixed(offset) => resolve_in(offset, naive),
            TimeZone::Named(tz) => resolve_in(tz, naive),
        }
    }
}

/// Wall clock time in `zone`. Times repeated by a backward transition take the earlier
/// instant; times skipped by a forward transition are pushed one hour later.
fn resolve_in<Z: chrono::TimeZone>(zone: &Z, naive: &NaiveDateTime) -> Option<DateTime<Utc>> {
    zone.from_local_datetime(naive)
        .earliest()
        .or_else(|| {
            let shifted = naive.checked_add_signed(TimeDelta::hours(1))?;
            zone.from_local_datetime(&shifted).earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses `+HH:MM`, `-HHMM` or `+HH`.
fn parse_offset(text: &str) -> Option<FixedOffset> {
    let (sign, rest) = match text.as_bytes().first()? {
        b'+' => (1, &text[1..]),
        b'-' => (-1, &text[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let (hours, minutes) = match digits.len() {
        2 => (digits.parse::<i32>().ok()?, 0),
        4 => (
            digits[..2].parse::<i32>().ok()?,
            digits[2..].parse::<i32>().ok()?,
        ),
        _ => return None,
    };
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Extracts timestamps from captured text.
#[derive(Debug, Clone, Default)]
pub struct TimestampExtractor {
    format_override: Option<String>,
    zone: TimeZone,
}

impl TimestampExtractor {
    pub fn new(format_override: Option<String>, zone: TimeZone) -> Result<Self, TimestampError> {
        if let Some(format) = &format_override {
            if format.trim().is_empty()
                || StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
            {
                return Err(TimestampError::InvalidFormat(format.clone()));
            }
        }
        Ok(TimestampExtractor {
            format_override,
            zone,
        })
    }

    /// Returns `Ok(None)` when no known format matches the text.
    pub fn extract(&self, raw: &[u8]) -> Result<Option<DateTime<Utc>>, TimestampError> {
        let text = std::str::from_utf8(raw)?.trim();
        if text.is_empty() {
            return Ok(None);
        }
        if let Some(format) = &self.format_override {
            return Ok(self.parse_with(text, format));
        }
        Ok(self.parse_known(text))
    }

    fn parse_with(&self, text: &str, format: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .and_then(|naive| self.zone.resolve(&naive))
    }

    fn parse_known(&self, text: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        // Covers RFC1123, RFC1123Z, RFC822 and RFC822Z.
        if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ZONED_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(text, format) {
                return Some(dt.with_timezone(&Utc));
            }
        }
        for format in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
                return self.zone.resolve(&naive);
            }
        }
        self.parse_unix_date(text)
            .or_else(|| self.parse_syslog(text))
            .or_else(|| parse_epoch(text))
    }

    /// `Mon Jan _2 15:04:05 MST 2006`. Zone abbreviations are ambiguous, only the UTC
    /// family is honoured, anything else falls back to the configured zone.
    fn parse_unix_date(&self, text: &str) -> Option<DateTime<Utc>> {
        let fields: Vec<&str> = text.split_whitespace().collect();
        if fields.len() != 6 || !fields[4].chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }
        let without_zone = format!(
            "{} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], fields[5]
        );
        let naive = NaiveDateTime::parse_from_str(&without_zone, "%a %b %e %H:%M:%S %Y").ok()?;
        if ZULU_NAMES.iter().any(|z| z.eq_ignore_ascii_case(fields[4])) {
            Some(Utc.from_utc_datetime(&naive))
        } else {
            self.zone.resolve(&naive)
        }
    }

    /// BSD syslog `Jan _2 15:04:05`, which has no year: the current one is assumed.
    fn parse_syslog(&self, text: &str) -> Option<DateTime<Utc>> {
        let year = Utc::now().year();
        let with_year = format!("{} {}", year, text);
        NaiveDateTime::parse_from_str(&with_year, "%Y %b %e %H:%M:%S%.f")
            .ok()
            .and_then(|naive| self.zone.resolve(&naive))
    }
}

/// Unix epoch seconds (10 digits, optional fraction) or milliseconds (13 digits).
fn parse_epoch(text: &str) -> Option<DateTime<Utc>> {
    let (whole, fraction) = match text.split_once('.') {
        Some((w, f)) => (w, Some(f)),
        None => (text, None),
    };
    if !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    match (whole.len(), fraction) {
        (10, None) => DateTime::from_timestamp(whole.parse().ok()?, 0),
        (10, Some(f)) if !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()) => {
            let digits: String = f.chars().chain(std::iter::repeat('0')).take(9).collect();
            DateTime::from_timestamp(whole.parse().ok()?, digits.parse().ok()?)
        }
        (13, None) => DateTime::from_timestamp_millis(whole.parse().ok()?),
        _ => None,
    }
}
