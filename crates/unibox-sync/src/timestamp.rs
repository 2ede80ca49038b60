// SPDX-FileCopyrightText: 2026 Unibox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Timestamp unification.
//!
//! Platforms report times as fractional Unix seconds (`"1753303953.454369"`),
//! integer epoch seconds or milliseconds, or ISO-8601 strings. Everything is
//! converted to the canonical storage format; unparseable input yields `None`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use unibox_core::types::format_iso;

/// Integer strings longer than this are epoch milliseconds, shorter ones seconds.
const SECONDS_DIGITS: usize = 10;

/// Fewer integer digits than this is not an epoch value (e.g. a bare year).
const MIN_EPOCH_DIGITS: usize = 9;

/// Normalizes a raw platform timestamp to `%Y-%m-%dT%H:%M:%S%.3fZ`.
pub fn normalize_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw).map(format_iso)
}

/// Normalizes a JSON value holding a timestamp string or number.
pub fn normalize_timestamp_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => normalize_timestamp(s),
        serde_json::Value::Number(n) => normalize_timestamp(&n.to_string()),
        _ => None,
    }
}

/// Parses a raw platform timestamp into a UTC instant.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if is_decimal(raw) {
        return parse_epoch(raw);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Whether `raw` looks like epoch seconds or millis, optionally fractional.
fn is_decimal(raw: &str) -> bool {
    let (integer, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    integer.len() >= MIN_EPOCH_DIGITS
        && integer.bytes().all(|b| b.is_ascii_digit())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

fn parse_epoch(raw: &str) -> Option<DateTime<Utc>> {
    if raw.contains('.') {
        let seconds: f64 = raw.parse().ok()?;
        let millis = (seconds * 1000.0).trunc();
        if !millis.is_finite() {
            return None;
        }
        return DateTime::from_timestamp_millis(millis as i64);
    }
    let value: i64 = raw.parse().ok()?;
    if raw.len() > SECONDS_DIGITS {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}
