//! Per-field value cleaning applied when rows are promoted from a raw
//! collection into its processed counterpart.

use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::document::Document;
use crate::meta;
use crate::value::Value;

/// Field-name fragments that mark a column as date-bearing.
const DATE_FIELD_HINTS: &[&str] = &[
    "date", "time", "timestamp", "created", "updated", "modified", "dob", "birth", "expiry",
    "expires", "valid", "start", "end",
];

/// Literal strings that sanitize to null, compared case-insensitively.
const NULL_SENTINELS: &[&str] = &["none", "null", "nan"];

enum Fmt {
    Date(&'static str),
    DateTime(&'static str),
}

/// Formats tried in order. Day-first forms precede month-first forms, so an
/// ambiguous `01/02/2024` reads as the 1st of February.
const DATE_FORMATS: &[Fmt] = &[
    Fmt::Date("%Y-%m-%d"),
    Fmt::DateTime("%Y-%m-%d %H:%M:%S"),
    Fmt::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    Fmt::Date("%d/%m/%Y"),
    Fmt::Date("%d-%m-%Y"),
    Fmt::Date("%m/%d/%Y"),
    Fmt::Date("%m-%d-%Y"),
    Fmt::DateTime("%d/%m/%Y %H:%M:%S"),
    Fmt::DateTime("%d-%m-%Y %H:%M:%S"),
    Fmt::Date("%Y/%m/%d"),
    Fmt::DateTime("%Y/%m/%d %H:%M:%S"),
    Fmt::Date("%d %b %Y"),
    Fmt::Date("%d %B %Y"),
    Fmt::Date("%b %d, %Y"),
    Fmt::Date("%B %d, %Y"),
    Fmt::Date("%Y%m%d"),
    Fmt::Date("%d.%m.%Y"),
    Fmt::Date("%Y.%m.%d"),
];

/// True when the field name contains any date hint (case-insensitive
/// substring match).
pub fn is_date_field(field_name: &str) -> bool {
    let lower = field_name.to_ascii_lowercase();
    DATE_FIELD_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Try the ordered format list, then ISO-8601 with `Z` normalized to
/// `+00:00`. `None` when nothing matches.
pub fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let value = text.trim();
    if value.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        match fmt {
            Fmt::Date(pattern) => {
                if let Ok(date) = NaiveDate::parse_from_str(value, pattern) {
                    return date.and_hms_opt(0, 0, 0);
                }
            }
            Fmt::DateTime(pattern) => {
                if let Ok(dt) = NaiveDateTime::parse_from_str(value, pattern) {
                    return Some(dt);
                }
            }
        }
    }

    let iso = value.replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&iso) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

fn is_null_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || NULL_SENTINELS.iter().any(|s| trimmed.eq_ignore_ascii_case(s))
}

/// Sanitize one value. Null sentinels collapse to null for every field;
/// date-hinted fields additionally attempt date parsing, keeping the
/// trimmed original on failure. Idempotent.
pub fn sanitize_value(value: &Value, field_name: &str) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => {
            if is_null_sentinel(s) {
                return Value::Null;
            }
            let trimmed = s.trim();
            if is_date_field(field_name) {
                if let Some(dt) = parse_date(trimmed) {
                    return Value::Time(dt);
                }
            }
            Value::String(trimmed.to_string())
        }
        Value::Int(n) if is_date_field(field_name) => {
            // Numeric day stamps like 20240115 still parse on date columns.
            match parse_date(&n.to_string()) {
                Some(dt) => Value::Time(dt),
                None => value.clone(),
            }
        }
        other => other.clone(),
    }
}

/// Project a raw document to `selected_fields`, sanitizing each value.
/// Missing fields become explicit nulls; `processed_at` is stamped with the
/// supplied promotion time.
pub fn sanitize_document(
    document: &Document,
    selected_fields: &[String],
    processed_at: NaiveDateTime,
) -> Document {
    let mut sanitized = Document::new();
    for field in selected_fields {
        let value = match document.get(field) {
            Some(value) => sanitize_value(value, field),
            None => Value::Null,
        };
        sanitized.insert(field.clone(), value);
    }
    sanitized.insert(meta::PROCESSED_AT, Value::Time(processed_at));
    sanitized
}
