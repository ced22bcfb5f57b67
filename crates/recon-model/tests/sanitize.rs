use chrono::{NaiveDate, NaiveDateTime};
use pretty_assertions::assert_eq;
use recon_model::{is_date_field, parse_date, sanitize_document, sanitize_value, Document, Value};

fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .expect("valid date")
        .and_hms_opt(0, 0, 0)
        .expect("valid time")
}

#[test]
fn null_sentinels_collapse_to_null_for_every_field() {
    for raw in ["none", "NULL", "NaN", "", "   "] {
        assert_eq!(
            sanitize_value(&Value::String(raw.to_string()), "amount"),
            Value::Null,
            "sentinel {raw:?} should sanitize to null"
        );
    }
    assert_eq!(sanitize_value(&Value::Null, "amount"), Value::Null);
}

#[test]
fn strings_are_trimmed_and_kept() {
    assert_eq!(
        sanitize_value(&Value::String("  OK  ".to_string()), "status"),
        Value::String("OK".to_string())
    );
}

#[test]
fn date_field_detection_is_substring_and_case_insensitive() {
    assert!(is_date_field("order_date"));
    assert!(is_date_field("CreatedAt"));
    assert!(is_date_field("valid_from"));
    assert!(is_date_field("dob"));
    assert!(!is_date_field("amount"));
    assert!(!is_date_field("status"));
}

#[test]
fn date_fields_parse_the_supported_formats() {
    let cases = [
        ("2024-01-15", date(2024, 1, 15)),
        (
            "2024-01-15 10:30:45",
            NaiveDate::from_ymd_opt(2024, 1, 15)
                .expect("date")
                .and_hms_opt(10, 30, 45)
                .expect("time"),
        ),
        ("15/01/2024", date(2024, 1, 15)),
        ("15-01-2024", date(2024, 1, 15)),
        ("01-15-2024", date(2024, 1, 15)),
        ("2024/01/15", date(2024, 1, 15)),
        ("15 Jan 2024", date(2024, 1, 15)),
        ("15 January 2024", date(2024, 1, 15)),
        ("Jan 15, 2024", date(2024, 1, 15)),
        ("January 15, 2024", date(2024, 1, 15)),
        ("20240115", date(2024, 1, 15)),
        ("15.01.2024", date(2024, 1, 15)),
        ("2024.01.15", date(2024, 1, 15)),
    ];
    for (raw, expected) in cases {
        assert_eq!(parse_date(raw), Some(expected), "failed for {raw:?}");
    }
}

#[test]
fn ambiguous_day_month_prefers_day_first() {
    // Both readings are valid dates; the day-first format wins by order.
    assert_eq!(parse_date("01/02/2024"), Some(date(2024, 2, 1)));
}

#[test]
fn iso_8601_with_zulu_suffix_parses() {
    let parsed = parse_date("2024-01-15T10:30:45Z").expect("iso timestamp");
    assert_eq!(
        parsed,
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .expect("date")
            .and_hms_opt(10, 30, 45)
            .expect("time")
    );
}

#[test]
fn unparseable_dates_keep_the_trimmed_original() {
    assert_eq!(
        sanitize_value(&Value::String(" not a date ".to_string()), "order_date"),
        Value::String("not a date".to_string())
    );
}

#[test]
fn numeric_day_stamps_parse_on_date_columns() {
    assert_eq!(
        sanitize_value(&Value::Int(20240115), "order_date"),
        Value::Time(date(2024, 1, 15))
    );
    // Non-date columns keep numbers untouched.
    assert_eq!(sanitize_value(&Value::Int(20240115), "amount"), Value::Int(20240115));
}

#[test]
fn sanitization_is_idempotent() {
    let values = [
        Value::String("2024-01-15".to_string()),
        Value::String("none".to_string()),
        Value::String("  spaced  ".to_string()),
        Value::Int(42),
        Value::Null,
    ];
    for value in values {
        for field in ["order_date", "amount"] {
            let once = sanitize_value(&value, field);
            let twice = sanitize_value(&once, field);
            assert_eq!(once, twice, "not idempotent for {value:?} on {field}");
        }
    }
}

#[test]
fn documents_project_to_selected_fields_with_missing_as_null() {
    let mut raw = Document::new();
    raw.insert("order_id", "A1");
    raw.insert("amount", "100");
    raw.insert("extra", "x");

    let selected = vec![
        "order_id".to_string(),
        "amount".to_string(),
        "status".to_string(),
    ];
    let now = date(2024, 6, 1);
    let doc = sanitize_document(&raw, &selected, now);

    assert_eq!(doc.get("order_id"), Some(&Value::String("A1".to_string())));
    assert_eq!(doc.get("amount"), Some(&Value::String("100".to_string())));
    assert_eq!(doc.get("status"), Some(&Value::Null));
    assert_eq!(doc.get("processed_at"), Some(&Value::Time(now)));
    assert!(doc.get("extra").is_none(), "unselected fields are dropped");
}
