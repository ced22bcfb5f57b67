use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use recon_model::{Document, Value};
use serde_json::json;

#[test]
fn scalar_values_round_trip_through_json() {
    let values = [
        Value::Null,
        Value::Bool(true),
        Value::Int(-42),
        Value::Float(1.5),
        Value::String("hello".to_string()),
        Value::Array(vec![Value::Int(1), Value::String("x".to_string())]),
    ];
    for value in values {
        let text = serde_json::to_string(&value).expect("serialize");
        let back: Value = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, value);
    }
}

#[test]
fn timestamps_round_trip_as_tagged_objects() {
    let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
        .expect("date")
        .and_hms_opt(10, 30, 45)
        .expect("time");
    let value = Value::Time(ts);

    let json = serde_json::to_value(&value).expect("serialize");
    assert_eq!(json, json!({ "$dt": "2024-01-15T10:30:45" }));

    let back: Value = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, value);
}

#[test]
fn timestamps_with_fractional_seconds_round_trip() {
    let ts = NaiveDate::from_ymd_opt(2024, 1, 15)
        .expect("date")
        .and_hms_micro_opt(10, 30, 45, 123_456)
        .expect("time");
    let text = serde_json::to_string(&Value::Time(ts)).expect("serialize");
    let back: Value = serde_json::from_str(&text).expect("deserialize");
    assert_eq!(back, Value::Time(ts));
}

#[test]
fn unexpected_nested_objects_are_rejected() {
    let err = serde_json::from_value::<Value>(json!({ "nested": {"a": 1} }));
    assert!(err.is_err(), "nested objects are not document values");
}

#[test]
fn documents_round_trip_preserving_null_attributes() {
    let mut doc = Document::new();
    doc.insert("order_id", "A1");
    doc.insert("amount", 100i64);
    doc.insert("missing", Value::Null);

    let text = serde_json::to_string(&doc).expect("serialize");
    let back: Document = serde_json::from_str(&text).expect("deserialize");
    assert_eq!(back, doc);
    assert_eq!(back.get("missing"), Some(&Value::Null));
}

#[test]
fn numeric_results_collapse_to_integers_when_integral() {
    assert_eq!(Value::from_numeric(14.0), Value::Int(14));
    assert_eq!(Value::from_numeric(-3.0), Value::Int(-3));
    assert_eq!(Value::from_numeric(0.1), Value::Float(0.1));
}

#[test]
fn numeric_coercion_accepts_numeric_strings() {
    assert_eq!(Value::String(" 100 ".to_string()).as_f64(), Some(100.0));
    assert_eq!(Value::String("1.5".to_string()).as_f64(), Some(1.5));
    assert_eq!(Value::String("OK".to_string()).as_f64(), None);
    assert_eq!(Value::Int(7).as_f64(), Some(7.0));
    assert_eq!(Value::Null.as_f64(), None);
}
