use pretty_assertions::assert_eq;
use recon_engine::{evaluate_delta_column, evaluate_reasons, ReconciliationStatus};
use recon_model::{DeltaColumn, Document, MissingDeltaPolicy, Reason, Value};

fn delta(name: &str, value: &str) -> DeltaColumn {
    DeltaColumn {
        delta_column_name: name.to_string(),
        value: value.to_string(),
    }
}

fn reason(name: &str, column: &str, threshold: f64, must_check: bool) -> Reason {
    Reason {
        reason: name.to_string(),
        delta_column: column.to_string(),
        threshold,
        must_check,
    }
}

#[test]
fn delta_expressions_resolve_fields_case_insensitively() {
    let mut fields = Document::new();
    fields.insert("expected", 100i64);
    fields.insert("actual", 97i64);

    assert_eq!(
        evaluate_delta_column(&delta("diff", "EXPECTED - ACTUAL"), &fields),
        3.0
    );
    assert_eq!(
        evaluate_delta_column(&delta("diff", "expected - actual"), &fields),
        3.0
    );
}

#[test]
fn unknown_identifiers_substitute_zero() {
    let mut fields = Document::new();
    fields.insert("expected", 100i64);
    assert_eq!(
        evaluate_delta_column(&delta("diff", "EXPECTED - GHOST_FIELD"), &fields),
        100.0
    );
}

#[test]
fn mapping_keys_and_stamps_are_not_operands() {
    let mut fields = Document::new();
    fields.insert("orders_mapping_key", "A1");
    fields.insert("expected", 10i64);
    // The mapping key does not leak into the expression as an operand.
    assert_eq!(
        evaluate_delta_column(&delta("diff", "expected + orders_mapping_key"), &fields),
        10.0
    );
}

#[test]
fn evaluation_failures_yield_zero() {
    let mut fields = Document::new();
    fields.insert("expected", 1i64);
    assert_eq!(evaluate_delta_column(&delta("bad", "expected / 0"), &fields), 0.0);
    assert_eq!(evaluate_delta_column(&delta("", "expected"), &fields), 0.0);
}

#[test]
fn reason_matches_when_abs_delta_exceeds_abs_threshold() {
    let mut fields = Document::new();
    fields.insert("diff", 3i64);

    let outcome = evaluate_reasons(
        &[reason("amount_mismatch", "diff", 2.0, false)],
        &fields,
        MissingDeltaPolicy::Zero,
    );
    assert_eq!(outcome.reason, "amount_mismatch");
    assert_eq!(outcome.status, ReconciliationStatus::Unreconciled);

    let outcome = evaluate_reasons(
        &[reason("amount_mismatch", "diff", 5.0, false)],
        &fields,
        MissingDeltaPolicy::Zero,
    );
    assert_eq!(outcome.reason, "");
    assert_eq!(outcome.status, ReconciliationStatus::Reconciled);
}

#[test]
fn negative_deltas_compare_by_absolute_value() {
    let mut fields = Document::new();
    fields.insert("diff", Value::Float(-4.0));
    let outcome = evaluate_reasons(
        &[reason("mismatch", "diff", 2.0, false)],
        &fields,
        MissingDeltaPolicy::Zero,
    );
    assert_eq!(outcome.status, ReconciliationStatus::Unreconciled);
}

#[test]
fn must_check_false_skips_after_first_match() {
    let mut fields = Document::new();
    fields.insert("diff_a", 10i64);
    fields.insert("diff_b", 10i64);
    fields.insert("diff_c", 10i64);

    let outcome = evaluate_reasons(
        &[
            reason("first", "diff_a", 1.0, false),
            reason("second", "diff_b", 1.0, false),
            reason("forced", "diff_c", 1.0, true),
        ],
        &fields,
        MissingDeltaPolicy::Zero,
    );
    // `second` is skipped once `first` matched; `forced` still runs.
    assert_eq!(outcome.reason, "first, forced");
}

#[test]
fn missing_delta_column_follows_the_policy() {
    let fields = Document::new();
    let reasons = [reason("ghost", "missing_diff", 1.0, false)];

    let outcome = evaluate_reasons(&reasons, &fields, MissingDeltaPolicy::Zero);
    assert_eq!(outcome.status, ReconciliationStatus::Reconciled);

    let outcome = evaluate_reasons(&reasons, &fields, MissingDeltaPolicy::Unreconciled);
    assert_eq!(outcome.status, ReconciliationStatus::Unreconciled);
    assert_eq!(outcome.reason, "ghost");
}

#[test]
fn empty_reason_list_reconciles() {
    let outcome = evaluate_reasons(&[], &Document::new(), MissingDeltaPolicy::Zero);
    assert_eq!(outcome.reason, "");
    assert_eq!(outcome.status, ReconciliationStatus::Reconciled);
}
