use pretty_assertions::assert_eq;
use recon_engine::{evaluate_formula, EvalError, FormulaOutputs, RowContext};
use recon_model::{ConditionKind, Document, Formula, PiecewiseClause, Value};

fn formula(key: &str, text: &str) -> Formula {
    Formula {
        logic_name_key: key.to_string(),
        formula_text: text.to_string(),
        fields: Vec::new(),
        conditions: Vec::new(),
    }
}

fn clause(kind: ConditionKind, value1: &str, value2: &str, result: &str) -> PiecewiseClause {
    PiecewiseClause {
        condition_type: kind,
        value1: value1.to_string(),
        value2: value2.to_string(),
        formula_value: result.to_string(),
    }
}

fn eval(f: &Formula, row: &Document, derived: &Document) -> Result<f64, EvalError> {
    let ctx = RowContext::local("zomato", row);
    evaluate_formula(f, &ctx, derived, &FormulaOutputs::from_formulas(std::slice::from_ref(f)))
}

#[test]
fn numeric_literals_survive_substitution() {
    // `0.05` must not parse as a collection reference.
    let mut row = Document::new();
    row.insert("taxes", 200i64);
    let result = eval(
        &formula("TAX_SHARE", "zomato.taxes * 0.05"),
        &row,
        &Document::new(),
    )
    .expect("eval");
    assert_eq!(result, 10.0);
}

#[test]
fn missing_or_non_numeric_fields_substitute_zero() {
    let mut row = Document::new();
    row.insert("note", "n/a");
    let result = eval(
        &formula("SUM_TOTAL", "zomato.absent + zomato.note + 5"),
        &row,
        &Document::new(),
    )
    .expect("eval");
    assert_eq!(result, 5.0);
}

#[test]
fn numeric_strings_coerce() {
    let mut row = Document::new();
    row.insert("amount", "100");
    row.insert("fee", "2.5");
    let result = eval(
        &formula("NET_AMOUNT", "zomato.amount - zomato.fee"),
        &row,
        &Document::new(),
    )
    .expect("eval");
    assert_eq!(result, 97.5);
}

#[test]
fn derived_references_resolve_case_insensitively() {
    let mut derived = Document::new();
    derived.insert("commission_value", 40i64);

    // Uppercase spelling in the expression, lowercase stored key.
    let result = eval(
        &formula("DOUBLE_COMMISSION", "COMMISSION_VALUE * 2"),
        &Document::new(),
        &derived,
    )
    .expect("eval");
    assert_eq!(result, 80.0);

    // Lowercase spelling also resolves.
    let result = eval(
        &formula("HALF_COMMISSION", "commission_value / 2"),
        &Document::new(),
        &derived,
    )
    .expect("eval");
    assert_eq!(result, 20.0);
}

#[test]
fn system_fields_never_substitute() {
    let mut derived = Document::new();
    derived.insert("processed_at", "2024-01-01");
    derived.insert("orders_mapping_key", "A1");
    let err = eval(
        &formula("BROKEN_REF", "PROCESSED_AT + 1"),
        &Document::new(),
        &derived,
    )
    .expect_err("unresolved");
    assert!(matches!(err, EvalError::UnresolvedReferences(refs) if refs == vec!["PROCESSED_AT"]));
}

#[test]
fn unresolved_references_fail_the_row() {
    let err = eval(
        &formula("NEEDS_INPUT", "MISSING_FIELD + 1"),
        &Document::new(),
        &Document::new(),
    )
    .expect_err("unresolved");
    assert!(matches!(err, EvalError::UnresolvedReferences(_)));
}

#[test]
fn division_by_zero_is_signalled() {
    let mut row = Document::new();
    row.insert("qty", 0i64);
    let err = eval(
        &formula("PER_UNIT", "100 / zomato.qty"),
        &row,
        &Document::new(),
    )
    .expect_err("division");
    assert_eq!(err, EvalError::DivisionByZero);
}

#[test]
fn piecewise_conditions_replace_the_base_value() {
    let mut f = formula("SLAB_RATE", "orders.qty");
    f.conditions = vec![
        clause(ConditionKind::Between, "1", "10", "0.10"),
        clause(ConditionKind::Between, "11", "100", "0.20"),
        clause(ConditionKind::GreaterThan, "100", "", "0.30"),
    ];

    for (qty, expected) in [(5i64, 0.10), (50, 0.20), (200, 0.30)] {
        let mut row = Document::new();
        row.insert("qty", qty);
        let ctx = RowContext::local("orders", &row);
        let result = evaluate_formula(
            &f,
            &ctx,
            &Document::new(),
            &FormulaOutputs::from_formulas(std::slice::from_ref(&f)),
        )
        .expect("eval");
        assert_eq!(result, expected, "qty {qty}");
    }
}

#[test]
fn piecewise_without_match_yields_zero() {
    let mut f = formula("SLAB_RATE", "orders.qty");
    f.conditions = vec![clause(ConditionKind::Between, "1", "10", "0.10")];
    let mut row = Document::new();
    row.insert("qty", 0i64);
    let ctx = RowContext::local("orders", &row);
    let result = evaluate_formula(
        &f,
        &ctx,
        &Document::new(),
        &FormulaOutputs::from_formulas(std::slice::from_ref(&f)),
    )
    .expect("eval");
    assert_eq!(result, 0.0);
}

#[test]
fn piecewise_comparisons_cover_all_kinds() {
    let cases = [
        (ConditionKind::Equal, "5", "", 5.0, true),
        (ConditionKind::Equal, "5", "", 6.0, false),
        (ConditionKind::GreaterEqual, "5", "", 5.0, true),
        (ConditionKind::LessThan, "5", "", 4.0, true),
        (ConditionKind::LessEqual, "5", "", 6.0, false),
    ];
    for (kind, v1, v2, base, should_match) in cases {
        let mut f = formula("CHECK_VALUE", "orders.base");
        f.conditions = vec![clause(kind, v1, v2, "1")];
        let mut row = Document::new();
        row.insert("base", Value::Float(base));
        let ctx = RowContext::local("orders", &row);
        let result = evaluate_formula(
            &f,
            &ctx,
            &Document::new(),
            &FormulaOutputs::from_formulas(std::slice::from_ref(&f)),
        )
        .expect("eval");
        let expected = if should_match { 1.0 } else { 0.0 };
        assert_eq!(result, expected, "{kind:?} against {base}");
    }
}

#[test]
fn foreign_rows_resolve_other_collections_references() {
    let mut refunds_row = Document::new();
    refunds_row.insert("rfd", 30i64);

    let mut orders_row = Document::new();
    orders_row.insert("amt", 100i64);
    let mut foreign = std::collections::BTreeMap::new();
    foreign.insert("orders".to_string(), orders_row);

    let ctx = RowContext {
        base: "refunds",
        row: &refunds_row,
        foreign: &foreign,
    };
    let f = formula("NET", "orders.amt - refunds.rfd");
    let result = evaluate_formula(
        &f,
        &ctx,
        &Document::new(),
        &FormulaOutputs::from_formulas(std::slice::from_ref(&f)),
    )
    .expect("eval");
    assert_eq!(result, 70.0);
}
