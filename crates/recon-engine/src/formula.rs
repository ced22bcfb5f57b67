//! Per-row formula evaluation: substitution of qualified and derived
//! references, safety validation, arithmetic evaluation, and piecewise
//! condition lookup.

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use log::{error, warn};
use regex::Regex;

use recon_model::{meta, ConditionKind, Document, Formula, PiecewiseClause};

use crate::eval::{eval_arithmetic, EvalError};
use crate::parse::{derived_re, qualified_re};

fn safe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9+\-*/().\s]+$").expect("safe expression regex"))
}

/// Which formula produces which derived field, by position in the original
/// list. Used to name the culprit when a reference resolves to nothing.
#[derive(Debug, Clone, Default)]
pub struct FormulaOutputs {
    positions: HashMap<String, usize>,
}

impl FormulaOutputs {
    pub fn from_formulas(formulas: &[Formula]) -> Self {
        let mut positions = HashMap::new();
        for (idx, formula) in formulas.iter().enumerate() {
            if !formula.logic_name_key.is_empty() {
                positions.insert(formula.logic_name_key.to_uppercase(), idx);
            }
        }
        FormulaOutputs { positions }
    }

    fn describe_missing(&self, reference: &str) -> String {
        match self.positions.get(reference) {
            Some(idx) => format!(
                "{reference} (produced by the formula at position {}, which has not run or failed)",
                idx + 1
            ),
            None => format!("{reference} (no formula produces this field)"),
        }
    }
}

/// One source row under evaluation, plus the rows joined from other
/// contributing collections by matching mapping key.
///
/// A qualified reference `coll.field` resolves against the current row when
/// `coll` is the row's own collection, against the joined row for `coll`
/// when one was found, and falls back to the current row otherwise (the
/// field may simply live here under a qualified spelling).
#[derive(Debug, Clone)]
pub struct RowContext<'a> {
    /// Base name of the collection the row came from.
    pub base: &'a str,
    pub row: &'a Document,
    /// Joined rows from other collections, by base name.
    pub foreign: &'a BTreeMap<String, Document>,
}

impl<'a> RowContext<'a> {
    /// A context with no joined rows, for single-collection evaluation.
    pub fn local(base: &'a str, row: &'a Document) -> Self {
        static EMPTY: OnceLock<BTreeMap<String, Document>> = OnceLock::new();
        RowContext {
            base,
            row,
            foreign: EMPTY.get_or_init(BTreeMap::new),
        }
    }

    fn resolve(&self, collection: &str, field: &str) -> Option<f64> {
        if !collection.eq_ignore_ascii_case(self.base) {
            if let Some(joined) = self.foreign.get(collection) {
                return joined.get(field).and_then(|v| v.as_f64());
            }
        }
        self.row.get(field).and_then(|v| v.as_f64())
    }
}

fn numeric_string(value: Option<f64>) -> String {
    match value {
        Some(n) => format!("{n}"),
        None => "0".to_string(),
    }
}

fn replace_word(expr: &str, word: &str, replacement: &str) -> String {
    let pattern = Regex::new(&format!(r"\b{}\b", regex::escape(word)))
        .expect("word-boundary replacement regex");
    pattern.replace_all(expr, replacement).into_owned()
}

/// Evaluate one formula against one row with the live derived-field map.
///
/// Substitution order: qualified `coll.field` references resolve through
/// the [`RowContext`] (null or non-numeric coerces to 0); derived references
/// are then substituted uppercase-first, lowercase second, with the decimal
/// string of the previously computed value. Anything left that still looks
/// like an identifier fails the safety check and the row's formula errors
/// out (callers continue the row with 0).
pub fn evaluate_formula(
    formula: &Formula,
    ctx: &RowContext<'_>,
    derived: &Document,
    outputs: &FormulaOutputs,
) -> Result<f64, EvalError> {
    let mut expr = qualified_re()
        .replace_all(&formula.formula_text, |caps: &regex::Captures<'_>| {
            numeric_string(ctx.resolve(&caps[1], &caps[2]))
        })
        .into_owned();

    for (key, value) in derived.iter() {
        if meta::is_system_field(key) {
            continue;
        }
        let substitution = numeric_string(value.as_f64());
        let upper = key.to_uppercase();
        expr = replace_word(&expr, &upper, &substitution);
        if key != &upper {
            expr = replace_word(&expr, key, &substitution);
        }
    }

    let unresolved: Vec<String> = derived_re()
        .captures_iter(&expr)
        .map(|caps| caps[1].to_string())
        .collect();
    if !unresolved.is_empty() {
        let details: Vec<String> = unresolved
            .iter()
            .map(|r| outputs.describe_missing(r))
            .collect();
        error!(
            "formula `{}` references fields with no computed value: {}",
            formula.formula_text,
            details.join(", ")
        );
        return Err(EvalError::UnresolvedReferences(unresolved));
    }

    if !safe_re().is_match(&expr) {
        return Err(EvalError::InvalidCharacters(expr));
    }

    let base = eval_arithmetic(&expr)?;

    if formula.conditions.is_empty() {
        Ok(base)
    } else {
        Ok(apply_piecewise(base, &formula.conditions))
    }
}

fn clause_matches(base: f64, clause: &PiecewiseClause) -> bool {
    let value1 = match clause.value1.trim().parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            if !clause.value1.trim().is_empty() {
                warn!("piecewise clause has non-numeric value1 `{}`", clause.value1);
            }
            return false;
        }
    };

    match clause.condition_type {
        ConditionKind::Equal => base == value1,
        ConditionKind::GreaterThan => base > value1,
        ConditionKind::LessThan => base < value1,
        ConditionKind::GreaterEqual => base >= value1,
        ConditionKind::LessEqual => base <= value1,
        ConditionKind::Between => match clause.value2.trim().parse::<f64>() {
            Ok(value2) => value1 <= base && base <= value2,
            Err(_) => {
                warn!("between clause has non-numeric value2 `{}`", clause.value2);
                false
            }
        },
    }
}

/// Replace the arithmetic result with the `formula_value` of the first
/// matching clause; no match yields 0.
pub fn apply_piecewise(base: f64, clauses: &[PiecewiseClause]) -> f64 {
    for clause in clauses {
        if clause_matches(base, clause) {
            return match clause.formula_value.trim().parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    warn!(
                        "piecewise clause matched but formulaValue `{}` is not numeric",
                        clause.formula_value
                    );
                    0.0
                }
            };
        }
    }
    0.0
}
