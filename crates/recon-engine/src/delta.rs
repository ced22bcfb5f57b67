//! Post-merge delta columns and reconciliation reasons.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use log::warn;
use regex::Regex;

use recon_model::{meta, DeltaColumn, Document, MissingDeltaPolicy, Reason};

use crate::eval::eval_arithmetic;
use crate::parse::derived_re;

fn lowercase_ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([a-z][a-z0-9_]{2,})\b").expect("lowercase identifier regex"))
}

fn safe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9+\-*/().\s]+$").expect("safe expression regex"))
}

/// Evaluate a delta column expression over a report row's attributes.
///
/// The expression is the restricted arithmetic grammar with derived-field
/// names only (no qualified references). Identifier lookup is
/// case-insensitive; unknown identifiers substitute 0 with a warning.
/// Any failure yields 0 so the pass keeps moving.
pub fn evaluate_delta_column(delta: &DeltaColumn, fields: &Document) -> f64 {
    if delta.delta_column_name.is_empty() || delta.value.is_empty() {
        warn!("delta column is missing a name or value expression, using 0");
        return 0.0;
    }

    let mut numeric: HashMap<String, f64> = HashMap::new();
    for (key, value) in fields.iter() {
        if meta::is_system_field(key) {
            continue;
        }
        let coerced = value.as_f64().unwrap_or(0.0);
        numeric.insert(key.to_uppercase(), coerced);
        numeric.insert(key.to_lowercase(), coerced);
    }

    let mut expr = delta.value.clone();
    for pattern in [derived_re(), lowercase_ident_re()] {
        let identifiers: Vec<String> = pattern
            .captures_iter(&expr)
            .map(|caps| caps[1].to_string())
            .collect();
        for ident in identifiers {
            let replacement = match numeric.get(&ident) {
                Some(v) => format!("{v}"),
                None => {
                    warn!(
                        "delta column `{}` references unknown field `{ident}`, substituting 0",
                        delta.delta_column_name
                    );
                    "0".to_string()
                }
            };
            let word = Regex::new(&format!(r"\b{}\b", regex::escape(&ident)))
                .expect("identifier replacement regex");
            expr = word.replace_all(&expr, replacement.as_str()).into_owned();
        }
    }

    if !safe_re().is_match(&expr) {
        warn!(
            "delta column `{}` contains invalid characters after substitution: {expr}",
            delta.delta_column_name
        );
        return 0.0;
    }

    match eval_arithmetic(&expr) {
        Ok(v) => v,
        Err(e) => {
            warn!("delta column `{}` failed to evaluate: {e}", delta.delta_column_name);
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconciliationStatus {
    Reconciled,
    Unreconciled,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationStatus::Reconciled => "RECONCILED",
            ReconciliationStatus::Unreconciled => "UNRECONCILED",
        }
    }
}

impl fmt::Display for ReconciliationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Joined reason string plus the row's final reconciliation status.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasonOutcome {
    pub reason: String,
    pub status: ReconciliationStatus,
}

/// Evaluate the reason list against a report row's fields (delta columns
/// included).
///
/// Reasons run in order. A reason whose delta's absolute value exceeds the
/// absolute threshold matches. Once anything has matched, reasons with
/// `must_check = false` are skipped; `must_check = true` forces evaluation
/// regardless. A missing delta column follows `policy`.
pub fn evaluate_reasons(
    reasons: &[Reason],
    fields: &Document,
    policy: MissingDeltaPolicy,
) -> ReasonOutcome {
    let mut matched: Vec<&str> = Vec::new();

    for reason in reasons {
        if reason.reason.is_empty() || reason.delta_column.is_empty() {
            continue;
        }
        if !reason.must_check && !matched.is_empty() {
            continue;
        }

        let delta = fields
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&reason.delta_column))
            .map(|(_, value)| value.as_f64().unwrap_or(0.0));

        let delta = match delta {
            Some(v) => v,
            None => match policy {
                MissingDeltaPolicy::Zero => 0.0,
                MissingDeltaPolicy::Unreconciled => {
                    warn!(
                        "delta column `{}` missing from report row, flagging `{}`",
                        reason.delta_column, reason.reason
                    );
                    matched.push(&reason.reason);
                    continue;
                }
            },
        };

        if delta.abs() > reason.threshold.abs() {
            matched.push(&reason.reason);
        }
    }

    if matched.is_empty() {
        ReasonOutcome {
            reason: String::new(),
            status: ReconciliationStatus::Reconciled,
        }
    } else {
        ReasonOutcome {
            reason: matched.join(", "),
            status: ReconciliationStatus::Unreconciled,
        }
    }
}
