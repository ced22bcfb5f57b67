//! Formula pipeline: parsing arithmetic expressions that reference source
//! columns and previously-computed derived fields, ordering formulas by
//! dependency, and evaluating them per row.
//!
//! Expressions follow a restricted grammar: numeric literals, `+ - * / ( )`,
//! qualified references `<coll>.<field>` (the collection segment must not
//! start with a digit, so `0.05` stays a literal), and derived references —
//! standalone `[A-Z][A-Z0-9_]{2,}` identifiers resolving to earlier formula
//! outputs. Substituted expressions are evaluated by a hand-written
//! recursive-descent evaluator; nothing is ever passed to a general `eval`.

pub mod delta;
pub mod eval;
pub mod formula;
pub mod parse;
pub mod schedule;

pub use delta::{evaluate_delta_column, evaluate_reasons, ReasonOutcome, ReconciliationStatus};
pub use eval::{eval_arithmetic, EvalError};
pub use formula::{apply_piecewise, evaluate_formula, FormulaOutputs, RowContext};
pub use parse::{parse_formula_text, FormulaRefs};
pub use schedule::sort_by_dependencies;
