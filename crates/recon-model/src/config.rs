//! Configuration documents: data sources, field projections, and report
//! formula documents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A named input stream with its row-identity rule.
///
/// Names are stored lowercased; the raw collection shares the name, with
/// `_processed` / `_backup` companions alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSource {
    pub name: String,
    /// Ordered field names composing the row identity; may be empty, in
    /// which case identity degrades to the store-assigned id.
    #[serde(default)]
    pub unique_ids: Vec<String>,
    /// When false, rows missing an identity component are rejected at
    /// promotion instead of being inserted with a null `unique_id`.
    #[serde(default = "default_true")]
    pub allow_null_identity: bool,
}

fn default_true() -> bool {
    true
}

/// The field projection applied when rows are promoted into the processed
/// collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub collection_name: String,
    pub selected_fields: Vec<String>,
}

/// Filter operators accepted in per-collection report conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    #[serde(alias = "equal")]
    Eq,
    #[serde(alias = "not_equal")]
    Ne,
    #[serde(alias = "greater_than")]
    Gt,
    #[serde(alias = "less_than")]
    Lt,
    #[serde(alias = "greater_equal")]
    Ge,
    #[serde(alias = "less_equal")]
    Le,
    In,
    #[serde(alias = "not_in")]
    Nin,
}

/// One filter predicate over a source-collection column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPredicate {
    pub column: String,
    #[serde(rename = "operator")]
    pub op: FilterOp,
    pub value: Value,
}

/// Comparison kinds for piecewise formula conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    Equal,
    GreaterThan,
    LessThan,
    GreaterEqual,
    LessEqual,
    Between,
}

/// A piecewise clause: when the formula's arithmetic result matches, the
/// clause's `formula_value` replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PiecewiseClause {
    #[serde(rename = "conditionType")]
    pub condition_type: ConditionKind,
    #[serde(default)]
    pub value1: String,
    #[serde(default)]
    pub value2: String,
    #[serde(rename = "formulaValue", default)]
    pub formula_value: String,
}

/// One derived report column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Output field name; matched case-insensitively when other formulas
    /// reference it.
    #[serde(rename = "logicNameKey")]
    pub logic_name_key: String,
    #[serde(rename = "formulaText")]
    pub formula_text: String,
    /// Source fields the author selected for this formula in the UI.
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<PiecewiseClause>,
}

/// A post-merge arithmetic column over derived fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaColumn {
    pub delta_column_name: String,
    /// Arithmetic expression referencing other derived fields (no
    /// collection-qualified references).
    pub value: String,
}

/// A textual reconciliation reason, emitted when a delta column's absolute
/// value exceeds the absolute threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    pub reason: String,
    pub delta_column: String,
    #[serde(default)]
    pub threshold: f64,
    /// False: skipped once any earlier reason matched. True: always
    /// evaluated.
    #[serde(default)]
    pub must_check: bool,
}

/// Policy for a reason whose delta column is absent from the report row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingDeltaPolicy {
    /// Treat the missing delta as 0 (the reason cannot match).
    #[default]
    Zero,
    /// A missing delta column forces `UNRECONCILED` with the reason
    /// appended.
    Unreconciled,
}

/// A report specification: formulas plus the merge and reconciliation
/// rules for its target collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaDocument {
    /// Also the target collection name.
    pub report_name: String,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    /// Source-collection base name -> ordered mapping-key field list.
    #[serde(default)]
    pub mapping_keys: BTreeMap<String, Vec<String>>,
    /// Source-collection base name -> filter predicates.
    #[serde(default)]
    pub conditions: BTreeMap<String, Vec<FilterPredicate>>,
    #[serde(default)]
    pub delta_columns: Vec<DeltaColumn>,
    #[serde(default)]
    pub reasons: Vec<Reason>,
    #[serde(default)]
    pub missing_delta_policy: MissingDeltaPolicy,
}
