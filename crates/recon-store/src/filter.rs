//! Compilation of filter predicates into `json_extract` WHERE clauses.

use rusqlite::types::Value as SqlValue;

use recon_model::{FilterOp, FilterPredicate, Value};

use crate::error::StoreError;
use crate::store::validate_field;

/// A conjunction of predicates over document attributes. An empty filter
/// matches every document.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    predicates: Vec<FilterPredicate>,
}

impl Filter {
    pub fn empty() -> Self {
        Filter::default()
    }

    /// Build a filter from configured report conditions. Predicates with an
    /// empty column are dropped; string values spelling a null sentinel
    /// (`null`, `none`, empty) compare against null, matching the
    /// configuration surface's loose typing.
    pub fn from_conditions(conditions: &[FilterPredicate]) -> Self {
        let predicates = conditions
            .iter()
            .filter(|p| !p.column.is_empty())
            .map(|p| {
                let value = match &p.value {
                    Value::String(s)
                        if s.trim().is_empty()
                            || s.trim().eq_ignore_ascii_case("null")
                            || s.trim().eq_ignore_ascii_case("none") =>
                    {
                        Value::Null
                    }
                    other => other.clone(),
                };
                FilterPredicate {
                    column: p.column.clone(),
                    op: p.op,
                    value,
                }
            })
            .collect();
        Filter { predicates }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Render the filter as a WHERE fragment plus its bound parameters.
    /// Always produces at least `1=1` so callers can unconditionally embed
    /// it in a larger clause.
    pub(crate) fn to_sql(&self) -> Result<(String, Vec<SqlValue>), StoreError> {
        if self.predicates.is_empty() {
            return Ok(("1=1".to_string(), Vec::new()));
        }

        let mut clauses = Vec::with_capacity(self.predicates.len());
        let mut params = Vec::new();

        for predicate in &self.predicates {
            validate_field(&predicate.column)?;
            let col = format!("json_extract(doc, '$.{}')", predicate.column);
            match (predicate.op, &predicate.value) {
                (FilterOp::Eq, Value::Null) => clauses.push(format!("{col} IS NULL")),
                (FilterOp::Ne, Value::Null) => clauses.push(format!("{col} IS NOT NULL")),
                (FilterOp::Eq, value) => {
                    clauses.push(format!("{col} = ?"));
                    params.push(bind(value));
                }
                // A missing attribute still satisfies "not equal".
                (FilterOp::Ne, value) => {
                    clauses.push(format!("({col} IS NULL OR {col} <> ?)"));
                    params.push(bind(value));
                }
                (FilterOp::Gt, value) => {
                    clauses.push(format!("{col} > ?"));
                    params.push(bind(value));
                }
                (FilterOp::Lt, value) => {
                    clauses.push(format!("{col} < ?"));
                    params.push(bind(value));
                }
                (FilterOp::Ge, value) => {
                    clauses.push(format!("{col} >= ?"));
                    params.push(bind(value));
                }
                (FilterOp::Le, value) => {
                    clauses.push(format!("{col} <= ?"));
                    params.push(bind(value));
                }
                (FilterOp::In, value) => {
                    let items = as_list(value);
                    let with_null = items.iter().any(Value::is_null);
                    let non_null: Vec<&Value> = items.iter().filter(|v| !v.is_null()).collect();
                    let placeholders = vec!["?"; non_null.len()].join(", ");
                    let membership = if non_null.is_empty() {
                        "0=1".to_string()
                    } else {
                        format!("{col} IN ({placeholders})")
                    };
                    if with_null {
                        clauses.push(format!("({membership} OR {col} IS NULL)"));
                    } else {
                        clauses.push(membership);
                    }
                    params.extend(non_null.into_iter().map(bind));
                }
                (FilterOp::Nin, value) => {
                    let items = as_list(value);
                    let with_null = items.iter().any(Value::is_null);
                    let non_null: Vec<&Value> = items.iter().filter(|v| !v.is_null()).collect();
                    let placeholders = vec!["?"; non_null.len()].join(", ");
                    let membership = if non_null.is_empty() {
                        "1=1".to_string()
                    } else {
                        format!("{col} NOT IN ({placeholders})")
                    };
                    // A missing attribute is outside any list; an explicit
                    // null in the list excludes missing attributes too.
                    if with_null {
                        clauses.push(format!("({membership} AND {col} IS NOT NULL)"));
                    } else {
                        clauses.push(format!("({membership} OR {col} IS NULL)"));
                    }
                    params.extend(non_null.into_iter().map(bind));
                }
            }
        }

        Ok((clauses.join(" AND "), params))
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        other => vec![other.clone()],
    }
}

/// Convert a document value into its SQL binding. Booleans bind as the
/// integers `json_extract` yields for JSON booleans; timestamps bind as
/// their tagged JSON text (equality only).
pub(crate) fn bind(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(n) => SqlValue::Integer(*n),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => match serde_json::to_string(other) {
            Ok(text) => SqlValue::Text(text),
            Err(_) => SqlValue::Null,
        },
    }
}
