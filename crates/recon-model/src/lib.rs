//! Core data model for the reconciliation pipeline.
//!
//! Rows are loosely-typed attribute maps ([`Document`]) whose values are the
//! tagged [`Value`] variant. This crate also owns the pure row-shaping
//! passes that run before anything touches the store: header normalization,
//! per-field sanitization, and composite-identity construction. The
//! configuration documents (data sources, report formula documents) live in
//! [`config`].

pub mod config;
pub mod document;
pub mod headers;
pub mod identity;
pub mod sanitize;
pub mod value;

pub use config::{
    ConditionKind, DataSource, DeltaColumn, FieldMapping, FilterOp, FilterPredicate, Formula,
    FormulaDocument, MissingDeltaPolicy, PiecewiseClause, Reason,
};
pub use document::Document;
pub use headers::{normalize_header, normalize_headers, UNNAMED_COLUMN};
pub use identity::{build_mapping_key, build_unique_id};
pub use sanitize::{is_date_field, parse_date, sanitize_document, sanitize_value};
pub use value::Value;

/// Well-known document attribute names shared across the pipeline.
pub mod meta {
    /// Composite row identity computed from a data source's `unique_ids`.
    pub const UNIQUE_ID: &str = "unique_id";
    /// Promotion / evaluation timestamp, always overwritten on write.
    pub const PROCESSED_AT: &str = "processed_at";
    /// Secondary timestamp, always overwritten on write.
    pub const UPDATED_AT: &str = "updated_at";
    /// Suffix of the per-source composite keys stamped onto report rows.
    pub const MAPPING_KEY_SUFFIX: &str = "_mapping_key";
    /// Suffix of the per-source staging collections.
    pub const PROCESSED_SUFFIX: &str = "_processed";
    /// Suffix of the per-source append-only archives.
    pub const BACKUP_SUFFIX: &str = "_backup";

    /// True for attributes that are always overwritten and therefore never
    /// participate in change detection or formula substitution.
    pub fn is_system_field(name: &str) -> bool {
        name == PROCESSED_AT || name == UPDATED_AT || name.ends_with(MAPPING_KEY_SUFFIX)
    }
}
