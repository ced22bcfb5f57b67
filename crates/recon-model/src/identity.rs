//! Composite row identities: the per-source `unique_id` and the per-report
//! `mapping_key`.

use crate::document::Document;
use crate::meta;

fn join_key_fields(document: &Document, fields: &[String]) -> Option<String> {
    let mut parts = Vec::with_capacity(fields.len());
    for field in fields {
        let part = document.get(field)?.to_key_string()?;
        parts.push(part);
    }
    Some(parts.join("_"))
}

/// Compute the composite `unique_id` from the configured field list.
///
/// `None` when the list is empty or any component is null, missing, or
/// empty after trimming: such rows carry no secondary identity and each
/// promotion inserts a fresh processed document.
pub fn build_unique_id(document: &Document, unique_ids: &[String]) -> Option<String> {
    if unique_ids.is_empty() {
        return None;
    }
    join_key_fields(document, unique_ids)
}

/// Compute a source's composite mapping key for one processed row.
///
/// An empty field list falls back to the row's `unique_id`, then to the
/// stringified store id (always passed explicitly by callers so the
/// fallback chain applies on every path). `None` means the row cannot be
/// keyed and is skipped by the merger.
pub fn build_mapping_key(
    document: &Document,
    key_fields: &[String],
    doc_id: Option<i64>,
) -> Option<String> {
    if key_fields.is_empty() {
        if let Some(unique_id) = document.get(meta::UNIQUE_ID).and_then(|v| v.to_key_string()) {
            return Some(unique_id);
        }
        return doc_id.map(|id| id.to_string());
    }
    join_key_fields(document, key_fields)
}
