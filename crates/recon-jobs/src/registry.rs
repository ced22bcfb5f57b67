//! Persisted configuration lookups: data sources, field projections, and
//! report formula documents.

use serde::de::DeserializeOwned;
use serde::Serialize;

use recon_model::{DataSource, Document, FieldMapping, FormulaDocument};
use recon_store::{Filter, Store};

use crate::error::JobError;

/// Collection of [`DataSource`] configurations.
pub const RAW_DATA_COLLECTION: &str = "raw_data_collection";
/// Collection of [`FieldMapping`]s (`selected_fields` per source).
pub const FIELD_MAPPINGS: &str = "collection_field_mappings";
/// Collection of [`FormulaDocument`]s, one per report.
pub const FORMULAS: &str = "formulas";

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<Document, JobError> {
    let json = serde_json::to_value(value)
        .map_err(|e| JobError::Corrupt(format!("failed to serialize configuration: {e}")))?;
    serde_json::from_value(json)
        .map_err(|e| JobError::Corrupt(format!("failed to shape configuration document: {e}")))
}

pub(crate) fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T, JobError> {
    let json = serde_json::to_value(doc)
        .map_err(|e| JobError::Corrupt(format!("failed to read stored document: {e}")))?;
    serde_json::from_value(json)
        .map_err(|e| JobError::Corrupt(format!("stored document has unexpected shape: {e}")))
}

fn find_by_name<T: DeserializeOwned>(
    store: &Store,
    collection: &str,
    name_field: &str,
    name: &str,
) -> Result<Option<T>, JobError> {
    let collection = store.collection(collection)?;
    for (_, doc) in collection.find_all(&Filter::empty())? {
        let matches = doc
            .get(name_field)
            .and_then(|v| v.as_str())
            .is_some_and(|stored| stored.eq_ignore_ascii_case(name));
        if matches {
            return Ok(Some(from_document(&doc)?));
        }
    }
    Ok(None)
}

pub fn get_data_source(store: &Store, name: &str) -> Result<Option<DataSource>, JobError> {
    find_by_name(store, RAW_DATA_COLLECTION, "name", name)
}

pub fn list_data_sources(store: &Store) -> Result<Vec<DataSource>, JobError> {
    let collection = store.collection(RAW_DATA_COLLECTION)?;
    collection
        .find_all(&Filter::empty())?
        .iter()
        .map(|(_, doc)| from_document(doc))
        .collect()
}

pub fn get_field_mapping(store: &Store, name: &str) -> Result<Option<FieldMapping>, JobError> {
    find_by_name(store, FIELD_MAPPINGS, "collection_name", name)
}

pub fn list_field_mappings(store: &Store) -> Result<Vec<FieldMapping>, JobError> {
    let collection = store.collection(FIELD_MAPPINGS)?;
    collection
        .find_all(&Filter::empty())?
        .iter()
        .map(|(_, doc)| from_document(doc))
        .collect()
}

pub fn get_formula_document(
    store: &Store,
    report_name: &str,
) -> Result<Option<FormulaDocument>, JobError> {
    find_by_name(store, FORMULAS, "report_name", report_name)
}

pub fn list_formula_documents(store: &Store) -> Result<Vec<FormulaDocument>, JobError> {
    let collection = store.collection(FORMULAS)?;
    collection
        .find_all(&Filter::empty())?
        .iter()
        .map(|(_, doc)| from_document(doc))
        .collect()
}
