//! Operations exposed to the thin external surface. Every operation
//! resolves to the envelope `{status, message, data}`; errors carry
//! HTTP-shaped status codes (400 configuration, 404 unknown name,
//! 409 conflict, 503 storage, 500 unexpected).

use std::path::Path;

use chrono::Utc;
use log::error;
use serde::Serialize;
use serde_json::json;

use recon_ingest::{CsvRowSource, Ingestor};
use recon_model::{meta, DataSource, FieldMapping, FormulaDocument, Value};

use crate::context::JobContext;
use crate::error::JobError;
use crate::promote;
use crate::registry;
use crate::report;

/// The structured operation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpResult {
    pub status: u16,
    pub message: String,
    pub data: serde_json::Value,
}

impl OpResult {
    pub fn ok(message: impl Into<String>, data: serde_json::Value) -> Self {
        OpResult {
            status: 200,
            message: message.into(),
            data,
        }
    }
}

impl From<JobError> for OpResult {
    fn from(err: JobError) -> Self {
        OpResult {
            status: err.status(),
            message: err.to_string(),
            data: serde_json::Value::Null,
        }
    }
}

/// Collapse an operation outcome into the envelope, logging unexpected
/// failures.
pub fn envelope(result: Result<OpResult, JobError>) -> OpResult {
    match result {
        Ok(op) => op,
        Err(err) => {
            if err.status() >= 500 {
                error!("operation failed: {err}");
            }
            err.into()
        }
    }
}

fn require_name(name: &str, what: &str) -> Result<String, JobError> {
    let trimmed = name.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(JobError::Config(format!(
            "{what} is required and cannot be empty"
        )));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(JobError::Config(format!(
            "{what} `{trimmed}` may only contain letters, digits, and underscores"
        )));
    }
    Ok(trimmed)
}

/// Create a data source: its raw collection, the processed companion with
/// its identity index, the backup archive, and the persisted
/// configuration. An existing name is a conflict.
pub fn create_data_source(
    ctx: &JobContext,
    name: &str,
    unique_ids: Vec<String>,
) -> Result<OpResult, JobError> {
    let name = require_name(name, "collection name")?;
    if registry::get_data_source(&ctx.store, &name)?.is_some() {
        return Err(JobError::Conflict(format!(
            "data source `{name}` already exists"
        )));
    }

    ctx.store.collection(&name)?;
    let processed_name = format!("{name}{}", meta::PROCESSED_SUFFIX);
    let processed = ctx.store.collection(&processed_name)?;
    processed.ensure_unique_index(meta::UNIQUE_ID)?;
    let backup_name = format!("{name}{}", meta::BACKUP_SUFFIX);
    ctx.store.collection(&backup_name)?;

    let source = DataSource {
        name: name.clone(),
        unique_ids,
        allow_null_identity: true,
    };
    let mut doc = registry::to_document(&source)?;
    doc.insert("created_at", Value::Time(Utc::now().naive_utc()));
    ctx.store
        .collection(registry::RAW_DATA_COLLECTION)?
        .insert_one(&doc)?;

    Ok(OpResult::ok(
        format!("Collection `{name}` created"),
        json!({
            "collection_name": name,
            "processed_collection_name": processed_name,
            "backup_collection_name": backup_name,
            "unique_ids": source.unique_ids,
        }),
    ))
}

/// Flip a data source's null-identity policy (whether rows missing an
/// identity component are promoted with a null `unique_id` or rejected).
pub fn set_null_identity_policy(
    ctx: &JobContext,
    name: &str,
    allow_null_identity: bool,
) -> Result<OpResult, JobError> {
    let name = require_name(name, "collection name")?;
    let Some(mut source) = registry::get_data_source(&ctx.store, &name)? else {
        return Err(JobError::NotFound(format!("data source `{name}` not found")));
    };
    source.allow_null_identity = allow_null_identity;
    let doc = registry::to_document(&source)?;
    ctx.store
        .collection(registry::RAW_DATA_COLLECTION)?
        .upsert_by_key("name", &name, &doc)?;
    Ok(OpResult::ok(
        format!("Data source `{name}` updated"),
        json!({ "name": name, "allow_null_identity": allow_null_identity }),
    ))
}

/// Persist the field projection applied at promotion.
pub fn set_selected_fields(
    ctx: &JobContext,
    name: &str,
    selected_fields: Vec<String>,
) -> Result<OpResult, JobError> {
    let name = require_name(name, "collection name")?;
    if selected_fields.is_empty() {
        return Err(JobError::Config(
            "selected_fields is required and cannot be empty".to_string(),
        ));
    }
    if registry::get_data_source(&ctx.store, &name)?.is_none() {
        return Err(JobError::NotFound(format!("data source `{name}` not found")));
    }

    let mapping = FieldMapping {
        collection_name: name.clone(),
        selected_fields,
    };
    let doc = registry::to_document(&mapping)?;
    ctx.store
        .collection(registry::FIELD_MAPPINGS)?
        .upsert_by_key("collection_name", &name, &doc)?;

    Ok(OpResult::ok(
        format!("Field mapping for `{name}` saved"),
        json!({
            "collection_name": name,
            "selected_fields": mapping.selected_fields,
            "selected_fields_count": mapping.selected_fields.len(),
        }),
    ))
}

/// Stream a tabular file into a data source's raw collection.
pub fn ingest_file(
    ctx: &JobContext,
    datasource: &str,
    path: &Path,
) -> Result<OpResult, JobError> {
    let datasource = require_name(datasource, "data source name")?;
    if registry::get_data_source(&ctx.store, &datasource)?.is_none() {
        return Err(JobError::NotFound(format!(
            "data source `{datasource}` not found"
        )));
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mut source = CsvRowSource::open(path)?;
    let ingestor = Ingestor::new(
        ctx.store.clone(),
        ctx.config.ingest_batch_size,
        ctx.config.large_file_threshold,
    );
    let report = ingestor.ingest(&datasource, &filename, &mut source)?;

    Ok(OpResult::ok(
        format!(
            "Ingested {} row(s) from `{filename}` into `{datasource}`",
            report.rows_inserted
        ),
        json!({
            "upload_id": report.upload_id,
            "rows_inserted": report.rows_inserted,
            "batches": report.batches,
            "batch_errors": report.batch_errors,
        }),
    ))
}

/// Promote one data source (or all) from raw to processed.
pub async fn promote_collections(
    ctx: &JobContext,
    name: Option<&str>,
) -> Result<OpResult, JobError> {
    let name = match name {
        Some(n) => {
            let n = require_name(n, "collection name")?;
            if registry::get_field_mapping(&ctx.store, &n)?.is_none() {
                return Err(JobError::NotFound(format!(
                    "no field mapping found for `{n}`"
                )));
            }
            Some(n)
        }
        None => None,
    };

    let results = promote::promote(ctx, name.as_deref()).await?;
    let total: u64 = results.iter().map(|r| r.processed).sum();
    Ok(OpResult::ok(
        format!("Processed {} collection(s)", results.len()),
        json!({
            "collections_processed": results.len(),
            "total_documents_processed": total,
            "results": serde_json::to_value(&results)
                .map_err(|e| JobError::Corrupt(e.to_string()))?,
        }),
    ))
}

fn validate_report(spec: &FormulaDocument) -> Result<String, JobError> {
    let name = require_name(&spec.report_name, "report name")?;
    for formula in &spec.formulas {
        if formula.logic_name_key.trim().is_empty() {
            return Err(JobError::Config(
                "each formula must have a non-empty logicNameKey".to_string(),
            ));
        }
        if formula.formula_text.trim().is_empty() {
            return Err(JobError::Config(format!(
                "formula `{}` has an empty formulaText",
                formula.logic_name_key
            )));
        }
    }
    Ok(name)
}

fn persist_report(
    ctx: &JobContext,
    name: &str,
    spec: &FormulaDocument,
) -> Result<(), JobError> {
    let mut stored = spec.clone();
    stored.report_name = name.to_string();
    let mut doc = registry::to_document(&stored)?;
    doc.insert(meta::UPDATED_AT, Value::Time(Utc::now().naive_utc()));
    ctx.store
        .collection(registry::FORMULAS)?
        .upsert_by_key("report_name", name, &doc)?;
    Ok(())
}

/// Persist a report's FormulaDocument, creating or replacing it.
pub fn define_report(ctx: &JobContext, spec: &FormulaDocument) -> Result<OpResult, JobError> {
    let name = validate_report(spec)?;
    let existed = registry::get_formula_document(&ctx.store, &name)?.is_some();
    persist_report(ctx, &name, spec)?;
    Ok(OpResult::ok(
        format!("Report `{name}` saved"),
        json!({
            "report_name": name,
            "formulas_count": spec.formulas.len(),
            "collection_existed": existed,
        }),
    ))
}

/// Replace an existing report's FormulaDocument; unknown reports are 404.
pub fn update_report(ctx: &JobContext, spec: &FormulaDocument) -> Result<OpResult, JobError> {
    let name = validate_report(spec)?;
    if registry::get_formula_document(&ctx.store, &name)?.is_none() {
        return Err(JobError::NotFound(format!("report `{name}` not found")));
    }
    persist_report(ctx, &name, spec)?;
    Ok(OpResult::ok(
        format!("Report `{name}` updated"),
        json!({
            "report_name": name,
            "formulas_count": spec.formulas.len(),
        }),
    ))
}

/// Remove a report's FormulaDocument.
pub fn delete_report(ctx: &JobContext, name: &str) -> Result<OpResult, JobError> {
    let name = require_name(name, "report name")?;
    let deleted = ctx
        .store
        .collection(registry::FORMULAS)?
        .delete_by_key("report_name", &name)?;
    if deleted == 0 {
        return Err(JobError::NotFound(format!("report `{name}` not found")));
    }
    Ok(OpResult::ok(
        format!("Report `{name}` deleted"),
        json!({ "report_name": name }),
    ))
}

/// Fetch one report's FormulaDocument.
pub fn get_report(ctx: &JobContext, name: &str) -> Result<OpResult, JobError> {
    let name = require_name(name, "report name")?;
    let Some(spec) = registry::get_formula_document(&ctx.store, &name)? else {
        return Err(JobError::NotFound(format!("report `{name}` not found")));
    };
    Ok(OpResult::ok(
        "Report formulas retrieved",
        serde_json::to_value(&spec).map_err(|e| JobError::Corrupt(e.to_string()))?,
    ))
}

/// All defined reports.
pub fn list_reports(ctx: &JobContext) -> Result<OpResult, JobError> {
    let specs = registry::list_formula_documents(&ctx.store)?;
    Ok(OpResult::ok(
        format!("Found {} report(s)", specs.len()),
        json!({
            "count": specs.len(),
            "reports": serde_json::to_value(&specs)
                .map_err(|e| JobError::Corrupt(e.to_string()))?,
        }),
    ))
}

/// All configured data sources.
pub fn list_data_sources(ctx: &JobContext) -> Result<OpResult, JobError> {
    let sources = registry::list_data_sources(&ctx.store)?;
    Ok(OpResult::ok(
        format!("Found {} data source(s)", sources.len()),
        json!({
            "count": sources.len(),
            "data_sources": serde_json::to_value(&sources)
                .map_err(|e| JobError::Corrupt(e.to_string()))?,
        }),
    ))
}

/// Evaluate one report (or every report) into its target collection.
pub async fn evaluate_report(
    ctx: &JobContext,
    name: Option<&str>,
) -> Result<OpResult, JobError> {
    let name = match name {
        Some(n) => {
            let n = require_name(n, "report name")?;
            if registry::get_formula_document(&ctx.store, &n)?.is_none() {
                return Err(JobError::NotFound(format!("report `{n}` not found")));
            }
            Some(n)
        }
        None => None,
    };

    let results = report::evaluate_reports(ctx, name.as_deref()).await?;
    let total: u64 = results.iter().map(|r| r.processed).sum();
    Ok(OpResult::ok(
        format!("Processed {} report(s)", results.len()),
        json!({
            "reports_processed": results.len(),
            "total_documents_processed": total,
            "results": serde_json::to_value(&results)
                .map_err(|e| JobError::Corrupt(e.to_string()))?,
        }),
    ))
}

/// Upload records, newest first, optionally filtered to one data source.
pub fn list_uploads(ctx: &JobContext, datasource: Option<&str>) -> Result<OpResult, JobError> {
    let uploads = recon_ingest::list_uploads(&ctx.store, datasource)?;
    Ok(OpResult::ok(
        format!("Found {} upload(s)", uploads.len()),
        json!({
            "count": uploads.len(),
            "uploads": serde_json::to_value(&uploads)
                .map_err(|e| JobError::Corrupt(e.to_string()))?,
        }),
    ))
}
