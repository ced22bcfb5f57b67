//! Report evaluation: merging derived rows from every contributing source
//! collection into one target report, then the delta & reason pass.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use recon_engine::{
    evaluate_delta_column, evaluate_formula, evaluate_reasons, parse_formula_text,
    sort_by_dependencies, FormulaOutputs, FormulaRefs, RowContext,
};
use recon_model::{build_mapping_key, meta, Document, Formula, FormulaDocument, Value};
use recon_store::{Collection, Filter};

use crate::context::JobContext;
use crate::error::JobError;
use crate::registry;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectionRun {
    pub collection: String,
    pub batches: u64,
    pub processed: u64,
    pub errors: u64,
    /// Rows with no derivable mapping key.
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportCounters {
    pub report_name: String,
    pub status: String,
    pub processed: u64,
    pub errors: u64,
    pub formulas_count: u64,
    pub collections: Vec<CollectionRun>,
    /// Rows touched by the delta & reason pass.
    pub delta_rows: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Evaluate one report (or every defined report).
///
/// Reports are independent: a failing report records an error entry and
/// the run continues. Concurrent runs against the same report are not
/// supported; mutual exclusion is the caller's responsibility.
pub async fn evaluate_reports(
    ctx: &JobContext,
    report_name: Option<&str>,
) -> Result<Vec<ReportCounters>, JobError> {
    let specs = match report_name {
        Some(name) => registry::get_formula_document(&ctx.store, name)?
            .into_iter()
            .collect::<Vec<_>>(),
        None => registry::list_formula_documents(&ctx.store)?,
    };

    let mut results = Vec::with_capacity(specs.len());
    for spec in &specs {
        if spec.report_name.is_empty() {
            warn!("skipping formula document with no report name");
            continue;
        }
        match evaluate_report(ctx, spec).await {
            Ok(counters) => results.push(counters),
            Err(err) => {
                if matches!(err, JobError::Cancelled(_)) {
                    return Err(err);
                }
                results.push(ReportCounters {
                    report_name: spec.report_name.clone(),
                    status: "error".to_string(),
                    message: Some(err.to_string()),
                    ..ReportCounters::default()
                });
            }
        }
    }
    Ok(results)
}

fn skipped(spec: &FormulaDocument, message: &str) -> ReportCounters {
    ReportCounters {
        report_name: spec.report_name.clone(),
        status: "skipped".to_string(),
        message: Some(message.to_string()),
        ..ReportCounters::default()
    }
}

async fn evaluate_report(
    ctx: &JobContext,
    spec: &FormulaDocument,
) -> Result<ReportCounters, JobError> {
    if spec.formulas.is_empty() {
        warn!("no formulas defined for report `{}`", spec.report_name);
        return Ok(skipped(spec, "no formulas defined"));
    }

    let parsed: Vec<(&Formula, FormulaRefs)> = spec
        .formulas
        .iter()
        .map(|f| (f, parse_formula_text(&f.formula_text)))
        .collect();

    // Discovery order over every referenced collection; the primary is the
    // first collection to appear in any formula's first reference, falling
    // back to the first configured mapping key.
    let mut discovery: Vec<String> = Vec::new();
    for (_, refs) in &parsed {
        for base in &refs.collections {
            if !discovery.contains(base) {
                discovery.push(base.clone());
            }
        }
    }
    let primary_base = match parsed
        .iter()
        .find_map(|(_, refs)| refs.primary_collection())
    {
        Some(base) => base.to_string(),
        None => match spec.mapping_keys.keys().next() {
            Some(base) => {
                info!(
                    "report `{}` has no collection references, using mapping key `{base}` as primary",
                    spec.report_name
                );
                base.clone()
            }
            None => {
                warn!(
                    "could not determine source collections for report `{}`",
                    spec.report_name
                );
                return Ok(skipped(spec, "could not determine source collections"));
            }
        },
    };

    let mut order: Vec<String> = vec![primary_base.clone()];
    for base in discovery {
        if !order.contains(&base) {
            order.push(base);
        }
    }
    let primary_field = format!("{primary_base}{}", meta::MAPPING_KEY_SUFFIX);

    // A formula runs while merging the latest of its referenced collections,
    // so every cross-collection reference can be resolved against rows that
    // have already contributed. Formulas with no references run with the
    // primary.
    let position = |base: &str| order.iter().position(|b| b.as_str() == base).unwrap_or(0);
    let mut partitions: BTreeMap<String, Vec<Formula>> = BTreeMap::new();
    for (formula, refs) in &parsed {
        let base = refs
            .collections
            .iter()
            .max_by_key(|b| position(b.as_str()))
            .cloned()
            .unwrap_or_else(|| primary_base.clone());
        partitions.entry(base).or_default().push((*formula).clone());
    }

    let target = ctx.store.collection(&spec.report_name)?;
    target.ensure_index(&primary_field)?;
    for base in &order {
        target.ensure_index(&format!("{base}{}", meta::MAPPING_KEY_SUFFIX))?;
    }

    let outputs = FormulaOutputs::from_formulas(&spec.formulas);
    let mut counters = ReportCounters {
        report_name: spec.report_name.clone(),
        status: "success".to_string(),
        formulas_count: spec.formulas.len() as u64,
        ..ReportCounters::default()
    };

    for base in &order {
        let Some(collection_formulas) = partitions.get(base) else {
            info!("no formulas for collection `{base}`, skipping");
            continue;
        };
        let run = merge_collection(
            ctx,
            spec,
            base,
            &primary_base,
            &primary_field,
            collection_formulas,
            &outputs,
            &target,
        )
        .await?;
        counters.processed += run.processed;
        counters.errors += run.errors;
        counters.collections.push(run);
    }

    // The delta & reason pass runs exactly once, after every contributor
    // has merged, so all derived fields are visible to the expressions.
    if !spec.delta_columns.is_empty() || !spec.reasons.is_empty() {
        counters.delta_rows = delta_reason_pass(ctx, spec, &target, &primary_field).await?;
    }

    info!(
        "report `{}`: {} row(s) evaluated, {} error(s)",
        spec.report_name, counters.processed, counters.errors
    );
    Ok(counters)
}

#[allow(clippy::too_many_arguments)]
async fn merge_collection(
    ctx: &JobContext,
    spec: &FormulaDocument,
    base: &str,
    primary_base: &str,
    primary_field: &str,
    collection_formulas: &[Formula],
    outputs: &FormulaOutputs,
    target: &Collection,
) -> Result<CollectionRun, JobError> {
    let mut run = CollectionRun {
        collection: base.to_string(),
        ..CollectionRun::default()
    };

    let sorted = sort_by_dependencies(collection_formulas);
    let source = ctx
        .store
        .collection(&format!("{base}{}", meta::PROCESSED_SUFFIX))?;
    let empty_conditions = Vec::new();
    let conditions = spec.conditions.get(base).unwrap_or(&empty_conditions);
    let filter = Filter::from_conditions(conditions);
    if source.count(&filter)? == 0 {
        info!("source collection `{base}` has no matching rows, skipping");
        return Ok(run);
    }

    let empty_fields = Vec::new();
    let key_fields = spec.mapping_keys.get(base).unwrap_or(&empty_fields);
    let current_field = format!("{base}{}", meta::MAPPING_KEY_SUFFIX);

    // Collections this partition's formulas reach into besides its own.
    let foreign_bases: BTreeSet<String> = sorted
        .iter()
        .flat_map(|f| parse_formula_text(&f.formula_text).collections)
        .filter(|b| b != base)
        .collect();

    let mut cursor = source.find_batches(&filter, ctx.config.formula_batch_size)?;
    loop {
        ctx.cancel.check()?;
        let batch = cursor.next_batch()?;
        if batch.is_empty() {
            break;
        }
        run.batches += 1;

        let mut rows: Vec<(Document, String)> = Vec::with_capacity(batch.len());
        for (id, doc) in batch {
            match build_mapping_key(&doc, key_fields, Some(id)) {
                Some(key) => rows.push((doc, key)),
                None => {
                    run.skipped += 1;
                    if run.skipped <= 5 {
                        warn!(
                            "skipping row {id} from `{base}`: no mapping key derivable \
                             (key fields {key_fields:?})"
                        );
                    }
                }
            }
        }
        if rows.is_empty() {
            ctx.yield_between_batches().await;
            continue;
        }

        let keys: Vec<String> = rows.iter().map(|(_, key)| key.clone()).collect();

        // Rows contributed by earlier collections are merged into, not
        // duplicated: look existing report rows up by both the primary and
        // this collection's own mapping key.
        let mut by_primary: HashMap<String, Document> = HashMap::new();
        let mut by_current: HashMap<String, Document> = HashMap::new();
        for (_, doc) in target.find_by_either(primary_field, &current_field, &keys)? {
            if let Some(key) = doc.get(primary_field).and_then(|v| v.to_key_string()) {
                by_primary.insert(key, doc.clone());
            }
            if let Some(key) = doc.get(&current_field).and_then(|v| v.to_key_string()) {
                by_current.insert(key, doc);
            }
        }

        let joined = join_foreign_rows(ctx, spec, &foreign_bases, &keys)?;

        let now = Utc::now().naive_utc();
        for (doc, key) in &rows {
            let mut derived = by_primary
                .get(key)
                .or_else(|| by_current.get(key))
                .cloned()
                .unwrap_or_default();

            let mut foreign: BTreeMap<String, Document> = BTreeMap::new();
            for (foreign_base, by_key) in &joined {
                if let Some(row) = by_key.get(key) {
                    foreign.insert(foreign_base.clone(), row.clone());
                }
            }
            let row_ctx = RowContext {
                base,
                row: doc,
                foreign: &foreign,
            };

            for formula in &sorted {
                if formula.logic_name_key.is_empty() || formula.formula_text.is_empty() {
                    warn!("skipping formula with missing logicNameKey or formulaText");
                    continue;
                }
                let value = match evaluate_formula(formula, &row_ctx, &derived, outputs) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(
                            "formula `{}` failed for mapping key `{key}`: {e}; using 0",
                            formula.logic_name_key
                        );
                        0.0
                    }
                };
                derived.insert(formula.logic_name_key.to_lowercase(), Value::from_numeric(value));
            }

            derived.insert(current_field.clone(), key.as_str());
            derived.insert(meta::PROCESSED_AT, Value::Time(now));

            // The primary collection anchors its own key; later contributors
            // merge onto a previously-seen primary row when one exists.
            let filter_field = if base == primary_base || by_primary.contains_key(key) {
                primary_field
            } else {
                current_field.as_str()
            };
            match target.upsert_by_key(filter_field, key, &derived) {
                Ok(_) => run.processed += 1,
                Err(e) => {
                    run.errors += 1;
                    warn!("failed to upsert report row for mapping key `{key}`: {e}");
                }
            }
        }

        // Release batch buffers before yielding.
        drop(rows);
        drop(by_primary);
        drop(by_current);
        ctx.yield_between_batches().await;
    }

    if run.skipped > 0 {
        warn!(
            "skipped {} row(s) from `{base}` with no derivable mapping key",
            run.skipped
        );
    }
    Ok(run)
}

/// For each foreign collection referenced by the current partition, find
/// the processed rows whose mapping key matches one of the batch's keys.
///
/// Keys are recomputed per row because processed rows do not persist their
/// mapping keys.
/// TODO: stamp mapping keys onto processed rows at promotion so this join
/// can use an indexed lookup instead of a scan.
fn join_foreign_rows(
    ctx: &JobContext,
    spec: &FormulaDocument,
    foreign_bases: &BTreeSet<String>,
    keys: &[String],
) -> Result<BTreeMap<String, HashMap<String, Document>>, JobError> {
    let mut joined: BTreeMap<String, HashMap<String, Document>> = BTreeMap::new();
    if foreign_bases.is_empty() {
        return Ok(joined);
    }

    let wanted: BTreeSet<&String> = keys.iter().collect();
    for base in foreign_bases {
        let empty_fields = Vec::new();
        let key_fields = spec.mapping_keys.get(base).unwrap_or(&empty_fields);
        let collection = ctx
            .store
            .collection(&format!("{base}{}", meta::PROCESSED_SUFFIX))?;

        let mut by_key: HashMap<String, Document> = HashMap::new();
        let mut cursor =
            collection.find_batches(&Filter::empty(), ctx.config.formula_batch_size)?;
        loop {
            let batch = cursor.next_batch()?;
            if batch.is_empty() {
                break;
            }
            for (id, doc) in batch {
                let Some(key) = build_mapping_key(&doc, key_fields, Some(id)) else {
                    continue;
                };
                if wanted.contains(&key) && !by_key.contains_key(&key) {
                    by_key.insert(key, doc);
                }
            }
        }
        joined.insert(base.clone(), by_key);
    }
    Ok(joined)
}

/// Stream the finished report and stamp delta columns, reasons, and the
/// reconciliation status onto every row. Never inserts.
async fn delta_reason_pass(
    ctx: &JobContext,
    spec: &FormulaDocument,
    target: &Collection,
    primary_field: &str,
) -> Result<u64, JobError> {
    let mut rows = 0u64;
    let mut cursor = target.find_batches(&Filter::empty(), ctx.config.formula_batch_size)?;
    loop {
        ctx.cancel.check()?;
        let batch = cursor.next_batch()?;
        if batch.is_empty() {
            break;
        }

        let now = Utc::now().naive_utc();
        for (id, doc) in batch {
            let mut fields = doc.clone();
            let mut update = Document::new();

            for delta in &spec.delta_columns {
                let value = Value::from_numeric(evaluate_delta_column(delta, &fields));
                let name = delta.delta_column_name.to_lowercase();
                fields.insert(name.clone(), value.clone());
                update.insert(name, value);
            }

            let outcome = evaluate_reasons(&spec.reasons, &fields, spec.missing_delta_policy);
            update.insert("reason", outcome.reason.as_str());
            update.insert("reconciliation_status", outcome.status.as_str());
            update.insert(meta::PROCESSED_AT, Value::Time(now));

            let by_key = doc
                .get(primary_field)
                .and_then(|v| v.to_key_string());
            let result = match by_key {
                Some(key) => target.update_by_key(primary_field, &key, &update).map(|_| ()),
                None => target.update_by_id(id, &update).map(|_| ()),
            };
            match result {
                Ok(()) => rows += 1,
                Err(e) => warn!("failed to update report row {id} in delta pass: {e}"),
            }
        }
        ctx.yield_between_batches().await;
    }
    Ok(rows)
}
