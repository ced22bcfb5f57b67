//! Staging promotion: raw → processed (+ backup) with change detection and
//! exactly-once progression under retries.

use std::collections::HashMap;

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use recon_ingest::{mark_status_by_datasource, UploadStatus};
use recon_model::{build_unique_id, meta, sanitize_document, Document, FieldMapping, Value};
use recon_store::{Collection, DocId, Filter};

use crate::context::JobContext;
use crate::error::JobError;
use crate::registry;

/// Per-collection promotion counters.
///
/// For every successful batch: `inserted + updated + skipped + errors`
/// equals the batch size, and `moved_to_backup` equals the batch size minus
/// `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromoteCounters {
    pub collection_name: String,
    pub status: String,
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
    /// Rows written to the processed collection (`inserted + updated`).
    pub processed: u64,
    pub moved_to_backup: u64,
    pub files_marked_processed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Promote one data source (or all configured sources) from raw to
/// processed, archiving originals in backup.
///
/// A failing collection records an error entry and the run continues with
/// the next source; cancellation marks the source's files `failed` and
/// aborts the run.
pub async fn promote(
    ctx: &JobContext,
    collection_name: Option<&str>,
) -> Result<Vec<PromoteCounters>, JobError> {
    let mappings = match collection_name {
        Some(name) => registry::get_field_mapping(&ctx.store, name)?
            .into_iter()
            .collect::<Vec<_>>(),
        None => registry::list_field_mappings(&ctx.store)?,
    };

    let mut results = Vec::with_capacity(mappings.len());
    for mapping in &mappings {
        if mapping.collection_name.is_empty() || mapping.selected_fields.is_empty() {
            warn!(
                "skipping field mapping with missing collection name or fields: {:?}",
                mapping.collection_name
            );
            continue;
        }
        match promote_collection(ctx, mapping).await {
            Ok(counters) => results.push(counters),
            Err(err) => {
                let mut metadata = Document::new();
                metadata.insert("error", err.to_string());
                metadata.insert("failed_at", Value::Time(Utc::now().naive_utc()));
                if let Err(mark_err) = mark_status_by_datasource(
                    &ctx.store,
                    &mapping.collection_name,
                    UploadStatus::Failed,
                    metadata,
                ) {
                    warn!(
                        "failed to mark files failed for `{}`: {mark_err}",
                        mapping.collection_name
                    );
                }
                if matches!(err, JobError::Cancelled(_)) {
                    return Err(err);
                }
                results.push(PromoteCounters {
                    collection_name: mapping.collection_name.clone(),
                    status: "error".to_string(),
                    error: Some(err.to_string()),
                    ..PromoteCounters::default()
                });
            }
        }
    }
    Ok(results)
}

async fn promote_collection(
    ctx: &JobContext,
    mapping: &FieldMapping,
) -> Result<PromoteCounters, JobError> {
    let name = &mapping.collection_name;
    let raw = ctx.store.collection(name)?;

    let mut counters = PromoteCounters {
        collection_name: name.clone(),
        status: "success".to_string(),
        ..PromoteCounters::default()
    };

    if raw.count(&Filter::empty())? == 0 {
        info!("collection `{name}` is empty, nothing to promote");
        let mut metadata = Document::new();
        metadata.insert("processed_at", Value::Time(Utc::now().naive_utc()));
        metadata.insert("documents_processed", 0i64);
        metadata.insert("note", "collection was empty, no documents to process");
        counters.files_marked_processed =
            mark_status_by_datasource(&ctx.store, name, UploadStatus::Processed, metadata)? as u64;
        counters.status = "skipped".to_string();
        return Ok(counters);
    }

    let source = registry::get_data_source(&ctx.store, name)?;
    let (unique_ids, allow_null_identity) = match source {
        Some(cfg) => (cfg.unique_ids, cfg.allow_null_identity),
        None => (Vec::new(), true),
    };
    info!("promoting `{name}` with unique_ids {unique_ids:?}");

    let processed = ctx
        .store
        .collection(&format!("{name}{}", meta::PROCESSED_SUFFIX))?;
    processed.ensure_unique_index(meta::UNIQUE_ID)?;
    let backup = ctx
        .store
        .collection(&format!("{name}{}", meta::BACKUP_SUFFIX))?;

    let mut metadata = Document::new();
    metadata.insert("processing_started_at", Value::Time(Utc::now().naive_utc()));
    mark_status_by_datasource(&ctx.store, name, UploadStatus::Processing, metadata)?;

    let mut cursor = raw.find_batches(&Filter::empty(), ctx.config.promote_batch_size)?;
    let mut batch_num = 0u64;
    loop {
        ctx.cancel.check()?;
        let batch = cursor.next_batch()?;
        if batch.is_empty() {
            break;
        }
        batch_num += 1;
        promote_batch(
            mapping,
            &unique_ids,
            allow_null_identity,
            &raw,
            &processed,
            &backup,
            batch,
            batch_num,
            &mut counters,
        )?;
        ctx.yield_between_batches().await;
    }

    info!(
        "promoted `{name}`: {} inserted, {} updated, {} skipped, {} errors, {} moved to backup",
        counters.inserted, counters.updated, counters.skipped, counters.errors,
        counters.moved_to_backup
    );

    let mut metadata = Document::new();
    metadata.insert("processed_at", Value::Time(Utc::now().naive_utc()));
    metadata.insert("documents_processed", counters.processed as i64);
    counters.files_marked_processed =
        mark_status_by_datasource(&ctx.store, name, UploadStatus::Processed, metadata)? as u64;

    Ok(counters)
}

struct Entry {
    id: DocId,
    original: Document,
    unique_id: Option<String>,
    sanitized: Document,
}

#[allow(clippy::too_many_arguments)]
fn promote_batch(
    mapping: &FieldMapping,
    unique_ids: &[String],
    allow_null_identity: bool,
    raw: &Collection,
    processed: &Collection,
    backup: &Collection,
    batch: Vec<(DocId, Document)>,
    batch_num: u64,
    counters: &mut PromoteCounters,
) -> Result<(), JobError> {
    let now = Utc::now().naive_utc();
    let name = &mapping.collection_name;

    let mut entries: Vec<Entry> = Vec::with_capacity(batch.len());
    for (id, original) in batch {
        // Identity comes from the original document, before projection.
        let unique_id = build_unique_id(&original, unique_ids);
        if unique_id.is_none() && !unique_ids.is_empty() && !allow_null_identity {
            counters.errors += 1;
            warn!(
                "row {id} in `{name}` is missing identity components and null identities \
                 are disabled; leaving it in place"
            );
            continue;
        }
        let mut sanitized = sanitize_document(&original, &mapping.selected_fields, now);
        match &unique_id {
            Some(uid) => sanitized.insert(meta::UNIQUE_ID, uid.as_str()),
            None => sanitized.insert(meta::UNIQUE_ID, Value::Null),
        };
        entries.push(Entry {
            id,
            original,
            unique_id,
            sanitized,
        });
    }

    // Everything that finished processing (inserted, updated, or skipped)
    // is archived; error rows stay in raw for the next run.
    let mut to_backup: Vec<&Entry> = Vec::with_capacity(entries.len());

    // Null-identity rows insert unconditionally.
    let null_entries: Vec<&Entry> = entries.iter().filter(|e| e.unique_id.is_none()).collect();
    if !null_entries.is_empty() {
        let docs: Vec<Document> = null_entries.iter().map(|e| e.sanitized.clone()).collect();
        match processed.insert_many(&docs) {
            Ok(ids) => {
                counters.inserted += ids.len() as u64;
                counters.processed += ids.len() as u64;
                to_backup.extend(null_entries.iter().copied());
            }
            Err(batch_err) => {
                warn!("bulk insert of null-identity rows failed in batch {batch_num}: {batch_err}");
                for &entry in &null_entries {
                    match processed.insert_one(&entry.sanitized) {
                        Ok(_) => {
                            counters.inserted += 1;
                            counters.processed += 1;
                            to_backup.push(entry);
                        }
                        Err(e) => {
                            counters.errors += 1;
                            warn!("failed to insert row {} from `{name}`: {e}", entry.id);
                        }
                    }
                }
            }
        }
    }

    // Keyed rows: one read for the whole batch, then change-detected writes.
    let keyed: Vec<&Entry> = entries.iter().filter(|e| e.unique_id.is_some()).collect();
    if !keyed.is_empty() {
        let keys: Vec<String> = keyed.iter().filter_map(|e| e.unique_id.clone()).collect();
        let existing: HashMap<String, Document> = processed
            .find_in(meta::UNIQUE_ID, &keys)?
            .into_iter()
            .filter_map(|(_, doc)| {
                doc.get(meta::UNIQUE_ID)
                    .and_then(|v| v.to_key_string())
                    .map(|key| (key, doc))
            })
            .collect();

        for entry in keyed {
            let key = entry.unique_id.as_deref().unwrap_or_default();
            match existing.get(key) {
                Some(current) => {
                    apply_keyed_update(processed, entry, current, key, now, counters, &mut to_backup)
                }
                None => {
                    // Inserted one at a time so a duplicate identity later
                    // in the same batch self-heals into an update.
                    match processed.insert_one(&entry.sanitized) {
                        Ok(_) => {
                            counters.inserted += 1;
                            counters.processed += 1;
                            to_backup.push(entry);
                        }
                        Err(e) if e.is_duplicate_key() => {
                            match processed.find_in(meta::UNIQUE_ID, &[key.to_string()])?.pop() {
                                Some((_, current)) => apply_keyed_update(
                                    processed,
                                    entry,
                                    &current,
                                    key,
                                    now,
                                    counters,
                                    &mut to_backup,
                                ),
                                None => {
                                    counters.errors += 1;
                                    warn!(
                                        "duplicate identity `{key}` in `{name}` but no stored row found"
                                    );
                                }
                            }
                        }
                        Err(e) => {
                            counters.errors += 1;
                            warn!("failed to insert row {} from `{name}`: {e}", entry.id);
                        }
                    }
                }
            }
        }
    }

    move_to_backup_and_delete(raw, backup, &to_backup, batch_num, name, counters)?;
    Ok(())
}

fn apply_keyed_update<'a>(
    processed: &Collection,
    entry: &'a Entry,
    current: &Document,
    key: &str,
    now: chrono::NaiveDateTime,
    counters: &mut PromoteCounters,
    to_backup: &mut Vec<&'a Entry>,
) {
    let changed = changed_fields(current, &entry.sanitized);
    if changed.is_empty() {
        counters.skipped += 1;
        to_backup.push(entry);
        return;
    }

    let mut update = changed;
    if let Some(processed_at) = entry.sanitized.get(meta::PROCESSED_AT) {
        update.insert(meta::PROCESSED_AT, processed_at.clone());
    }
    update.insert(meta::UPDATED_AT, Value::Time(now));

    match processed.update_by_key(meta::UNIQUE_ID, key, &update) {
        Ok(_) => {
            counters.updated += 1;
            counters.processed += 1;
            to_backup.push(entry);
        }
        Err(e) => {
            counters.errors += 1;
            warn!("failed to update row with identity `{key}`: {e}");
        }
    }
}

/// The attributes of `new` that differ from `current`, metadata excluded.
/// An empty result means the row is unchanged and the write is skipped
/// entirely.
fn changed_fields(current: &Document, new: &Document) -> Document {
    let mut changed = Document::new();
    for (key, value) in new.iter() {
        if meta::is_system_field(key) {
            continue;
        }
        if current.get(key) != Some(value) {
            changed.insert(key.clone(), value.clone());
        }
    }
    changed
}

fn move_to_backup_and_delete(
    raw: &Collection,
    backup: &Collection,
    entries: &[&Entry],
    batch_num: u64,
    name: &str,
    counters: &mut PromoteCounters,
) -> Result<(), JobError> {
    if entries.is_empty() {
        return Ok(());
    }

    let docs: Vec<Document> = entries
        .iter()
        .map(|entry| {
            let mut doc = entry.original.clone();
            if let Some(uid) = &entry.unique_id {
                doc.insert(meta::UNIQUE_ID, uid.as_str());
            }
            doc
        })
        .collect();
    let ids: Vec<DocId> = entries.iter().map(|e| e.id).collect();

    match backup.insert_many(&docs) {
        Ok(inserted) => {
            counters.moved_to_backup += inserted.len() as u64;
            let deleted = raw.delete_ids(&ids)?;
            info!(
                "batch {batch_num} for `{name}`: archived {} row(s), deleted {deleted} from raw",
                inserted.len()
            );
        }
        Err(e) if e.is_duplicate_key() => {
            // The archive tolerates duplicates: retry row by row, treating
            // an already-archived row as moved.
            warn!(
                "batch {batch_num} for `{name}`: backup batch hit duplicates, retrying per row"
            );
            let mut moved_ids: Vec<DocId> = Vec::with_capacity(docs.len());
            for (doc, id) in docs.iter().zip(&ids) {
                match backup.insert_one(doc) {
                    Ok(_) => moved_ids.push(*id),
                    Err(doc_err) if doc_err.is_duplicate_key() => moved_ids.push(*id),
                    Err(doc_err) => {
                        warn!("failed to archive row {id} from `{name}`: {doc_err}");
                    }
                }
            }
            counters.moved_to_backup += moved_ids.len() as u64;
            raw.delete_ids(&moved_ids)?;
        }
        Err(e) => {
            // Leave the batch in raw: the next run re-promotes (updates
            // skip, backup appends).
            warn!("batch {batch_num} for `{name}`: backup insert failed, keeping rows in raw: {e}");
        }
    }
    Ok(())
}
