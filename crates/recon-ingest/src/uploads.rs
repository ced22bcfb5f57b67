//! Per-file upload records and their status lifecycle.

use std::fmt;

use chrono::Utc;
use uuid::Uuid;

use recon_model::{Document, Value};
use recon_store::{Filter, Store, StoreError};

/// Collection holding one record per ingested file.
pub const UPLOADED_FILES: &str = "uploaded_files";

/// Lifecycle: `uploaded → processing → processed | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Processing => "processing",
            UploadStatus::Processed => "processed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persist a new upload record in `uploaded` state. Returns the upload id.
pub fn record_upload(
    store: &Store,
    datasource: &str,
    filename: &str,
    row_count: u64,
) -> Result<String, StoreError> {
    let upload_id = Uuid::new_v4().to_string();
    let mut doc = Document::new();
    doc.insert("upload_id", upload_id.as_str());
    doc.insert("filename", filename);
    doc.insert("datasource", datasource);
    doc.insert("status", UploadStatus::Uploaded.as_str());
    doc.insert("row_count", row_count as i64);
    doc.insert("uploaded_at", Value::Time(Utc::now().naive_utc()));
    store.collection(UPLOADED_FILES)?.insert_one(&doc)?;
    Ok(upload_id)
}

/// Move every non-terminal record of a data source to `status`, merging the
/// extra metadata fields. Returns the number of records updated.
///
/// Only `uploaded` / `processing` records transition: files that already
/// finished keep their outcome across later runs.
pub fn mark_status_by_datasource(
    store: &Store,
    datasource: &str,
    status: UploadStatus,
    metadata: Document,
) -> Result<usize, StoreError> {
    let collection = store.collection(UPLOADED_FILES)?;
    let mut updated = 0usize;
    for (id, doc) in collection.find_all(&Filter::empty())? {
        let matches_source = doc
            .get("datasource")
            .and_then(Value::as_str)
            .is_some_and(|s| s == datasource);
        if !matches_source {
            continue;
        }
        let current = doc.get("status").and_then(Value::as_str).unwrap_or("");
        if !matches!(current, "uploaded" | "processing") {
            continue;
        }
        let mut fields = metadata.clone();
        fields.insert("status", status.as_str());
        fields.insert("updated_at", Value::Time(Utc::now().naive_utc()));
        if collection.update_by_id(id, &fields)? {
            updated += 1;
        }
    }
    Ok(updated)
}

/// Upload records, newest first, optionally restricted to one data source.
pub fn list_uploads(
    store: &Store,
    datasource: Option<&str>,
) -> Result<Vec<Document>, StoreError> {
    let collection = store.collection(UPLOADED_FILES)?;
    let mut uploads: Vec<(i64, Document)> = collection
        .find_all(&Filter::empty())?
        .into_iter()
        .filter(|(_, doc)| match datasource {
            Some(name) => doc
                .get("datasource")
                .and_then(Value::as_str)
                .is_some_and(|s| s == name),
            None => true,
        })
        .collect();
    uploads.sort_by_key(|(id, _)| std::cmp::Reverse(*id));
    Ok(uploads.into_iter().map(|(_, doc)| doc).collect())
}
