use log::{error, info};
use thiserror::Error;

use recon_model::{normalize_headers, Document, Value};
use recon_store::{Store, StoreError};

use crate::source::RowSource;
use crate::uploads;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read input file: {0}")]
    Io(std::io::Error),
    #[error("failed to parse tabular input: {0}")]
    Csv(csv::Error),
    #[error("input has no header row")]
    EmptyHeader,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of one file ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub upload_id: String,
    pub rows_inserted: u64,
    pub batches: u64,
    /// Batches that failed to persist (logged and skipped).
    pub batch_errors: u64,
}

/// Streams rows from a [`RowSource`] into a data source's raw collection.
pub struct Ingestor {
    store: Store,
    /// Rows per insert batch once the input is known to be large.
    batch_size: usize,
    /// Row count beyond which the input is treated as large: the buffered
    /// prefix is flushed and the remainder streams batch by batch, so the
    /// whole file is never resident.
    large_file_threshold: usize,
}

impl Ingestor {
    pub fn new(store: Store, batch_size: usize, large_file_threshold: usize) -> Self {
        Ingestor {
            store,
            batch_size: batch_size.max(1),
            large_file_threshold: large_file_threshold.max(1),
        }
    }

    /// Ingest one file into the raw collection named after the data source.
    ///
    /// Headers are normalized column-wise before the first row is written.
    /// Cell values are kept verbatim as strings (empty cells become nulls);
    /// sanitization happens later, at promotion. A failing batch is logged
    /// and the stream continues with the next.
    pub fn ingest(
        &self,
        datasource: &str,
        filename: &str,
        source: &mut dyn RowSource,
    ) -> Result<IngestReport, IngestError> {
        let raw_headers = source.headers()?;
        if raw_headers.is_empty() {
            return Err(IngestError::EmptyHeader);
        }
        let headers = normalize_headers(&raw_headers);

        let collection = self.store.collection(datasource)?;
        let mut report = IngestReport {
            upload_id: String::new(),
            rows_inserted: 0,
            batches: 0,
            batch_errors: 0,
        };

        let mut batch: Vec<Document> = Vec::new();
        let mut buffering = true;

        while let Some(row) = source.next_row()? {
            batch.push(row_to_document(&headers, row));

            if buffering && batch.len() > self.large_file_threshold {
                // Large input: stop buffering, flush the prefix, and fall
                // into steady-state batching.
                info!(
                    "input `{filename}` exceeds {} rows, switching to streaming batches of {}",
                    self.large_file_threshold, self.batch_size
                );
                buffering = false;
                self.flush(&collection, &mut batch, &mut report);
            } else if !buffering && batch.len() >= self.batch_size {
                self.flush(&collection, &mut batch, &mut report);
            }
        }

        if !batch.is_empty() {
            self.flush(&collection, &mut batch, &mut report);
        }

        report.upload_id = uploads::record_upload(
            &self.store,
            datasource,
            filename,
            report.rows_inserted,
        )?;

        info!(
            "ingested {} row(s) from `{filename}` into `{datasource}` in {} batch(es)",
            report.rows_inserted, report.batches
        );
        Ok(report)
    }

    fn flush(
        &self,
        collection: &recon_store::Collection,
        batch: &mut Vec<Document>,
        report: &mut IngestReport,
    ) {
        if batch.is_empty() {
            return;
        }
        report.batches += 1;
        match collection.insert_many(batch) {
            Ok(ids) => report.rows_inserted += ids.len() as u64,
            Err(e) => {
                report.batch_errors += 1;
                error!(
                    "failed to insert batch {} into `{}`: {e}",
                    report.batches,
                    collection.name()
                );
            }
        }
        batch.clear();
    }
}

fn row_to_document(headers: &[String], row: Vec<String>) -> Document {
    let mut doc = Document::new();
    for (idx, header) in headers.iter().enumerate() {
        let value = match row.get(idx) {
            Some(cell) if !cell.is_empty() => Value::String(cell.clone()),
            _ => Value::Null,
        };
        doc.insert(header.clone(), value);
    }
    doc
}
