//! Streaming tabular ingestion.
//!
//! Spreadsheet *format* parsing is an external collaborator: anything that
//! can yield header + string records implements [`RowSource`], and a CSV
//! implementation is provided. Rows are normalized column-wise and written
//! into the data source's raw collection in batches; per-file metadata is
//! tracked in the `uploaded_files` collection.

mod ingest;
mod source;
mod uploads;

pub use ingest::{IngestError, IngestReport, Ingestor};
pub use source::{CsvRowSource, RowSource};
pub use uploads::{
    list_uploads, mark_status_by_datasource, record_upload, UploadStatus, UPLOADED_FILES,
};
