use thiserror::Error;

use recon_ingest::IngestError;
use recon_store::StoreError;

#[derive(Debug, Error)]
pub enum JobError {
    /// Invalid configuration or request input. Surfaces as 400.
    #[error("{0}")]
    Config(String),
    /// A named data source or report does not exist. Surfaces as 404.
    #[error("{0}")]
    NotFound(String),
    /// The target already exists. Surfaces as 409.
    #[error("{0}")]
    Conflict(String),
    /// The job's cancel token fired; the job stopped at a batch boundary.
    #[error("job cancelled: {0}")]
    Cancelled(String),
    /// A persisted document no longer matches its expected shape.
    #[error("corrupt stored document: {0}")]
    Corrupt(String),
    /// The background job worker is no longer running. Surfaces as 503.
    #[error("job queue is not running")]
    QueueClosed,
    /// Storage failure. Surfaces as 503 so callers retry; promotion and
    /// merging are idempotent under retry.
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl JobError {
    /// HTTP-shaped status code for the operation envelope.
    pub fn status(&self) -> u16 {
        match self {
            JobError::Config(_) => 400,
            JobError::NotFound(_) => 404,
            JobError::Conflict(_) => 409,
            JobError::Store(_) | JobError::QueueClosed => 503,
            JobError::Cancelled(_) | JobError::Corrupt(_) | JobError::Ingest(_) => 500,
        }
    }
}
