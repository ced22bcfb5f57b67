use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid collection name `{0}`")]
    InvalidCollectionName(String),
    #[error("invalid field name `{0}`")]
    InvalidFieldName(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("document serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        if is_unique_violation(&err) {
            StoreError::DuplicateKey(err.to_string())
        } else {
            StoreError::Sqlite(err)
        }
    }
}

impl StoreError {
    /// True for unique-index violations, which append-only archives treat
    /// as "already archived" rather than failures.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StoreError::DuplicateKey(_))
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
