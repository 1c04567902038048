use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Collection not found: {0}")]
    NoSuchCollection(String),

    #[error("Collection already exists: {0}")]
    CollectionAlreadyExists(String),

    #[error("Document not found: {0}")]
    NoSuchDocument(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid field name: {0}")]
    InvalidFieldName(String),

    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Store closed")]
    StoreClosed,
}

impl DbError {
    /// True for errors caused by the caller's input rather than a server fault.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NoSuchCollection(_)
                | Self::CollectionAlreadyExists(_)
                | Self::NoSuchDocument(_)
                | Self::InvalidOperator(_)
                | Self::InvalidFieldName(_)
                | Self::InvalidValue(_)
                | Self::InvalidRequest(_)
        )
    }
}
