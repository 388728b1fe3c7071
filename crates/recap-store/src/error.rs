use thiserror::Error;

/// Errors that can occur within the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No row with the given primary key exists.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Uniqueness or foreign-key breach — a caller bug, logged at error.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// I/O-level failure; the caller may retry with backoff.
    #[error("Store unavailable: {0}")]
    Transient(String),

    /// A JSON column failed to round-trip.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The on-disk schema is ahead of this binary.
    #[error("Schema version {found} is newer than supported {supported}")]
    UnknownSchemaVersion { found: i64, supported: i64 },
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) => {
                use rusqlite::ErrorCode;
                match err.code {
                    ErrorCode::ConstraintViolation => StoreError::Constraint(
                        msg.clone().unwrap_or_else(|| e.to_string()),
                    ),
                    _ => StoreError::Transient(e.to_string()),
                }
            }
            _ => StoreError::Transient(e.to_string()),
        }
    }
}

impl From<StoreError> for recap_core::RecapError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { entity, id } => {
                recap_core::RecapError::NotFound { entity, id }
            }
            StoreError::Constraint(msg) => recap_core::RecapError::StoreConstraint(msg),
            StoreError::Serialization(e) => recap_core::RecapError::Serialization(e),
            other => recap_core::RecapError::StoreTransient(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
