use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by document store backends regardless of the underlying database.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend could not be reached or failed.
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// No document with this id.
    #[error("document `{collection}/{id}` not found")]
    NotFound { collection: String, id: String },
    /// Every transaction attempt hit a concurrent write.
    #[error("transaction on `{collection}/{id}` exhausted {attempts} attempts")]
    TransactionExhausted {
        collection: String,
        id: String,
        attempts: u32,
    },
    /// The transaction body refused to produce a write.
    #[error("transaction aborted")]
    Aborted(#[source] Box<dyn Error + Send + Sync>),
    /// A document does not match its model.
    #[error("malformed document `{id}`")]
    Decode {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Build a [`StorageError::NotFound`].
    pub fn not_found(collection: &str, id: &str) -> Self {
        StorageError::NotFound {
            collection: collection.to_owned(),
            id: id.to_owned(),
        }
    }
}
