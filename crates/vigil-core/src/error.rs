//! Error types and result aliases shared across Vigil components.
//!
//! Errors are structured for programmatic handling: store failures are
//! distinguishable from missing objects, and CAS conflicts are a normal
//! outcome rather than a hard failure.

/// The result type used throughout Vigil.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Vigil operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided (bad configuration value, bad name, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The requested object or tenant was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A precondition for the operation was not met (CAS conflict, retries
    /// exhausted).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// An internal error that should not happen in normal operation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true when this error means the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::storage_with_source("filesystem i/o failed", err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
