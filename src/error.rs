//! Error types for feedwatch.

use thiserror::Error;

/// Common error type for feedwatch.
#[derive(Error, Debug)]
pub enum FeedwatchError {
    /// Feed retrieval or parsing failed.
    ///
    /// Covers malformed URLs, network failures, non-2xx responses, oversized
    /// bodies, timeouts and unparseable documents. The fetcher never retries.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Persistence error.
    ///
    /// Errors from sqlx are automatically converted.
    #[error("database error: {0}")]
    Database(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Resource not found.
    #[error("{0} not found")]
    NotFound(String),

    /// Delivery of a message to a subscriber failed.
    #[error("delivery error: {0}")]
    Delivery(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FeedwatchError {
    /// Whether this error came from feed retrieval.
    pub fn is_fetch(&self) -> bool {
        matches!(self, FeedwatchError::Fetch(_))
    }

    /// Whether this error came from the persistence layer.
    pub fn is_persistence(&self) -> bool {
        matches!(self, FeedwatchError::Database(_))
    }
}

// Conversion from sqlx errors
impl From<sqlx::Error> for FeedwatchError {
    fn from(e: sqlx::Error) -> Self {
        FeedwatchError::Database(e.to_string())
    }
}

/// Result type alias for feedwatch operations.
pub type Result<T> = std::result::Result<T, FeedwatchError>;
