//! Error types for content store operations

use thiserror::Error;

/// Content store result type
pub type Result<T> = std::result::Result<T, StoreError>;

/// Content store errors
///
/// None of these are retried internally. A failure after a placeholder row
/// was inserted has already been rolled back by the time the caller sees it
/// (unless the caller owns the enclosing transaction).
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row that the operation expected to exist does not
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// Streaming the payload into or out of a blob handle failed
    #[error("I/O failure while streaming content: {0}")]
    IoFailure(#[from] std::io::Error),

    /// The storage engine rejected a statement
    #[error("Dialect failure: {0}")]
    DialectFailure(#[from] rusqlite::Error),

    /// Invalid configuration or arguments (e.g. negative max versions)
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl StoreError {
    /// Shorthand for an `EntryNotFound` with a formatted description
    pub(crate) fn not_found(what: impl std::fmt::Display) -> Self {
        StoreError::EntryNotFound(what.to_string())
    }

    /// True for `EntryNotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::EntryNotFound(_))
    }
}
