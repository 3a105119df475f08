//! Error types for capcoref-core.

use thiserror::Error;

/// Result type for capcoref-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for capcoref-core operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (mention keys, pair keys, label indices).
    #[error("Parse error: {0}")]
    Parse(String),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A structural invariant of a graph or chain set does not hold.
    ///
    /// This is a programming error upstream, never a data problem.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

impl Error {
    /// Create an invalid input error.
    #[must_use]
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a parse error.
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an invariant violation error.
    #[must_use]
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}
