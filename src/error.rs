//! Error types for capcoref.

use thiserror::Error;

/// Result type for capcoref operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for capcoref operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error from the core data model.
    #[error(transparent)]
    Core(#[from] capcoref_core::Error),

    /// No assignment satisfies the constraints (usually contradictory fixed links).
    #[error("Infeasible: {0}")]
    Infeasible(String),

    /// The exact search gave up after exhausting its node budget.
    #[error("Search limit reached after {nodes} nodes")]
    SearchLimit {
        /// Nodes expanded before giving up.
        nodes: u64,
    },

    /// Solver failure that is neither infeasibility nor a budget (thread pool, panics).
    #[error("Solver error: {0}")]
    Solver(String),

    /// A structural invariant does not hold. A bug, never a data problem.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration is invalid.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Checkpoint store error.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Create an infeasibility error.
    pub fn infeasible(msg: impl Into<String>) -> Self {
        Error::Infeasible(msg.into())
    }

    /// Create a solver error.
    pub fn solver(msg: impl Into<String>) -> Self {
        Error::Solver(msg.into())
    }

    /// Create an invariant violation error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Create a checkpoint error.
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Error::Checkpoint(msg.into())
    }

    /// Whether the error depends on solver parameters (budget, threads)
    /// rather than on the inputs.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::SearchLimit { .. } | Error::Solver(_))
    }
}
