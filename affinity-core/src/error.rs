//! Error types for the affinity core library.

use thiserror::Error;

use crate::types::ContradictionId;

/// Top-level error type for all affinity operations.
#[derive(Error, Debug)]
pub enum AffinityError {
    /// An operation required an entity that does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// What kind of entity was looked up (memory, contradiction, …).
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// An input was out of range or a required text was empty.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The contradiction was already resolved. Soft: the ledger reports it
    /// as a successful no-op unless the caller asks for strict semantics.
    #[error("Contradiction already resolved: {0}")]
    AlreadyResolved(ContradictionId),

    /// The durable store failed. Retryable by the caller.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// A retrieval exceeded its latency budget. No partial result is returned.
    #[error("Deadline exceeded: {operation} took {elapsed_ms}ms (budget: {budget_ms}ms)")]
    DeadlineExceeded {
        /// Which operation exceeded the budget.
        operation: String,
        /// Milliseconds elapsed.
        elapsed_ms: u64,
        /// Milliseconds budgeted.
        budget_ms: u64,
    },

    /// Serialization or deserialization failure of a stored document.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AffinityError {
    /// Shorthand for [`AffinityError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Whether the caller may retry the operation unchanged.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<rusqlite::Error> for AffinityError {
    fn from(err: rusqlite::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for AffinityError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, AffinityError>;
