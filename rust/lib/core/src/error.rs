use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. The UI maps them to transient
// notifications; messages may be reworded, codes never change.

/// Stable error code constants.
pub mod error_code {
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_FAILED: &str = "VALIDATION_FAILED";
    pub const BUSY: &str = "BUSY";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const INTERNAL: &str = "INTERNAL";
}

// ── ServiceError ────────────────────────────────────────────────────

/// Unified error type for ordering, tree and reconciliation operations.
///
/// None of these are fatal to the process. The worst outcome of any of
/// them is a stale or rolled-back list, never a corrupted persisted order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Item id does not exist in the sibling list.
    #[error("{0}")]
    NotFound(String),

    /// Malformed input (mixed parent keys, duplicate ids). Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// A write for the same parent key is still in flight.
    #[error("{0}")]
    Busy(String),

    /// The store failed or timed out. Propagated unchanged to the caller.
    #[error("{0}")]
    Storage(String),

    /// Serialization or task failures.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Stable, machine-readable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => error_code::NOT_FOUND,
            ServiceError::Validation(_) => error_code::VALIDATION_FAILED,
            ServiceError::Busy(_) => error_code::BUSY,
            ServiceError::Storage(_) => error_code::STORAGE_ERROR,
            ServiceError::Internal(_) => error_code::INTERNAL,
        }
    }

    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Busy(_) | ServiceError::Storage(_))
    }
}
