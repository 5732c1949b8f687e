//! Error types for the budget ledger service

use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {

    // =============================
    // Ledger Errors
    // =============================

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Assistant error: {0}")]
    Upstream(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        LedgerError::Upstream(err.to_string())
    }
}

impl LedgerError {
    /// True for failures the caller cannot fix by changing the request.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            LedgerError::Storage(_)
                | LedgerError::Upstream(_)
                | LedgerError::SerializationError(_)
                | LedgerError::IoError(_)
        )
    }
}
