//! Error types for WordVault.
//!
//! The taxonomy separates caller mistakes (`Validation`), cooperative stops
//! (`Cancelled`), storage failures (`Storage`), and pool backpressure
//! (`PoolExhausted`), so the HTTP layer and the CLI can map each class to
//! the right surface behavior without string matching.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for WordVault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Main error type for WordVault.
#[derive(Error, Debug)]
pub enum VaultError {
    /// The caller asked for something malformed (bad file name, missing
    /// parameter, job already running). Not retryable as-is.
    #[error("invalid request: {0}")]
    Validation(String),

    /// An ingestion run was stopped cooperatively. The transaction was
    /// rolled back in full; no partial table is ever visible.
    #[error("ingestion cancelled")]
    Cancelled,

    /// SQLite-level failure (transaction, statement, or connection).
    #[error("storage error: {0}")]
    Storage(String),

    /// No pooled connection became available within the timeout. This is a
    /// backpressure signal, not a fault; callers may retry.
    #[error("no database connection available within {0:?}")]
    PoolExhausted(Duration),

    /// The pool has not been initialized, or `close_all` has run.
    #[error("connection pool is not initialized")]
    PoolClosed,

    /// The source workbook could not be parsed.
    #[error("workbook error: {0}")]
    Workbook(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sqlx::Error> for VaultError {
    fn from(err: sqlx::Error) -> Self {
        VaultError::Storage(err.to_string())
    }
}

impl VaultError {
    /// True for errors a caller may retry without changing the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VaultError::PoolExhausted(_))
    }
}
