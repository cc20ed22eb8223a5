//! Store error types.

use thiserror::Error;

/// Errors raised by sync store implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON column could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Blocking task failed to complete.
    #[error("Store task failed: {0}")]
    Task(String),

    /// Stored data violates an invariant.
    #[error("Integrity error: {0}")]
    Integrity(String),
}
