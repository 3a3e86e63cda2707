//! Database error types.

use thiserror::Error;

/// Errors raised by the persistence gateway.
#[derive(Debug, Error)]
pub enum DbError {
    /// Underlying SQLite failure.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A credit row for this `(txid, user)` already exists. The caller
    /// must abort the enclosing transaction.
    #[error("duplicate credit for txid {txid} user {user_id}")]
    DuplicateCredit { txid: String, user_id: String },

    /// Stored data failed to parse back into its domain type.
    #[error("data integrity error: {0}")]
    Integrity(String),

    /// Schema version in the database is newer than this build supports.
    #[error("unsupported schema version {0}")]
    SchemaVersion(i32),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;
