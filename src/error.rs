// src/error.rs

use crate::sync::log::SyncLogEntry;
use thiserror::Error;

/// Core error types for Tributary
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Null input, malformed DSL, or config parse failure
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A replicated row would violate a foreign key right now.
    /// The applier converts this into a deferral; it never reaches the coordinator.
    #[error("Foreign key violation on {table} (pk {pk}): {details}")]
    ForeignKeyViolation {
        table: String,
        pk: String,
        details: String,
    },

    /// The deferred-retry pass budget ran out with entries still unapplied
    #[error("Deferred change could not be applied after retries: {table} (pk {pk}): {reason}")]
    DeferredChangeFailed {
        table: String,
        pk: String,
        reason: String,
    },

    /// A peer's watermark fell below the oldest retained log version
    #[error(
        "Full resync required: client at version {client_version}, oldest available is {oldest_available}"
    )]
    FullResyncRequired {
        client_version: i64,
        oldest_available: i64,
    },

    /// Batch integrity check failed
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// A custom resolver declined, or the strategy could not decide
    #[error("Unresolved conflict on {}:{}", local.table_name, local.pk_value)]
    UnresolvedConflict {
        local: Box<SyncLogEntry>,
        remote: Box<SyncLogEntry>,
    },

    /// A drop-kind schema operation was applied while destructive changes were disabled
    #[error("Destructive operation not allowed: {operation}")]
    Destructive { operation: String },

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),
}

/// Result type alias using Tributary's Error type
pub type Result<T> = std::result::Result<T, Error>;
