use std::io;
use thiserror::Error;

use crate::objects::TokenStatus;

/// Represents all possible errors that can occur when interacting with world-state storage
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO errors that occur when reading/writing files
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Errors that occur with the underlying storage backend
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Errors related to missing or invalid data
    #[error("Not found: {0}")]
    NotFound(String),

    /// Errors that occur during journal operations
    #[error("Journal error: {0}")]
    Journal(String),

    /// A key read by the transaction changed before it could commit
    #[error("Read conflict on key {0:?}")]
    Conflict(String),

    /// Generic errors that don't fit in other categories
    #[error("Other error: {0}")]
    Other(String),

    /// Anyhow error wrapper for error context
    #[error(transparent)]
    Context(#[from] anyhow::Error),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(feature = "rocksdb")]
impl From<rocksdb::Error> for StorageError {
    fn from(err: rocksdb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("Row not found".to_string()),
            _ => StorageError::Database(err.to_string()),
        }
    }
}

impl From<String> for StorageError {
    fn from(err: String) -> Self {
        StorageError::Other(err)
    }
}

impl From<&str> for StorageError {
    fn from(err: &str) -> Self {
        StorageError::Other(err.to_string())
    }
}

/// Failures of a credit-token ledger transaction.
///
/// Every variant is terminal for the transaction that raised it: nothing the
/// transaction staged is committed.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No record exists under the referenced id
    #[error("credit token {0} does not exist")]
    NotFound(String),

    /// Create was called with an id that is already taken
    #[error("credit token {0} already exists")]
    AlreadyExists(String),

    /// Malformed input: bad number, unknown status, no-op transfer, bad arity
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The status change is not allowed by the transition table
    #[error("status transition {from} -> {to} is not allowed")]
    InvalidTransition { from: TokenStatus, to: TokenStatus },

    /// The configured authorizer rejected the caller
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Commit-time read validation failed; the caller may resubmit
    #[error("transaction conflict on key {0:?}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for LedgerError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(key) => LedgerError::Conflict(key),
            other => LedgerError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        LedgerError::Serialization(err.to_string())
    }
}
