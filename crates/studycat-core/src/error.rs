//! Core error types for studycat-core.
//!
//! This module defines the error hierarchy using thiserror. Ledger
//! rejections live next to the storage errors because callers match on both.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for studycat-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Persistent store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A background service stopped accepting requests
    #[error("{service} service is not running")]
    ServiceUnavailable { service: &'static str },

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Key-value store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked by another process
    #[error("Database is locked")]
    Locked,

    /// A persisted record could not be decoded
    #[error("Record '{key}' is corrupt: {message}")]
    Corrupt { key: String, message: String },

    /// Lock around the store was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Invalid date range
    #[error("Invalid date range: end ({end}) must not be before start ({start})")]
    InvalidDateRange { start: String, end: String },

    /// Date could not be parsed
    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    /// Invalid value
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Ledger request failures.
///
/// `BadDelta`, `BadCost` and `Insufficient` are rejections: the balance is
/// untouched. `Timeout` and `Unavailable` are soft failures a caller must
/// treat as "no mutation happened".
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("delta must be a positive finite number")]
    BadDelta,

    #[error("cost must be a positive finite number")]
    BadCost,

    #[error("insufficient points: balance {balance}, cost {cost}")]
    Insufficient { balance: u64, cost: u64 },

    #[error("points authority did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("points authority is not running")]
    Unavailable,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LedgerError {
    /// Machine-readable reason used in message responses.
    pub fn reason(&self) -> &'static str {
        match self {
            LedgerError::BadDelta => "bad_delta",
            LedgerError::BadCost => "bad_cost",
            LedgerError::Insufficient { .. } => "insufficient",
            LedgerError::Timeout { .. } => "timeout",
            LedgerError::Unavailable => "no_response",
            LedgerError::Core(_) => "storage",
        }
    }

    /// Balance echoed back with the rejection, when one is known.
    pub fn balance(&self) -> Option<u64> {
        match self {
            LedgerError::Insufficient { balance, .. } => Some(*balance),
            _ => None,
        }
    }
}

impl From<LedgerError> for CoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Core(inner) => inner,
            other => CoreError::Custom(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(e, _msg)
                if e.code == rusqlite::ErrorCode::DatabaseLocked
                    || e.code == rusqlite::ErrorCode::DatabaseBusy =>
            {
                StorageError::Locked
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Storage(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_reasons_match_wire_names() {
        assert_eq!(LedgerError::BadDelta.reason(), "bad_delta");
        assert_eq!(LedgerError::BadCost.reason(), "bad_cost");
        let insufficient = LedgerError::Insufficient { balance: 7, cost: 10 };
        assert_eq!(insufficient.reason(), "insufficient");
        assert_eq!(insufficient.balance(), Some(7));
        assert_eq!(LedgerError::Unavailable.balance(), None);
    }

    #[test]
    fn busy_sqlite_maps_to_locked() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(matches!(StorageError::from(err), StorageError::Locked));
    }
}
