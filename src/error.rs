//! Unified error hierarchy for the recovery engine
//!
//! Only persistence failures are meant to reach a caller as errors. Provider
//! category failures are caught and logged by the sync policy, and missing data
//! is expressed through `None` results rather than errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::SampleCategory;

/// Top-level error type for all engine operations
#[derive(Debug, Error)]
pub enum RecoveryError {
    /// Profile store or connection registry errors
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Device data provider errors, scoped to one sample category where possible
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected or failed a query
    #[error("{category} query failed: {reason}")]
    QueryFailed {
        category: SampleCategory,
        reason: String,
    },

    /// The query did not complete within the configured timeout
    #[error("{category} query timed out after {seconds}s")]
    Timeout {
        category: SampleCategory,
        seconds: u64,
    },

    /// A snapshot export could not be read or parsed
    #[error("Snapshot error: {reason}")]
    Snapshot { reason: String },
}

/// Profile store and connection registry errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite backend failure
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Record payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record payload could not be (de)compressed
    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Reading a user's data failed
    #[error("Read failed for user {user_id}: {reason}")]
    ReadFailed { user_id: String, reason: String },

    /// Writing a user's data failed
    #[error("Write failed for user {user_id}: {reason}")]
    WriteFailed { user_id: String, reason: String },

    /// A lock guarding the backend was poisoned by a panicking writer
    #[error("Store lock poisoned")]
    LockPoisoned,

    /// The blocking task running a query panicked or was cancelled
    #[error("Store task failed: {0}")]
    TaskFailed(String),
}

/// Sample validation errors raised while building canonical records
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// End time is not after start time
    #[error("Invalid time range: end {end} is not after start {start}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, RecoveryError>;

impl RecoveryError {
    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            RecoveryError::Store(StoreError::LockPoisoned | StoreError::TaskFailed(_)) => ErrorSeverity::Critical,
            RecoveryError::Store(_) => ErrorSeverity::Error,
            RecoveryError::Configuration(_) => ErrorSeverity::Error,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RecoveryError::Store(_) => {
                "Your health data could not be loaded or saved. Please try again later.".to_string()
            }
            RecoveryError::Configuration(reason) => {
                format!("Invalid configuration: {}", reason)
            }
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// The store backend itself is broken; later calls are unlikely to succeed
    Critical,
    /// The operation failed but the engine can continue
    Error,
}
