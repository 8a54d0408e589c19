//! Storage error types and result alias.
//!
//! Every backend maps its internal failures onto [`StorageError`]. Callers
//! above the storage layer only need to distinguish three situations:
//!
//! - [`StorageError::Conflict`]: an optimistic precondition failed and the read-modify-write cycle
//!   should be re-run (see [`with_cas_retry`](crate::retry::with_cas_retry)).
//! - [`StorageError::Timeout`] and [`StorageError::Connection`]: the store is unreachable. These
//!   are [transient](StorageError::is_transient).
//! - Everything else: the store answered, but with something unusable.
//!
//! # Example
//!
//! ```
//! use warden_storage::{StorageError, StorageResult};
//!
//! fn lookup(key: &str) -> StorageResult<Vec<u8>> {
//!     Err(StorageError::not_found(key))
//! }
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
///
/// Errors preserve their source chain via the `#[source]` attribute.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// The requested key was not found in the storage backend.
    #[error("Key not found: {key}")]
    NotFound {
        /// The key that was not found.
        key: String,
    },

    /// A compare-and-set precondition did not hold.
    ///
    /// Raised by [`compare_and_set`](crate::StorageBackend::compare_and_set) and by
    /// [`Transaction::commit`](crate::Transaction::commit) when any buffered precondition
    /// fails. No write was applied.
    #[error("Transaction conflict")]
    Conflict,

    /// A read-modify-write cycle kept losing the compare-and-set race.
    #[error("Compare-and-set retries exhausted after {attempts} attempts")]
    CasRetriesExhausted {
        /// Total attempts made, including the first.
        attempts: u32,
    },

    /// Connection or network error.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error that caused this connection failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Serialization or deserialization error.
    ///
    /// Usually indicates a corrupted record or a schema mismatch between
    /// writer and reader.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error that caused serialization to fail.
        #[source]
        source: Option<BoxError>,
    },

    /// Internal storage backend error.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error that caused this internal failure.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation exceeded its deadline.
    #[error("Operation timeout")]
    Timeout,
}

impl StorageError {
    /// Creates a new `NotFound` error for the given key.
    #[must_use]
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Creates a new `Conflict` error.
    #[must_use]
    pub fn conflict() -> Self {
        Self::Conflict
    }

    /// Creates a new `CasRetriesExhausted` error.
    #[must_use]
    pub fn cas_retries_exhausted(attempts: u32) -> Self {
        Self::CasRetriesExhausted { attempts }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Timeout` error.
    #[must_use]
    pub fn timeout() -> Self {
        Self::Timeout
    }

    /// Returns `true` when the store could not be reached at all.
    ///
    /// Connection failures and timeouts are transient. Conflicts are not:
    /// they are resolved by re-reading state, not by repeating the same call.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout)
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source("invalid JSON record", err)
    }
}
