//! Storage backend trait definition.
//!
//! [`StorageBackend`] is the single shared resource of the identity core: a
//! low-latency key-value store with per-key compare-and-set, per-entry TTL
//! expiry, ordered range scans and atomic multi-key transactions. Every
//! component keeps its state here under its own key prefix and holds no
//! process-local mutable state, so any number of stateless instances can
//! share one store.
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Implement a corresponding [`Transaction`] type
//! 3. Map backend-specific errors to [`StorageError`](crate::StorageError)
//!
//! See [`MemoryBackend`](crate::MemoryBackend) for a reference implementation.

use std::{ops::RangeBounds, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{error::StorageResult, transaction::Transaction, types::KeyValue};

/// Abstract storage backend for key-value operations.
///
/// Backends must be thread-safe and support concurrent callers. A key whose
/// TTL has elapsed is logically absent for every operation, whether or not
/// it has been physically purged yet.
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair (clears any TTL) |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Store with automatic expiration |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`compare_and_set_with_ttl`](StorageBackend::compare_and_set_with_ttl) | Compare-and-swap that also sets a TTL |
/// | [`delete`](StorageBackend::delete) | Remove a key |
/// | [`get_range`](StorageBackend::get_range) | Retrieve multiple keys in a range |
/// | [`clear_range`](StorageBackend::clear_range) | Delete multiple keys in a range |
/// | [`transaction`](StorageBackend::transaction) | Begin an atomic transaction |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use warden_storage::{StorageBackend, MemoryBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// Returns `Ok(None)` if the key doesn't exist or has expired.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair, overwriting any previous value and clearing
    /// any TTL on the key.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores a key-value pair that expires after `ttl`.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// - **`expected: None`** is insert-if-absent. Succeeds only when the key does not exist (or
    ///   has expired).
    /// - **`expected: Some(value)`** is update-if-unchanged. Succeeds only when the current value
    ///   is a byte-for-byte match of `value`. An expired key never matches.
    ///
    /// On success any existing TTL on the key is cleared.
    ///
    /// # Errors
    ///
    /// [`StorageError::Conflict`](crate::StorageError::Conflict) when the precondition does not
    /// hold. Callers typically re-read and retry via
    /// [`with_cas_retry`](crate::retry::with_cas_retry).
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Like [`compare_and_set`](StorageBackend::compare_and_set), but the new
    /// value expires after `ttl`.
    ///
    /// This is the primitive behind every windowed counter in the identity
    /// core: the counter is replaced atomically and disappears on its own
    /// once the window ages out.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set_with_ttl(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()>;

    /// Deletes a key. Deleting an absent key is a no-op.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Retrieves all live key-value pairs within a range, in key order.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Deletes all keys within a range.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send;

    /// Begins a new transaction.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>>;

    /// Verifies the backend can serve requests.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
