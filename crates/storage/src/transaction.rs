//! Transaction trait for atomic storage operations.
//!
//! A transaction buffers writes and compare-and-set preconditions, then
//! applies them all at once on [`commit`](Transaction::commit). Either every
//! precondition holds and every write lands, or the commit fails with
//! [`Conflict`](crate::StorageError::Conflict) and nothing is written.
//!
//! The refresh-token ledger relies on this to revoke the presented record
//! and insert its successor in one step.
//!
//! # Example
//!
//! ```
//! use warden_storage::{MemoryBackend, StorageBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = MemoryBackend::new();
//! backend.set(b"session/1".to_vec(), b"current".to_vec()).await.unwrap();
//!
//! let mut txn = backend.transaction().await.unwrap();
//! txn.compare_and_set(b"session/1".to_vec(), Some(b"current".to_vec()), b"revoked".to_vec())
//!     .unwrap();
//! txn.set(b"session/2".to_vec(), b"current".to_vec());
//! txn.commit().await.unwrap();
//!
//! let old = backend.get(b"session/1").await.unwrap().unwrap();
//! assert_eq!(&old[..], b"revoked");
//! # });
//! ```

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageResult;

/// Transaction handle for atomic multi-operation commits.
///
/// Reads see this transaction's own pending writes first and fall back to
/// the backend. Reads are not part of the commit precondition; state that
/// must not have changed since it was read belongs in a
/// [`compare_and_set`](Transaction::compare_and_set).
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Gets a value, preferring this transaction's pending writes.
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Buffers a set operation. The key will not expire.
    fn set(&mut self, key: Vec<u8>, value: Vec<u8>);

    /// Buffers a set operation whose value expires `ttl` after commit.
    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration);

    /// Buffers a delete operation.
    fn delete(&mut self, key: Vec<u8>);

    /// Buffers a compare-and-set operation.
    ///
    /// The condition is checked at commit time, not when this method is
    /// called. `expected: None` requires the key to be absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be buffered.
    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Buffers a compare-and-set whose new value expires `ttl` after commit.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation could not be buffered.
    fn compare_and_set_with_ttl(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()>;

    /// Commits all buffered operations atomically.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`](crate::StorageError::Conflict) if any compare-and-set
    ///   precondition does not hold
    /// - Other [`StorageError`](crate::StorageError) variants on backend failures
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}
