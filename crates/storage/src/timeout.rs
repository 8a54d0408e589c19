//! Per-call deadlines for any storage backend.
//!
//! [`TimeoutBackend`] wraps a backend so that no store call can block the
//! request path indefinitely. Every operation, including transaction reads
//! and commits, races against `tokio::time::timeout`; an elapsed deadline
//! surfaces as [`StorageError::Timeout`], which callers treat as the store
//! being unavailable.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use warden_storage::{MemoryBackend, StorageBackend, TimeoutBackend};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let backend = TimeoutBackend::new(MemoryBackend::new(), Duration::from_millis(500));
//! backend.set(b"k".to_vec(), b"v".to_vec()).await.unwrap();
//! assert!(backend.get(b"k").await.unwrap().is_some());
//! # });
//! ```

use std::{future::Future, ops::RangeBounds, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Backend wrapper that bounds every call with a deadline.
#[derive(Debug)]
pub struct TimeoutBackend<B> {
    inner: Arc<B>,
    timeout: Duration,
}

impl<B> Clone for TimeoutBackend<B> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner), timeout: self.timeout }
    }
}

impl<B: StorageBackend> TimeoutBackend<B> {
    /// Wraps `inner`, bounding each call by `timeout`.
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner: Arc::new(inner), timeout }
    }

    /// Returns the configured per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the wrapped backend.
    #[must_use]
    pub fn inner(&self) -> &B {
        &self.inner
    }
}

async fn bounded<T>(
    timeout: Duration,
    operation: &'static str,
    future: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_elapsed) => {
            tracing::warn!(
                operation,
                timeout_ms = timeout.as_millis() as u64,
                "storage call exceeded deadline"
            );
            Err(StorageError::timeout())
        },
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for TimeoutBackend<B> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        bounded(self.timeout, "get", self.inner.get(key)).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        bounded(self.timeout, "set", self.inner.set(key, value)).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        bounded(self.timeout, "set_with_ttl", self.inner.set_with_ttl(key, value, ttl)).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        bounded(self.timeout, "compare_and_set", self.inner.compare_and_set(key, expected, new_value))
            .await
    }

    async fn compare_and_set_with_ttl(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        bounded(
            self.timeout,
            "compare_and_set_with_ttl",
            self.inner.compare_and_set_with_ttl(key, expected, new_value, ttl),
        )
        .await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        bounded(self.timeout, "delete", self.inner.delete(key)).await
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        bounded(self.timeout, "get_range", self.inner.get_range(range)).await
    }

    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        bounded(self.timeout, "clear_range", self.inner.clear_range(range)).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        let inner = bounded(self.timeout, "transaction", self.inner.transaction()).await?;
        Ok(Box::new(TimeoutTransaction { inner, timeout: self.timeout }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        bounded(self.timeout, "health_check", self.inner.health_check()).await
    }
}

/// Transaction whose reads and commit carry the backend's deadline.
struct TimeoutTransaction {
    inner: Box<dyn Transaction>,
    timeout: Duration,
}

#[async_trait]
impl Transaction for TimeoutTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        bounded(self.timeout, "transaction_get", self.inner.get(key)).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.set(key, value);
    }

    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        self.inner.set_with_ttl(key, value, ttl);
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.inner.delete(key);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.inner.compare_and_set(key, expected, new_value)
    }

    fn compare_and_set_with_ttl(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.inner.compare_and_set_with_ttl(key, expected, new_value, ttl)
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let Self { inner, timeout } = *self;
        bounded(timeout, "commit", inner.commit()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        MemoryBackend, assert_timeout,
        testutil::{FaultMode, FaultyBackend},
    };

    fn stalled() -> (TimeoutBackend<FaultyBackend<MemoryBackend>>, FaultyBackend<MemoryBackend>) {
        let faulty = FaultyBackend::new(MemoryBackend::new());
        let backend = TimeoutBackend::new(faulty.clone(), Duration::from_millis(20));
        (backend, faulty)
    }

    #[tokio::test]
    async fn test_healthy_calls_pass_through() {
        let (backend, _) = stalled();
        backend.set(b"k".to_vec(), b"v".to_vec()).await.unwrap();
        backend.compare_and_set(b"k", Some(b"v"), b"w".to_vec()).await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("w")));
        assert_eq!(backend.timeout(), Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_stalled_calls_time_out() {
        let (backend, faulty) = stalled();
        faulty.set_mode(FaultMode::Stalled);

        assert_timeout!(backend.get(b"k").await);
        assert_timeout!(backend.compare_and_set(b"k", None, b"v".to_vec()).await);
        assert_timeout!(backend.health_check().await);
    }

    #[tokio::test]
    async fn test_transaction_open_is_bounded() {
        let (backend, faulty) = stalled();
        faulty.set_mode(FaultMode::Stalled);
        assert_timeout!(backend.transaction().await.map(|_| ()));

        faulty.set_mode(FaultMode::Healthy);
        let mut txn = backend.transaction().await.unwrap();
        txn.set(b"k".to_vec(), b"v".to_vec());
        txn.commit().await.unwrap();
        assert_eq!(backend.get(b"k").await.unwrap(), Some(Bytes::from("v")));
    }

    #[tokio::test]
    async fn test_inner_errors_are_not_masked() {
        let (backend, faulty) = stalled();
        faulty.set_mode(FaultMode::Unavailable);

        let err = backend.get(b"k").await.unwrap_err();
        assert!(matches!(err, StorageError::Connection { .. }), "got {err:?}");
    }
}
