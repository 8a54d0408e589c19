//! Shared test utilities for storage backend testing.
//!
//! Feature-gated behind `testutil` so it never leaks into production builds.
//!
//! ```toml
//! [dev-dependencies]
//! warden-storage = { path = "../storage", features = ["testutil"] }
//! ```

use std::{
    ops::RangeBounds,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
    transaction::Transaction,
    types::KeyValue,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix:000042"`; zero-padding keeps lexicographic
/// order equal to numeric order.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}:{idx:06}").into_bytes()
}

/// Create a test value of the given size filled with `0xAB` bytes.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Create a [`MemoryBackend`] pre-populated with `count` keys.
///
/// # Panics
///
/// Panics if any `set` operation fails.
pub async fn populated_backend(prefix: &str, count: usize, value_size: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let value = make_value(value_size);
    for i in 0..count {
        backend.set(make_key(prefix, i), value.clone()).await.expect("populate set failed");
    }
    backend
}

/// How a [`FaultyBackend`] responds to calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FaultMode {
    /// Calls pass through to the wrapped backend.
    Healthy = 0,
    /// Calls fail immediately with a connection error.
    Unavailable = 1,
    /// Calls never complete; pair with [`TimeoutBackend`](crate::TimeoutBackend)
    /// to observe deadline handling.
    Stalled = 2,
    /// Reads pass through but every compare-and-set reports a conflict, as
    /// if another writer always got there first.
    Contended = 3,
}

impl FaultMode {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Unavailable,
            2 => Self::Stalled,
            3 => Self::Contended,
            _ => Self::Healthy,
        }
    }
}

/// Backend wrapper that can be switched into an outage at runtime.
///
/// Clones share the same mode, so a test can keep a handle while the code
/// under test owns another.
#[derive(Debug, Clone)]
pub struct FaultyBackend<B> {
    inner: B,
    mode: Arc<AtomicU8>,
    calls: Arc<AtomicUsize>,
}

impl<B: StorageBackend> FaultyBackend<B> {
    /// Wraps `inner` in healthy mode.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            mode: Arc::new(AtomicU8::new(FaultMode::Healthy as u8)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Switches every clone to `mode`.
    pub fn set_mode(&self, mode: FaultMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> FaultMode {
        FaultMode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Number of calls that reached this wrapper.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn cas_gate(&self) -> StorageResult<()> {
        self.gate().await?;
        if self.mode() == FaultMode::Contended {
            return Err(StorageError::conflict());
        }
        Ok(())
    }

    async fn gate(&self) -> StorageResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode() {
            FaultMode::Healthy | FaultMode::Contended => Ok(()),
            FaultMode::Unavailable => Err(StorageError::connection("simulated store outage")),
            FaultMode::Stalled => {
                std::future::pending::<()>().await;
                Err(StorageError::timeout())
            },
        }
    }
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.gate().await?;
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        self.gate().await?;
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.cas_gate().await?;
        self.inner.compare_and_set(key, expected, new_value).await
    }

    async fn compare_and_set_with_ttl(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.cas_gate().await?;
        self.inner.compare_and_set_with_ttl(key, expected, new_value, ttl).await
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        self.gate().await?;
        self.inner.delete(key).await
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        self.gate().await?;
        self.inner.get_range(range).await
    }

    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        self.gate().await?;
        self.inner.clear_range(range).await
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        self.gate().await?;
        self.inner.transaction().await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.gate().await?;
        self.inner.health_check().await
    }
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
///
/// ```no_run
/// use warden_storage::{assert_conflict, error::{StorageError, StorageResult}};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_conflict!(result);
/// ```
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "expected StorageError::Conflict, got: {:?}",
            $result,
        );
    };
    ($result:expr, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Conflict)),
            "{}: expected StorageError::Conflict, got: {:?}",
            $msg,
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is `Ok` and return the inner value.
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Assert that a [`StorageResult`] contains a [`StorageError::Timeout`].
#[macro_export]
macro_rules! assert_timeout {
    ($result:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::Timeout)),
            "expected StorageError::Timeout, got: {:?}",
            $result,
        );
    };
}
