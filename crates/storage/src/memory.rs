//! In-memory storage backend implementation.
//!
//! [`MemoryBackend`] is the reference [`StorageBackend`]: a
//! [`BTreeMap`] behind a [`parking_lot::RwLock`], with a second map holding
//! absolute expiry instants for keys written with a TTL.
//!
//! Expiry is evaluated against an injected [`Clock`]. Reads treat an expired
//! key as absent immediately; a background task physically purges expired
//! keys once per second.
//!
//! # Example
//!
//! ```
//! use warden_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - A single process only: instances in other processes do not share state

use std::{
    collections::BTreeMap,
    ops::{Bound, RangeBounds},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    clock::{Clock, SystemClock, add_duration},
    error::{StorageError, StorageResult},
    transaction::Transaction,
    types::KeyValue,
};

const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // The receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// Clones share the same underlying data through [`Arc`].
///
/// # Shutdown
///
/// The background TTL cleanup task stops when the last clone is dropped,
/// or earlier via [`shutdown`](Self::shutdown).
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: Arc<RwLock<BTreeMap<Vec<u8>, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("keys", &self.data.read().len())
            .field("keys_with_ttl", &self.ttl_data.read().len())
            .field("clock", &self.clock)
            .finish()
    }
}

impl MemoryBackend {
    /// Creates a backend that reads time from the system clock.
    ///
    /// Must be called from within a tokio runtime: this spawns the TTL
    /// cleanup task.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a backend that evaluates TTL expiry against `clock`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::{sync::Arc, time::Duration};
    /// use warden_storage::{MemoryBackend, StorageBackend, clock::ManualClock};
    ///
    /// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
    /// let clock = ManualClock::default();
    /// let backend = MemoryBackend::with_clock(Arc::new(clock.clone()));
    ///
    /// backend.set_with_ttl(b"k".to_vec(), b"v".to_vec(), Duration::from_secs(60)).await.unwrap();
    /// clock.advance(Duration::from_secs(61));
    /// assert!(backend.get(b"k").await.unwrap().is_none());
    /// # });
    /// ```
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            ttl_data: Arc::new(RwLock::new(BTreeMap::new())),
            clock,
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        let data = Arc::downgrade(&backend.data);
        let ttl_data = Arc::downgrade(&backend.ttl_data);
        let clock = Arc::clone(&backend.clock);
        tokio::spawn(async move {
            cleanup_expired_keys(data, ttl_data, clock, shutdown_rx).await;
        });

        backend
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    ///
    /// Expired keys remain invisible to reads after shutdown; they are just
    /// no longer purged from memory.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Returns the number of physically stored keys, including expired keys
    /// not yet purged.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.data.read().len()
    }

    fn is_expired(&self, key: &[u8], now: DateTime<Utc>) -> bool {
        self.ttl_data.read().get(key).is_some_and(|expiry| *expiry <= now)
    }

    fn current_value(
        &self,
        data: &BTreeMap<Vec<u8>, Bytes>,
        key: &[u8],
        now: DateTime<Utc>,
    ) -> Option<Bytes> {
        if self.is_expired(key, now) { None } else { data.get(key).cloned() }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Purges expired keys once per [`CLEANUP_INTERVAL`].
///
/// Holds only weak references so that the task never keeps the maps alive
/// on its own.
async fn cleanup_expired_keys(
    data: std::sync::Weak<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: std::sync::Weak<RwLock<BTreeMap<Vec<u8>, DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let (Some(data), Some(ttl_data)) = (data.upgrade(), ttl_data.upgrade()) else {
            return;
        };

        let now = clock.now();
        let expired_keys: Vec<Vec<u8>> = ttl_data
            .read()
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(key, _)| key.clone())
            .collect();

        if expired_keys.is_empty() {
            continue;
        }

        let mut data_guard = data.write();
        let mut ttl_guard = ttl_data.write();
        for key in expired_keys {
            // Re-check under the write lock: the key may have been rewritten
            // with a fresh TTL (or none) since the scan.
            if ttl_guard.get(&key).is_some_and(|expiry| *expiry <= now) {
                data_guard.remove(&key);
                ttl_guard.remove(&key);
            }
        }
        tracing::trace!(keys = data_guard.len(), "memory backend TTL sweep complete");
    }
}

/// Writes `value` under `key` with an optional absolute expiry.
///
/// Callers hold both write locks, acquired in the order data then TTL.
fn write_entry(
    data: &mut BTreeMap<Vec<u8>, Bytes>,
    ttl_data: &mut BTreeMap<Vec<u8>, DateTime<Utc>>,
    key: Vec<u8>,
    value: Vec<u8>,
    expiry: Option<DateTime<Utc>>,
) {
    match expiry {
        Some(at) => {
            ttl_data.insert(key.clone(), at);
        },
        None => {
            ttl_data.remove(&key);
        },
    }
    data.insert(key, Bytes::from(value));
}

fn precondition_holds(expected: Option<&[u8]>, current: Option<&Bytes>) -> bool {
    match (expected, current) {
        (None, None) => true,
        (Some(exp), Some(cur)) => exp == &cur[..],
        _ => false,
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let now = self.clock.now();
        let data = self.data.read();
        Ok(self.current_value(&data, key, now))
    }

    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();
        write_entry(&mut data, &mut ttl_data, key, value, None);
        Ok(())
    }

    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        let expiry = add_duration(self.clock.now(), ttl);
        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();
        write_entry(&mut data, &mut ttl_data, key, value, Some(expiry));
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        let now = self.clock.now();
        let mut data = self.data.write();

        let current = self.current_value(&data, key, now);
        if !precondition_holds(expected, current.as_ref()) {
            return Err(StorageError::Conflict);
        }

        let mut ttl_data = self.ttl_data.write();
        write_entry(&mut data, &mut ttl_data, key.to_vec(), new_value, None);
        Ok(())
    }

    async fn compare_and_set_with_ttl(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        let now = self.clock.now();
        let mut data = self.data.write();

        let current = self.current_value(&data, key, now);
        if !precondition_holds(expected, current.as_ref()) {
            return Err(StorageError::Conflict);
        }

        let mut ttl_data = self.ttl_data.write();
        write_entry(&mut data, &mut ttl_data, key.to_vec(), new_value, Some(add_duration(now, ttl)));
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();
        data.remove(key);
        ttl_data.remove(key);
        Ok(())
    }

    async fn get_range<R>(&self, range: R) -> StorageResult<Vec<KeyValue>>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let now = self.clock.now();
        let data = self.data.read();

        let start = match range.start_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };
        let end = match range.end_bound() {
            Bound::Included(b) => Bound::Included(b.as_slice()),
            Bound::Excluded(b) => Bound::Excluded(b.as_slice()),
            Bound::Unbounded => Bound::Unbounded,
        };

        Ok(data
            .range::<[u8], _>((start, end))
            .filter(|(key, _)| !self.is_expired(key, now))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect())
    }

    async fn clear_range<R>(&self, range: R) -> StorageResult<()>
    where
        R: RangeBounds<Vec<u8>> + Send,
    {
        let keys_to_remove: Vec<Vec<u8>> = {
            let data = self.data.read();
            data.range(range).map(|(k, _)| k.clone()).collect()
        };

        if keys_to_remove.is_empty() {
            return Ok(());
        }

        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();
        for key in &keys_to_remove {
            data.remove(key);
            ttl_data.remove(key);
        }
        Ok(())
    }

    async fn transaction(&self) -> StorageResult<Box<dyn Transaction>> {
        Ok(Box::new(MemoryTransaction::new(self.clone())))
    }

    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the lock proves the backend is not deadlocked.
        let _unused = self.data.read();
        Ok(())
    }
}

/// A buffered write.
#[derive(Debug, Clone)]
enum PendingWrite {
    Put { value: Vec<u8>, ttl: Option<Duration> },
    Delete,
}

/// A compare-and-set operation to be verified at commit time.
#[derive(Debug, Clone)]
struct CasOperation {
    key: Vec<u8>,
    expected: Option<Vec<u8>>,
    new_value: Vec<u8>,
    ttl: Option<Duration>,
}

/// In-memory transaction implementation.
struct MemoryTransaction {
    backend: MemoryBackend,
    pending_writes: BTreeMap<Vec<u8>, PendingWrite>,
    pending_cas: Vec<CasOperation>,
}

impl MemoryTransaction {
    fn new(backend: MemoryBackend) -> Self {
        Self { backend, pending_writes: BTreeMap::new(), pending_cas: Vec::new() }
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        if let Some(pending) = self.pending_writes.get(key) {
            return Ok(match pending {
                PendingWrite::Put { value, .. } => Some(Bytes::copy_from_slice(value)),
                PendingWrite::Delete => None,
            });
        }
        if let Some(cas) = self.pending_cas.iter().rev().find(|cas| cas.key == key) {
            return Ok(Some(Bytes::copy_from_slice(&cas.new_value)));
        }
        self.backend.get(key).await
    }

    fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending_writes.insert(key, PendingWrite::Put { value, ttl: None });
    }

    fn set_with_ttl(&mut self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) {
        self.pending_writes.insert(key, PendingWrite::Put { value, ttl: Some(ttl) });
    }

    fn delete(&mut self, key: Vec<u8>) {
        self.pending_writes.insert(key, PendingWrite::Delete);
    }

    fn compare_and_set(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value, ttl: None });
        Ok(())
    }

    fn compare_and_set_with_ttl(
        &mut self,
        key: Vec<u8>,
        expected: Option<Vec<u8>>,
        new_value: Vec<u8>,
        ttl: Duration,
    ) -> StorageResult<()> {
        self.pending_cas.push(CasOperation { key, expected, new_value, ttl: Some(ttl) });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let now = self.backend.clock.now();
        let mut data = self.backend.data.write();

        // Every precondition is checked before anything is written.
        for cas in &self.pending_cas {
            let current = self.backend.current_value(&data, &cas.key, now);
            if !precondition_holds(cas.expected.as_deref(), current.as_ref()) {
                return Err(StorageError::Conflict);
            }
        }

        let mut ttl_data = self.backend.ttl_data.write();

        for cas in self.pending_cas {
            let expiry = cas.ttl.map(|ttl| add_duration(now, ttl));
            write_entry(&mut data, &mut ttl_data, cas.key, cas.new_value, expiry);
        }

        for (key, write) in self.pending_writes {
            match write {
                PendingWrite::Put { value, ttl } => {
                    let expiry = ttl.map(|ttl| add_duration(now, ttl));
                    write_entry(&mut data, &mut ttl_data, key, value, expiry);
                },
                PendingWrite::Delete => {
                    data.remove(&key);
                    ttl_data.remove(&key);
                },
            }
        }

        Ok(())
    }
}
