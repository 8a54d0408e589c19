//! Compare-and-set retry loop.
//!
//! State that must change atomically (a windowed counter, a lockout record,
//! a session and its family head) is updated with a read-modify-write cycle
//! that ends in a compare-and-set. When another writer wins the race the
//! cycle fails with [`StorageError::Conflict`] and must be re-run from a
//! fresh read. [`with_cas_retry`] owns that loop.
//!
//! Each conflict means some other writer committed, so under contention the
//! loop always makes global progress; the retry budget only bounds how long
//! a single caller can keep losing.

use std::{future::Future, time::Duration};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Retry budget for compare-and-set loops.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasRetryConfig {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    #[builder(default = default_max_retries())]
    pub max_retries: u32,

    /// Base delay between attempts; a random jitter of up to the same amount
    /// is added.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    #[builder(default = default_base_delay())]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    32
}

fn default_base_delay() -> Duration {
    Duration::from_millis(1)
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self { max_retries: default_max_retries(), base_delay: default_base_delay() }
    }
}

/// Re-runs a read-modify-write cycle while it fails with a conflict.
///
/// `operation` must perform the whole cycle: read, compute, write with a
/// compare-and-set precondition. Non-conflict errors are returned
/// immediately.
///
/// # Errors
///
/// - [`StorageError::CasRetriesExhausted`] when every attempt conflicted
/// - Any other error returned by `operation`
///
/// # Example
///
/// ```
/// use warden_storage::{
///     MemoryBackend, StorageBackend, StorageError,
///     retry::{CasRetryConfig, with_cas_retry},
/// };
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
/// let config = CasRetryConfig::default();
///
/// let value = with_cas_retry(&config, "increment", || async {
///     let current = backend.get(b"n").await?;
///     let n: u64 = current
///         .as_deref()
///         .and_then(|b| std::str::from_utf8(b).ok())
///         .and_then(|s| s.parse().ok())
///         .unwrap_or(0);
///     backend.compare_and_set(b"n", current.as_deref(), (n + 1).to_string().into_bytes()).await?;
///     Ok::<_, StorageError>(n + 1)
/// })
/// .await
/// .unwrap();
/// assert_eq!(value, 1);
/// # });
/// ```
#[tracing::instrument(skip(config, operation), fields(max_retries = config.max_retries))]
pub async fn with_cas_retry<F, Fut, T>(
    config: &CasRetryConfig,
    operation_name: &str,
    mut operation: F,
) -> StorageResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<T>>,
{
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(StorageError::Conflict) if attempt < config.max_retries => {
                let delay = jittered(config.base_delay);
                tracing::debug!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_us = delay.as_micros() as u64,
                    "CAS conflict, retrying after jitter",
                );
                tokio::time::sleep(delay).await;
            },
            Err(StorageError::Conflict) => break,
            Err(e) => return Err(e),
        }
    }

    tracing::warn!(
        operation = operation_name,
        attempts = config.max_retries + 1,
        "CAS retries exhausted"
    );
    Err(StorageError::cas_retries_exhausted(config.max_retries + 1))
}

fn jittered(base: Duration) -> Duration {
    let range = base.as_micros() as u64;
    if range == 0 {
        return Duration::ZERO;
    }
    base + Duration::from_micros(rand::rng().random_range(0..=range))
}
