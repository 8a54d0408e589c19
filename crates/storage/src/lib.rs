//! Shared key-value store abstraction for the warden identity core.
//!
//! Every component of the core (token revocation, refresh-token ledger,
//! lockout tracking, rate limiting) keeps its state in one logical store
//! and coordinates with concurrent requests only through it. This crate
//! defines that store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     warden-authn                            │
//! │  RevocationRegistry │ RefreshTokenLedger │ LockoutTracker   │
//! │                     │    RateLimiter                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │            TimeoutBackend (per-call deadline)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │                  StorageBackend trait                       │
//! │  (get, set_with_ttl, compare_and_set, get_range, txn)       │
//! ├─────────────────────────────────────────────────────────────┤
//! │     MemoryBackend (reference)    │   external stores         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//! use warden_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     // Entries can expire on their own
//!     backend.set_with_ttl(b"revoked/t1".to_vec(), b"".to_vec(), Duration::from_secs(900)).await?;
//!
//!     // Atomic insert-if-absent
//!     backend.compare_and_set(b"lock/a", None, b"holder".to_vec()).await?;
//!
//!     // Multi-key atomic commit
//!     let mut txn = backend.transaction().await?;
//!     txn.set(b"a".to_vec(), b"1".to_vec());
//!     txn.set(b"b".to_vec(), b"2".to_vec());
//!     txn.commit().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with key generators, a fault-injecting backend
//!   wrapper and assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod clock;
pub mod error;
pub mod memory;
pub mod retry;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod timeout;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use retry::{CasRetryConfig, with_cas_retry};
pub use timeout::{DEFAULT_STORE_TIMEOUT, TimeoutBackend};
pub use transaction::Transaction;
pub use types::KeyValue;
