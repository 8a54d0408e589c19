//! # Warden Authentication Core
//!
//! Token lifecycle and abuse prevention for an HTTP API.
//!
//! This crate provides:
//! - **Bearer tokens**: short-lived Ed25519-signed JWTs with fixed lifetime
//! - **Refresh rotation**: single-use refresh secrets grouped in families, with replay detection
//!   that revokes the whole family
//! - **Revocation**: a self-expiring registry of revoked token ids
//! - **Lockout**: failed-login counting with a cooldown after a threshold
//! - **Rate limiting**: sliding-window quotas for login, global and authenticated traffic
//!
//! All state lives in a shared [`warden_storage::StorageBackend`]; the
//! crate holds no process-local mutable state, so any number of instances
//! can serve the same store.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use warden_authn::{AuthService, SigningKeyPair, user_store::UserStore};
//! use warden_storage::MemoryBackend;
//!
//! # async fn example(users: Arc<dyn UserStore>) -> Result<(), Box<dyn std::error::Error>> {
//! let service = AuthService::builder()
//!     .backend(MemoryBackend::new())
//!     .signing_key(SigningKeyPair::generate("primary")?)
//!     .user_store(users)
//!     .build()?;
//!
//! let pair = service.login("alice@example.com", "correct horse", "203.0.113.7").await?;
//! let claims = service.authenticate(&pair.access.token).await?;
//! let rotated = service.refresh(&pair.refresh.secret).await?;
//! service.logout_claims(&claims).await?;
//! # let _ = rotated;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod config;
pub mod error;
pub mod ids;
pub mod jwt;
mod keys;
pub mod lockout;
pub mod rate_limit;
pub mod refresh;
pub mod revocation;
pub mod service;
pub mod signer;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod user_store;
pub mod validation;

pub use config::AuthConfig;
pub use error::{AuthError, ConfigError, PublicError, Result};
pub use jwt::{AccessClaims, TokenVerifier};
pub use lockout::{AccountKey, LockoutTracker};
pub use rate_limit::{RateLimitDecision, RateLimiter, RateScope};
pub use refresh::{RefreshSecret, RefreshSession, RefreshTokenLedger};
pub use revocation::RevocationRegistry;
pub use service::{AuthService, TokenPair};
pub use signer::{IssuedToken, SigningKeyPair, TokenSigner};
pub use user_store::{Principal, UserStore};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
