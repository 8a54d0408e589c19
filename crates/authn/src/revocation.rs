//! Revoked bearer-token registry.
//!
//! One marker key per revoked token id, expiring when the token itself would
//! have expired, so the registry never outgrows the set of live tokens.
//! [`RevocationRegistry::is_revoked`] is a single point read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use warden_storage::{Clock, StorageBackend, clock::duration_until};

use crate::{error::AuthError, keys};

/// Store-backed set of revoked token ids.
#[derive(Debug, Clone)]
pub struct RevocationRegistry<B> {
    backend: B,
    clock: Arc<dyn Clock>,
}

impl<B: StorageBackend> RevocationRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: B, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Marks `token_id` revoked until `expires_at`.
    ///
    /// Idempotent: revoking twice rewrites the same marker. A token already
    /// past `expires_at` is unusable anyway, so nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, token_id: &str, expires_at: DateTime<Utc>) -> Result<(), AuthError> {
        let remaining = duration_until(self.clock.now(), expires_at);
        if remaining.is_zero() {
            tracing::debug!("token already expired, nothing to revoke");
            return Ok(());
        }
        self.backend.set_with_ttl(keys::revoked(token_id), Vec::new(), remaining).await?;
        tracing::debug!(ttl_secs = remaining.as_secs(), "token revoked");
        Ok(())
    }

    /// Returns whether `token_id` has been revoked.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    pub async fn is_revoked(&self, token_id: &str) -> Result<bool, AuthError> {
        Ok(self.backend.get(&keys::revoked(token_id)).await?.is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use std::time::Duration;

    use warden_storage::{
        ManualClock, MemoryBackend,
        testutil::{FaultMode, FaultyBackend},
    };

    use super::*;

    fn registry() -> (RevocationRegistry<MemoryBackend>, ManualClock) {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let backend = MemoryBackend::with_clock(Arc::clone(&shared));
        (RevocationRegistry::new(backend, shared), clock)
    }

    #[tokio::test]
    async fn test_revoke_then_lookup() {
        let (registry, clock) = registry();
        let expires = clock.now() + chrono::Duration::minutes(10);

        assert!(!registry.is_revoked("t1").await.unwrap());
        registry.revoke("t1", expires).await.unwrap();
        assert!(registry.is_revoked("t1").await.unwrap());
        assert!(!registry.is_revoked("t2").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (registry, clock) = registry();
        let expires = clock.now() + chrono::Duration::minutes(10);

        registry.revoke("t1", expires).await.unwrap();
        registry.revoke("t1", expires).await.unwrap();
        assert!(registry.is_revoked("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_entry_expires_with_token() {
        let (registry, clock) = registry();
        registry.revoke("t1", clock.now() + chrono::Duration::minutes(10)).await.unwrap();

        clock.advance(Duration::from_secs(599));
        assert!(registry.is_revoked("t1").await.unwrap());

        clock.advance(Duration::from_secs(1));
        assert!(!registry.is_revoked("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_already_expired_token_is_noop() {
        let (registry, clock) = registry();
        registry.revoke("t1", clock.now() - chrono::Duration::seconds(1)).await.unwrap();
        assert!(!registry.is_revoked("t1").await.unwrap());
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_as_dependency_error() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        let backend = FaultyBackend::new(MemoryBackend::new());
        let registry = RevocationRegistry::new(backend.clone(), clock);

        backend.set_mode(FaultMode::Unavailable);
        assert!(matches!(
            registry.is_revoked("t1").await,
            Err(AuthError::DependencyUnavailable(_))
        ));
    }
}
