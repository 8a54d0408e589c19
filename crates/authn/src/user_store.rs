//! Credential verification seam.
//!
//! Password hashing and user records live outside this core. The host
//! supplies a [`UserStore`] that answers one question: do these credentials
//! belong to a principal, and if so which one.

use async_trait::async_trait;

use crate::{error::AuthError, lockout::AccountKey};

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable principal id, used as the `sub` claim.
    pub subject_id: String,
    /// Role carried in issued bearer tokens.
    pub role: String,
}

impl Principal {
    /// Creates a principal.
    #[must_use]
    pub fn new(subject_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self { subject_id: subject_id.into(), role: role.into() }
    }
}

/// Verifies login credentials.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Returns the principal for `account` if `secret` is correct.
    ///
    /// Unknown accounts and wrong secrets both return `Ok(None)`; callers
    /// must not be able to tell them apart.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the backing store
    /// cannot be reached.
    async fn verify_credentials(
        &self,
        account: &AccountKey,
        secret: &str,
    ) -> Result<Option<Principal>, AuthError>;
}

#[async_trait]
impl<U: UserStore + ?Sized> UserStore for std::sync::Arc<U> {
    async fn verify_credentials(
        &self,
        account: &AccountKey,
        secret: &str,
    ) -> Result<Option<Principal>, AuthError> {
        (**self).verify_credentials(account, secret).await
    }
}
