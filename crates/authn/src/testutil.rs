//! Shared test utilities for authentication testing.
//!
//! This module provides helpers for generating signing keys, signing
//! arbitrary claims, crafting raw JWT strings (for attack testing), an
//! in-memory [`UserStore`] and an audit logger that records events. It is
//! feature-gated behind `testutil` to prevent leaking into production
//! builds.
//!
//! # Usage
//!
//! In integration tests, enable the feature in `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! warden-authn = { path = ".", features = ["testutil"] }
//! ```
//!
//! Then import helpers:
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use warden_authn::testutil::{StaticUserStore, craft_raw_jwt, test_keypair};
//! ```

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger},
    error::AuthError,
    lockout::AccountKey,
    signer::SigningKeyPair,
    user_store::{Principal, UserStore},
};

/// Generates a fresh Ed25519 signing key pair under `kid`.
///
/// # Panics
///
/// Panics if `kid` is not a valid key id.
pub fn test_keypair(kid: &str) -> SigningKeyPair {
    SigningKeyPair::generate(kid).expect("test key id must be valid")
}

/// Signs arbitrary JSON claims with `keys`, setting the `kid` header to
/// `kid`.
///
/// Unlike [`TokenSigner::issue`](crate::signer::TokenSigner::issue) this
/// applies no policy, so it can produce tokens with a wrong issuer, an
/// oversized lifetime or missing claims.
///
/// # Panics
///
/// Panics if JWT encoding fails.
pub fn sign_raw_claims(keys: &SigningKeyPair, kid: &str, claims: &serde_json::Value) -> String {
    let mut header = Header::new(Algorithm::EdDSA);
    header.kid = Some(kid.to_owned());
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_ed_der(keys.pkcs8_der()))
        .expect("Failed to encode test JWT")
}

/// Creates a raw JWT string from arbitrary header and payload JSON.
///
/// The resulting JWT has the structure `{header_b64}.{payload_b64}.`
/// with an empty signature. This is useful for testing rejection of
/// malformed or attack JWTs (e.g., `alg: "none"`, algorithm confusion).
///
/// # Panics
///
/// Panics if JSON serialization fails.
pub fn craft_raw_jwt(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Replaces the payload of a signed token while keeping its header and
/// signature.
///
/// # Panics
///
/// Panics if `token` does not have three segments or JSON serialization
/// fails.
pub fn replace_payload(token: &str, payload_json: &serde_json::Value) -> String {
    let parts: Vec<&str> = token.split('.').collect();
    assert_eq!(parts.len(), 3, "token must have three segments");
    let payload_b64 =
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{}.{payload_b64}.{}", parts[0], parts[2])
}

/// In-memory [`UserStore`] with fixed credentials.
///
/// Counts every verification so tests can assert that a rejected login
/// never reached credential checking.
#[derive(Debug, Default)]
pub struct StaticUserStore {
    users: HashMap<String, (String, Principal)>,
    calls: AtomicUsize,
}

impl StaticUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user. `account` is normalized like a login identifier.
    ///
    /// # Panics
    ///
    /// Panics if `account` is empty.
    #[must_use]
    pub fn with_user(mut self, account: &str, secret: &str, subject_id: &str, role: &str) -> Self {
        let key = AccountKey::normalize(account).expect("test account must not be empty");
        self.users
            .insert(key.as_str().to_owned(), (secret.to_owned(), Principal::new(subject_id, role)));
        self
    }

    /// Number of credential checks performed so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserStore for StaticUserStore {
    async fn verify_credentials(
        &self,
        account: &AccountKey,
        secret: &str,
    ) -> Result<Option<Principal>, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .get(account.as_str())
            .filter(|(expected, _)| expected == secret)
            .map(|(_, principal)| principal.clone()))
    }
}

/// Audit logger that keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingAuditLogger {
    events: Mutex<Vec<AuditEvent>>,
}

impl RecordingAuditLogger {
    /// Snapshot of the events recorded so far.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Whether at least one event with `action` was recorded.
    pub fn contains(&self, action: AuditAction) -> bool {
        self.count(action) > 0
    }

    /// Number of recorded events with `action`.
    pub fn count(&self, action: AuditAction) -> usize {
        self.events.lock().iter().filter(|e| e.action == action).count()
    }
}

#[async_trait]
impl AuditLogger for RecordingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Asserts that a [`Result<T, AuthError>`] is an `Err` matching the given [`AuthError`] variant.
///
/// Works with any `AuthError` variant. On failure, prints the expected variant
/// and the actual result for debugging.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use warden_authn::assert_auth_error;
/// use warden_authn::error::AuthError;
///
/// let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
/// assert_auth_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_auth_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "expected AuthError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::AuthError::$variant { .. })),
            "{}: expected AuthError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::audit::AuditResult;

    #[test]
    fn test_craft_raw_jwt_format() {
        let header = json!({"alg": "none", "typ": "JWT"});
        let payload = json!({"sub": "test"});
        let jwt = craft_raw_jwt(&header, &payload);
        let parts: Vec<&str> = jwt.split('.').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[2].is_empty(), "signature should be empty for raw JWTs");
    }

    #[test]
    fn test_replace_payload_keeps_signature() {
        let keys = test_keypair("k1");
        let token = sign_raw_claims(&keys, "k1", &json!({"sub": "a"}));
        let tampered = replace_payload(&token, &json!({"sub": "b"}));

        let original: Vec<&str> = token.split('.').collect();
        let changed: Vec<&str> = tampered.split('.').collect();
        assert_eq!(original[0], changed[0]);
        assert_eq!(original[2], changed[2]);
        assert_ne!(original[1], changed[1]);
    }

    #[tokio::test]
    async fn test_static_user_store() {
        let store = StaticUserStore::new().with_user("Alice", "pw", "user-1", "member");
        let alice = AccountKey::normalize("alice").expect("valid");

        let principal = store.verify_credentials(&alice, "pw").await.expect("ok");
        assert_eq!(principal, Some(Principal::new("user-1", "member")));
        assert_eq!(store.verify_credentials(&alice, "nope").await.expect("ok"), None);
        assert_eq!(store.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recording_audit_logger() {
        let logger = RecordingAuditLogger::default();
        let event = AuditEvent::builder()
            .actor("a")
            .action(AuditAction::Logout)
            .resource("session:s")
            .result(AuditResult::Success)
            .build();
        logger.log(&event).await;

        assert!(logger.contains(AuditAction::Logout));
        assert!(!logger.contains(AuditAction::LoginFailed));
        assert_eq!(logger.events().len(), 1);
    }

    #[test]
    fn test_assert_auth_error_with_message() {
        let result: Result<(), AuthError> = Err(AuthError::TokenExpired);
        assert_auth_error!(result, TokenExpired, "token should be expired");
    }
}
