//! Bearer-token issuance.
//!
//! [`SigningKeyPair`] owns the Ed25519 private key; [`TokenSigner`] mints
//! tokens with it and delegates verification to a [`TokenVerifier`] built
//! from the matching public key.
//!
//! Ed25519 offers roughly 128-bit security, somewhat below RSA-4096 (about
//! 140-bit), in exchange for small keys and fast signing.

use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand_core::OsRng;
use warden_storage::Clock;
use zeroize::Zeroizing;

use crate::{
    config::AuthConfig,
    error::AuthError,
    ids::new_token_id,
    jwt::{AccessClaims, TokenVerifier},
    validation::validate_kid,
};

/// PKCS#8 v1 prefix for a raw 32-byte Ed25519 private key.
const ED25519_PKCS8_PREFIX: [u8; 16] = [
    0x30, 0x2e, // SEQUENCE, 46 bytes
    0x02, 0x01, 0x00, // INTEGER version 0
    0x30, 0x05, // SEQUENCE, 5 bytes (algorithm identifier)
    0x06, 0x03, 0x2b, 0x65, 0x70, // OID 1.3.101.112 (Ed25519)
    0x04, 0x22, // OCTET STRING, 34 bytes
    0x04, 0x20, // OCTET STRING, 32 bytes (the actual key)
];

/// An Ed25519 signing key with its key id and public half.
///
/// Private material is held in [`Zeroizing`] and scrubbed on drop. `Debug`
/// prints only the key id and public key.
pub struct SigningKeyPair {
    kid: String,
    pkcs8_der: Zeroizing<Vec<u8>>,
    public_key: String,
}

impl fmt::Debug for SigningKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKeyPair")
            .field("kid", &self.kid)
            .field("public_key", &self.public_key)
            .finish_non_exhaustive()
    }
}

impl SigningKeyPair {
    /// Generates a fresh key pair from the OS RNG.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if `kid` has an invalid format.
    pub fn generate(kid: impl Into<String>) -> Result<Self, AuthError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(kid.into(), &signing_key)
    }

    /// Rebuilds a key pair from a 32-byte Ed25519 secret.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if `kid` has an invalid format.
    pub fn from_secret_bytes(kid: impl Into<String>, secret: &[u8; 32]) -> Result<Self, AuthError> {
        let signing_key = SigningKey::from_bytes(secret);
        Self::from_signing_key(kid.into(), &signing_key)
    }

    fn from_signing_key(kid: String, signing_key: &SigningKey) -> Result<Self, AuthError> {
        validate_kid(&kid)?;

        let public_key = URL_SAFE_NO_PAD.encode(signing_key.verifying_key().to_bytes());
        let private_bytes: Zeroizing<[u8; 32]> = Zeroizing::new(signing_key.to_bytes());
        let mut pkcs8_der = Zeroizing::new(Vec::with_capacity(48));
        pkcs8_der.extend_from_slice(&ED25519_PKCS8_PREFIX);
        pkcs8_der.extend_from_slice(&*private_bytes);

        Ok(Self { kid, pkcs8_der, public_key })
    }

    /// Key id placed in the `kid` header.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Public key, 32 bytes base64url without padding.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Private key in PKCS#8 DER form.
    #[must_use]
    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    /// Builds a verifier for this key's public half.
    ///
    /// # Errors
    ///
    /// Propagates [`TokenVerifier::new`] errors.
    pub fn verifier(
        &self,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<TokenVerifier, AuthError> {
        TokenVerifier::new(self.kid.clone(), self.public_key.clone(), config, clock)
    }
}

/// A freshly minted bearer token.
#[derive(Clone)]
pub struct IssuedToken {
    /// Compact JWS serialization.
    pub token: String,
    /// Claims embedded in the token.
    pub claims: AccessClaims,
}

impl IssuedToken {
    /// Token id, the key used to revoke this token.
    #[must_use]
    pub fn token_id(&self) -> &str {
        &self.claims.tid
    }

    /// Expiry instant.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.claims.expires_at()
    }
}

impl fmt::Debug for IssuedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedToken")
            .field("token", &"[REDACTED]")
            .field("claims", &self.claims)
            .finish()
    }
}

/// Issues and verifies bearer tokens.
#[derive(Clone)]
pub struct TokenSigner {
    kid: String,
    encoding_key: EncodingKey,
    issuer: String,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    verifier: TokenVerifier,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("kid", &self.kid)
            .field("issuer", &self.issuer)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    /// Creates a signer for `keys` under `config`.
    ///
    /// # Errors
    ///
    /// Propagates [`TokenVerifier::new`] errors.
    pub fn new(
        keys: &SigningKeyPair,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let verifier = keys.verifier(config, Arc::clone(&clock))?;
        Ok(Self {
            kid: keys.kid.clone(),
            encoding_key: EncodingKey::from_ed_der(keys.pkcs8_der()),
            issuer: config.issuer.clone(),
            ttl: config.access_token_ttl,
            clock,
            verifier,
        })
    }

    /// Mints a bearer token for `subject_id` bound to `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Internal`] if signing fails.
    #[tracing::instrument(skip(self), fields(kid = %self.kid))]
    pub fn issue(
        &self,
        subject_id: &str,
        session_id: &str,
        role: &str,
    ) -> Result<IssuedToken, AuthError> {
        let iat = self.clock.now().timestamp();
        let claims = AccessClaims {
            iss: self.issuer.clone(),
            sub: subject_id.to_owned(),
            sid: session_id.to_owned(),
            tid: new_token_id(),
            role: role.to_owned(),
            iat,
            exp: iat.saturating_add(self.ttl.as_secs() as i64),
        };

        let mut header = Header::new(Algorithm::EdDSA);
        header.kid = Some(self.kid.clone());
        let token = encode(&header, &claims, &self.encoding_key)
            .map_err(|e| AuthError::internal(format!("failed to sign token: {e}")))?;

        tracing::debug!(token_id = %claims.tid, "issued bearer token");
        Ok(IssuedToken { token, claims })
    }

    /// Verifies a bearer token. See [`TokenVerifier::verify`].
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.verifier.verify(token)
    }

    /// The public-key verifier, for distribution to other components.
    #[must_use]
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Configured bearer-token lifetime.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}
