//! Bearer-token claims and verification.
//!
//! Verification is pure computation: it never touches the store and never
//! suspends. Revocation is layered on top by [`AuthService`](crate::AuthService).
//!
//! # Pipeline
//!
//! 1. Decode the unverified header; reject forbidden or unknown algorithms
//! 2. Check the `kid` format and that it names the configured key
//! 3. Verify the Ed25519 signature and parse the claims
//! 4. Enforce issuer, lifetime, `iat` skew and expiry against the injected clock

use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use warden_storage::Clock;

use crate::{
    config::AuthConfig,
    error::AuthError,
    validation::{validate_algorithm, validate_kid},
};

/// Claims carried by every bearer token.
///
/// ```json
/// {
///   "iss": "warden",
///   "sub": "user-42",
///   "sid": "<refresh session id>",
///   "tid": "<token id, the revocation key>",
///   "role": "member",
///   "iat": 1700000000,
///   "exp": 1700000900
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Issuer.
    pub iss: String,
    /// Subject (principal id).
    pub sub: String,
    /// Refresh session this token was minted for.
    pub sid: String,
    /// Unique token id.
    pub tid: String,
    /// Principal role.
    pub role: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
}

impl AccessClaims {
    /// `iat` as a timestamp.
    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// `exp` as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Decode JWT header without verification.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the header cannot be decoded,
/// including when it names an algorithm the JWT library does not know
/// (such as `none`).
pub fn decode_jwt_header(token: &str) -> Result<Header, AuthError> {
    decode_header(token)
        .map_err(|e| AuthError::malformed(format!("Failed to decode JWT header: {}", e)))
}

/// Stateless bearer-token verifier.
///
/// Holds only public material, so it can be handed to any number of request
/// handlers without exposing the signing key. Cheap to clone.
#[derive(Clone)]
pub struct TokenVerifier {
    kid: String,
    public_key: String,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    lifetime_secs: i64,
    leeway: Duration,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("kid", &self.kid)
            .field("public_key", &self.public_key)
            .field("issuer", &self.issuer)
            .field("lifetime_secs", &self.lifetime_secs)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Builds a verifier for the Ed25519 public key `public_key`
    /// (32 bytes, base64url without padding) published under `kid`.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] if `kid` has an invalid format
    /// - [`AuthError::Internal`] if the public key is not a valid Ed25519 point
    pub fn new(
        kid: impl Into<String>,
        public_key: impl Into<String>,
        config: &AuthConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        let kid = kid.into();
        let public_key = public_key.into();
        validate_kid(&kid)?;

        let raw = URL_SAFE_NO_PAD
            .decode(&public_key)
            .map_err(|e| AuthError::internal(format!("public key is not base64url: {e}")))?;
        let raw: [u8; 32] = raw
            .try_into()
            .map_err(|_| AuthError::internal("Ed25519 public key must be 32 bytes"))?;
        VerifyingKey::from_bytes(&raw)
            .map_err(|e| AuthError::internal(format!("invalid Ed25519 public key: {e}")))?;

        let decoding_key = DecodingKey::from_ed_components(&public_key)
            .map_err(|e| AuthError::internal(format!("failed to load public key: {e}")))?;

        // Time-based claims are checked against the injected clock below.
        let mut validation = Validation::new(Algorithm::EdDSA);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            kid,
            public_key,
            decoding_key,
            validation,
            issuer: config.issuer.clone(),
            lifetime_secs: config.access_token_ttl.as_secs() as i64,
            leeway: config.clock_skew_leeway,
            clock,
        })
    }

    /// Key id this verifier accepts.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Base64url public key this verifier checks signatures against.
    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Verifies a bearer token and returns its claims.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MalformedToken`] for undecodable tokens, bad `kid`
    ///   format, missing claims, wrong issuer, a lifetime other than the
    ///   configured access-token TTL or an `iat`
    ///   in the future
    /// - [`AuthError::UnsupportedAlgorithm`] if the header algorithm is not EdDSA
    /// - [`AuthError::InvalidSignature`] if the signature does not verify or
    ///   the token names a different key
    /// - [`AuthError::TokenExpired`] once `exp` has passed
    #[tracing::instrument(skip_all, fields(kid = %self.kid))]
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let header = decode_jwt_header(token)?;
        validate_algorithm(&format!("{:?}", header.alg))?;

        let kid = header
            .kid
            .ok_or_else(|| AuthError::malformed("JWT header missing 'kid' field"))?;
        validate_kid(&kid)?;
        if kid != self.kid {
            tracing::debug!(presented_kid = %kid, "token signed with unknown key");
            return Err(AuthError::InvalidSignature);
        }

        let claims = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)?.claims;
        self.check_claims(&claims)?;
        Ok(claims)
    }

    fn check_claims(&self, claims: &AccessClaims) -> Result<(), AuthError> {
        if claims.iss != self.issuer {
            return Err(AuthError::malformed(format!("unexpected issuer '{}'", claims.iss)));
        }
        if claims.sub.is_empty() || claims.sid.is_empty() || claims.tid.is_empty() {
            return Err(AuthError::malformed("sub, sid and tid claims must be non-empty"));
        }

        // Every token is minted with exactly the configured lifetime.
        let lifetime = claims.exp.saturating_sub(claims.iat);
        if lifetime != self.lifetime_secs {
            return Err(AuthError::malformed(format!(
                "token lifetime of {lifetime}s is outside policy"
            )));
        }

        let now = self.clock.now().timestamp();
        if claims.iat > now.saturating_add(self.leeway.as_secs() as i64) {
            return Err(AuthError::malformed("iat claim is in the future"));
        }
        if claims.exp <= now {
            return Err(AuthError::TokenExpired);
        }
        Ok(())
    }
}
