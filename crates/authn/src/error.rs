//! Authentication error types.
//!
//! [`AuthError`] is the internal taxonomy: every failure keeps its precise
//! kind so it can be audit-logged accurately. [`AuthError::public`] collapses
//! it into a [`PublicError`], the only form that should ever cross the HTTP
//! boundary. Credential, lockout and replay failures all become the same
//! [`PublicError::InvalidCredentials`], so a caller cannot tell a locked
//! account from a wrong password or an unknown account.

use std::time::Duration;

use thiserror::Error;
use warden_storage::StorageError;

use crate::rate_limit::RateLimitDecision;

/// Authentication and abuse-prevention errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Wrong secret or unknown account.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account is in its lockout cooldown.
    #[error("Account locked, retry after {}s", retry_after.as_secs())]
    AccountLocked {
        /// Time until the lockout lifts.
        retry_after: Duration,
    },

    /// The caller exceeded a rate-limit scope.
    #[error("Rate limited, retry after {}s", .0.retry_after.as_secs())]
    RateLimited(RateLimitDecision),

    /// Bearer token is past its expiry.
    #[error("Token expired")]
    TokenExpired,

    /// Bearer token is cryptographically valid but has been revoked.
    #[error("Token revoked")]
    TokenRevoked,

    /// Signature verification failed.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Bearer token could not be decoded or violates the token policy.
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Algorithm header does not match the configured algorithm.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Refresh secret is unknown or expired.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// A rotated-away refresh secret was presented again.
    ///
    /// The whole session family has been revoked by the time this is
    /// returned. Never retried.
    #[error("Refresh token replay detected for family {family_id}")]
    ReplayDetected {
        /// Family that was revoked in response.
        family_id: String,
    },

    /// The shared store could not be reached or answered unusably.
    ///
    /// Wraps the original [`StorageError`] to preserve the source chain.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(
        /// The underlying storage error.
        #[source]
        StorageError,
    ),

    /// The service was built with an invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Unexpected internal failure (for example, token encoding failed).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken(message.into())
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` for bearer-token validation failures.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired
                | Self::TokenRevoked
                | Self::InvalidSignature
                | Self::MalformedToken(_)
                | Self::UnsupportedAlgorithm(_)
        )
    }

    /// Maps this error to the form exposed at the public boundary.
    #[must_use]
    pub fn public(&self) -> PublicError {
        match self {
            Self::InvalidCredentials
            | Self::AccountLocked { .. }
            | Self::InvalidRefreshToken
            | Self::ReplayDetected { .. } => PublicError::InvalidCredentials,
            Self::RateLimited(decision) => PublicError::TooManyRequests(decision.clone()),
            Self::TokenRevoked => PublicError::Forbidden,
            Self::TokenExpired
            | Self::InvalidSignature
            | Self::MalformedToken(_)
            | Self::UnsupportedAlgorithm(_) => PublicError::Unauthorized,
            Self::DependencyUnavailable(_) => PublicError::ServiceUnavailable,
            Self::Config(_) | Self::Internal(_) => PublicError::Internal,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::InvalidSignature | ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidKeyFormat => {
                AuthError::InvalidSignature
            },
            ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                AuthError::UnsupportedAlgorithm("algorithm not accepted".into())
            },
            _ => AuthError::MalformedToken(format!("JWT error: {err}")),
        }
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        AuthError::DependencyUnavailable(err)
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Error shape exposed outside the core.
///
/// Carries a status code and a fixed message. The message never depends on
/// account state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PublicError {
    /// Credential, lockout or refresh failure.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Bearer token missing, malformed, expired or badly signed.
    #[error("unauthorized")]
    Unauthorized,
    /// Bearer token revoked.
    #[error("forbidden")]
    Forbidden,
    /// Rate limit exceeded. Carries the limiter's decision unmodified.
    #[error("too many requests")]
    TooManyRequests(RateLimitDecision),
    /// The shared store is unavailable.
    #[error("service unavailable")]
    ServiceUnavailable,
    /// Unexpected failure.
    #[error("internal error")]
    Internal,
}

impl PublicError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidCredentials | Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::TooManyRequests(_) => 429,
            Self::ServiceUnavailable => 503,
            Self::Internal => 500,
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A value is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Offending field.
        field: &'static str,
        /// Smallest accepted value.
        min: String,
        /// Value supplied.
        value: String,
    },

    /// A value is above its allowed maximum.
    #[error("{field} must be at most {max}, got {value}")]
    AboveMaximum {
        /// Offending field.
        field: &'static str,
        /// Largest accepted value.
        max: String,
        /// Value supplied.
        value: String,
    },

    /// A value is not acceptable for another reason.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}
