//! JWT header validation.
//!
//! Security checks that run on the unverified header before any signature
//! work is done.
//!
//! # Security
//!
//! - Strict algorithm checks prevent algorithm substitution attacks
//! - Only the asymmetric EdDSA algorithm is accepted
//! - Symmetric algorithms and "none" are always rejected
//! - Key ids are bounded and restricted to a URL-safe alphabet

use crate::error::AuthError;

/// Forbidden JWT algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric; a verifier holding only the public
///   key could be tricked into using it as an HMAC secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted JWT algorithms.
///
/// Bearer tokens are signed with Ed25519. Per RFC 8725 Section 3.1 a verifier
/// must reject algorithms it does not fully implement, so nothing else is
/// listed here.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["EdDSA"];

/// Longest accepted `kid` header value.
pub const MAX_KID_LENGTH: usize = 128;

/// Validate a JWT algorithm against the security policy.
///
/// # Errors
///
/// Returns [`AuthError::UnsupportedAlgorithm`] if the algorithm is forbidden
/// or not in [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use warden_authn::validation::validate_algorithm;
///
/// assert!(validate_algorithm("EdDSA").is_ok());
/// assert!(validate_algorithm("RS256").is_err());
/// assert!(validate_algorithm("HS256").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), AuthError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(AuthError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list (only EdDSA is supported)",
            alg
        )));
    }

    Ok(())
}

/// Validate the format of a `kid` header value.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] if the key id is empty, longer than
/// [`MAX_KID_LENGTH`], or contains characters outside `[A-Za-z0-9._-]`.
pub fn validate_kid(kid: &str) -> Result<(), AuthError> {
    if kid.is_empty() {
        return Err(AuthError::malformed("JWT header 'kid' is empty"));
    }
    if kid.len() > MAX_KID_LENGTH {
        return Err(AuthError::malformed(format!(
            "JWT header 'kid' exceeds {} characters",
            MAX_KID_LENGTH
        )));
    }
    if !kid.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.')) {
        return Err(AuthError::malformed("JWT header 'kid' contains invalid characters"));
    }
    Ok(())
}
