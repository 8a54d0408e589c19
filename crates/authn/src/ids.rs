//! Identifier generation.
//!
//! Token ids are UUIDv7 so revocation keys sort by issue time; session and
//! family ids are random UUIDv4.

use uuid::Uuid;

/// A fresh bearer-token id (`tid`).
#[must_use]
pub fn new_token_id() -> String {
    Uuid::now_v7().to_string()
}

/// A fresh refresh-session id.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// A fresh session-family id.
#[must_use]
pub fn new_family_id() -> String {
    Uuid::new_v4().to_string()
}
