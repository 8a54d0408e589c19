//! Store key layout.
//!
//! All components share one logical namespace; each owns a prefix and never
//! writes under another component's prefix.
//!
//! | prefix | value |
//! |---|---|
//! | `revoked/{token_id}` | empty marker, TTL = token expiry |
//! | `refresh/sessions/{session_id}` | JSON session record |
//! | `refresh/secrets/{hash}` | session id |
//! | `refresh/families/{family_id}` | JSON family head |
//! | `refresh/family-index/{family_id}/{session_id}` | empty marker |
//! | `lockout/{account}` | JSON lockout state |
//! | `ratelimit/{scope}:{identity}` | JSON timestamp list |

pub(crate) fn revoked(token_id: &str) -> Vec<u8> {
    format!("revoked/{token_id}").into_bytes()
}

pub(crate) fn session(session_id: &str) -> Vec<u8> {
    format!("refresh/sessions/{session_id}").into_bytes()
}

pub(crate) fn secret(token_hash: &str) -> Vec<u8> {
    format!("refresh/secrets/{token_hash}").into_bytes()
}

pub(crate) fn family(family_id: &str) -> Vec<u8> {
    format!("refresh/families/{family_id}").into_bytes()
}

pub(crate) fn family_index_prefix(family_id: &str) -> Vec<u8> {
    format!("refresh/family-index/{family_id}/").into_bytes()
}

pub(crate) fn family_index(family_id: &str, session_id: &str) -> Vec<u8> {
    format!("refresh/family-index/{family_id}/{session_id}").into_bytes()
}

pub(crate) fn lockout(account: &str) -> Vec<u8> {
    format!("lockout/{account}").into_bytes()
}

pub(crate) fn rate_window(scope_key: &str) -> Vec<u8> {
    format!("ratelimit/{scope_key}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_index_entries_share_prefix() {
        let prefix = family_index_prefix("fam-1");
        assert!(family_index("fam-1", "s1").starts_with(&prefix));
        assert!(!family_index("fam-10", "s1").starts_with(&prefix));
    }

    #[test]
    fn test_prefixes_do_not_overlap() {
        let keys = [
            revoked("x"),
            session("x"),
            secret("x"),
            family("x"),
            family_index("x", "y"),
            lockout("x"),
            rate_window("x"),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert!(!a.starts_with(b) && !b.starts_with(a));
            }
        }
    }
}
