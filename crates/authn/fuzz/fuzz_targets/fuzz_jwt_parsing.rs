//! Fuzz target for bearer-token parsing and verification.
//!
//! Feeds arbitrary byte strings as bearer tokens to the header decoder and
//! the verifier. Every result must be either `Ok(...)` or `Err(AuthError)`;
//! nothing may panic.

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use warden_authn::{
    AuthConfig, SigningKeyPair, TokenVerifier,
    jwt::decode_jwt_header,
    validation::{validate_algorithm, validate_kid},
};
use warden_storage::SystemClock;

fn verifier() -> &'static TokenVerifier {
    static VERIFIER: OnceLock<TokenVerifier> = OnceLock::new();
    VERIFIER.get_or_init(|| {
        let keys = SigningKeyPair::from_secret_bytes("fuzz-key", &[7u8; 32]).expect("valid kid");
        keys.verifier(&AuthConfig::default(), Arc::new(SystemClock)).expect("valid key")
    })
}

fuzz_target!(|data: &[u8]| {
    // Bearer tokens are always UTF-8
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(header) = decode_jwt_header(token) {
        let _ = validate_algorithm(&format!("{:?}", header.alg));
        if let Some(ref kid) = header.kid {
            let _ = validate_kid(kid);
        }
    }

    // Nothing unsigned by "fuzz-key" can ever verify
    assert!(verifier().verify(token).is_err());
});
