//! Security-focused authentication tests.
//!
//! These tests drive [`AuthService::authenticate`] with hostile bearer
//! tokens: algorithm substitution, algorithm confusion, foreign keys,
//! tampered payloads, wrong or malicious key ids, and tokens that are
//! correctly signed but violate the token policy.
#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde_json::json;
use warden_authn::{
    AuthService, PublicError, SigningKeyPair, assert_auth_error,
    testutil::{StaticUserStore, craft_raw_jwt, replace_payload, sign_raw_claims, test_keypair},
};
use warden_storage::{Clock, ManualClock, MemoryBackend};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SEED: [u8; 32] = [42u8; 32];
const KID: &str = "primary";

struct Fixture {
    service: AuthService<MemoryBackend>,
    /// Same key material the service signs with.
    keys: SigningKeyPair,
    clock: ManualClock,
}

fn fixture() -> Fixture {
    let clock = ManualClock::default();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let users = StaticUserStore::new().with_user("alice", "pw", "user-1", "member");

    let service = AuthService::builder()
        .backend(MemoryBackend::with_clock(Arc::clone(&shared)))
        .signing_key(SigningKeyPair::from_secret_bytes(KID, &SEED).expect("valid key"))
        .user_store(Arc::new(users))
        .clock(shared)
        .build()
        .expect("service");
    let keys = SigningKeyPair::from_secret_bytes(KID, &SEED).expect("valid key");
    Fixture { service, keys, clock }
}

fn claims(clock: &ManualClock, lifetime: i64) -> serde_json::Value {
    let now = clock.now().timestamp();
    json!({
        "iss": "warden",
        "sub": "user-1",
        "sid": "session-1",
        "tid": "token-1",
        "role": "member",
        "iat": now,
        "exp": now + lifetime,
    })
}

// ---------------------------------------------------------------------------
// Algorithm attacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_alg_none_rejected() {
    let f = fixture();
    let token = craft_raw_jwt(&json!({ "alg": "none", "typ": "JWT", "kid": KID }), &claims(&f.clock, 900));

    let result = f.service.authenticate(&token).await;
    assert_auth_error!(result, MalformedToken);
    assert_eq!(result.expect_err("rejected").public(), PublicError::Unauthorized);
}

#[tokio::test]
async fn test_hs256_with_public_key_as_secret_rejected() {
    let f = fixture();
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(KID.to_owned());
    let token = jsonwebtoken::encode(
        &header,
        &claims(&f.clock, 900),
        &EncodingKey::from_secret(f.keys.public_key().as_bytes()),
    )
    .expect("encode");

    assert_auth_error!(f.service.authenticate(&token).await, UnsupportedAlgorithm);
}

#[tokio::test]
async fn test_other_asymmetric_algorithms_rejected() {
    let f = fixture();
    for alg in ["RS256", "ES256", "PS256"] {
        let token = craft_raw_jwt(&json!({ "alg": alg, "typ": "JWT", "kid": KID }), &claims(&f.clock, 900));
        assert_auth_error!(f.service.authenticate(&token).await, UnsupportedAlgorithm, alg);
    }
}

// ---------------------------------------------------------------------------
// Signature attacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_foreign_key_with_matching_kid_rejected() {
    let f = fixture();
    let attacker = test_keypair(KID);
    let token = sign_raw_claims(&attacker, KID, &claims(&f.clock, 900));

    assert_auth_error!(f.service.authenticate(&token).await, InvalidSignature);
}

#[tokio::test]
async fn test_tampered_payload_rejected() {
    let f = fixture();
    let pair = f.service.login("alice", "pw", "10.0.0.1").await.expect("login");

    let mut escalated = claims(&f.clock, 900);
    escalated["sub"] = json!(pair.access.claims.sub);
    escalated["sid"] = json!(pair.access.claims.sid);
    escalated["tid"] = json!(pair.access.claims.tid);
    escalated["role"] = json!("admin");
    let token = replace_payload(&pair.access.token, &escalated);

    assert_auth_error!(f.service.authenticate(&token).await, InvalidSignature);
    assert!(f.service.authenticate(&pair.access.token).await.is_ok());
}

#[tokio::test]
async fn test_stripped_signature_rejected() {
    let f = fixture();
    let pair = f.service.login("alice", "pw", "10.0.0.1").await.expect("login");
    let (unsigned, _) = pair.access.token.rsplit_once('.').expect("three segments");

    let result = f.service.authenticate(&format!("{unsigned}.")).await;
    assert!(result.is_err());
    assert_eq!(result.expect_err("rejected").public(), PublicError::Unauthorized);
}

// ---------------------------------------------------------------------------
// Key id attacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unknown_kid_rejected() {
    let f = fixture();
    let token = sign_raw_claims(&f.keys, "retired-key", &claims(&f.clock, 900));

    assert_auth_error!(f.service.authenticate(&token).await, InvalidSignature);
}

#[tokio::test]
async fn test_malicious_kid_rejected() {
    let f = fixture();
    let oversized = "k".repeat(129);
    for kid in ["../../etc/passwd", "key; DROP TABLE", "", oversized.as_str()] {
        let token = craft_raw_jwt(&json!({ "alg": "EdDSA", "typ": "JWT", "kid": kid }), &claims(&f.clock, 900));
        assert_auth_error!(f.service.authenticate(&token).await, MalformedToken, kid);
    }
}

// ---------------------------------------------------------------------------
// Policy violations with a valid signature
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_oversized_lifetime_rejected() {
    let f = fixture();
    let token = sign_raw_claims(&f.keys, KID, &claims(&f.clock, 24 * 3600));

    assert_auth_error!(f.service.authenticate(&token).await, MalformedToken);
}

#[tokio::test]
async fn test_shortened_lifetime_rejected() {
    let f = fixture();
    let token = sign_raw_claims(&f.keys, KID, &claims(&f.clock, 60));

    assert_auth_error!(f.service.authenticate(&token).await, MalformedToken);
}

#[tokio::test]
async fn test_wrong_issuer_rejected() {
    let f = fixture();
    let mut foreign = claims(&f.clock, 900);
    foreign["iss"] = json!("another-service");
    let token = sign_raw_claims(&f.keys, KID, &foreign);

    assert_auth_error!(f.service.authenticate(&token).await, MalformedToken);
}

#[tokio::test]
async fn test_expired_token_rejected_as_unauthorized() {
    let f = fixture();
    let pair = f.service.login("alice", "pw", "10.0.0.1").await.expect("login");

    f.clock.advance(Duration::from_secs(15 * 60));
    let result = f.service.authenticate(&pair.access.token).await;
    assert_auth_error!(result, TokenExpired);
    assert_eq!(result.expect_err("expired").public().status_code(), 401);
}

#[tokio::test]
async fn test_garbage_tokens_rejected() {
    let f = fixture();
    for token in ["", "Bearer", "a.b", "a.b.c", "a.b.c.d", "....", "\u{0}"] {
        let result = f.service.authenticate(token).await;
        assert!(result.is_err(), "{token:?} must not authenticate");
        assert!(result.expect_err("rejected").is_token_error());
    }
}

// ---------------------------------------------------------------------------
// Secret hygiene
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_debug_output_never_contains_secrets() {
    let f = fixture();
    let pair = f.service.login("alice", "pw", "10.0.0.1").await.expect("login");

    let rendered = format!("{pair:?} {:?} {:?}", f.keys, f.service);
    assert!(!rendered.contains(pair.refresh.secret.expose()));
    assert!(!rendered.contains(&pair.access.token));
}

#[tokio::test]
async fn test_refresh_secret_is_not_a_bearer_token() {
    let f = fixture();
    let pair = f.service.login("alice", "pw", "10.0.0.1").await.expect("login");

    let result = f.service.authenticate(pair.refresh.secret.expose()).await;
    assert_auth_error!(result, MalformedToken);
}
