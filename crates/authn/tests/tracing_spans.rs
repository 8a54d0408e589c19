//! Span coverage for the service entry points.
//!
//! A collecting layer records every span opened during an operation along
//! with its rendered fields, so the tests can check both that the expected
//! spans exist and that no credential ever reaches a span field.

#![allow(clippy::expect_used)]

use std::{
    fmt::Write as _,
    sync::{Arc, Mutex},
};

use tracing::{
    Subscriber,
    field::{Field, Visit},
};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};
use warden_authn::{
    AuthService,
    testutil::{StaticUserStore, test_keypair},
};
use warden_storage::MemoryBackend;

// ---------------------------------------------------------------------------
// Collecting layer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct RecordedSpan {
    name: String,
    fields: String,
}

#[derive(Clone, Default)]
struct SpanCollector {
    spans: Arc<Mutex<Vec<RecordedSpan>>>,
}

struct FieldWriter<'a>(&'a mut String);

impl Visit for FieldWriter<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let _ = write!(self.0, "{}={:?} ", field.name(), value);
    }
}

impl<S> tracing_subscriber::Layer<S> for SpanCollector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        attrs: &tracing::span::Attributes<'_>,
        _id: &tracing::span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = String::new();
        attrs.record(&mut FieldWriter(&mut fields));
        self.spans
            .lock()
            .expect("lock poisoned")
            .push(RecordedSpan { name: attrs.metadata().name().to_owned(), fields });
    }

    fn on_record(
        &self,
        _id: &tracing::span::Id,
        values: &tracing::span::Record<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut fields = String::new();
        values.record(&mut FieldWriter(&mut fields));
        self.spans
            .lock()
            .expect("lock poisoned")
            .push(RecordedSpan { name: "<record>".to_owned(), fields });
    }
}

impl SpanCollector {
    fn names(&self) -> Vec<String> {
        self.spans.lock().expect("lock poisoned").iter().map(|s| s.name.clone()).collect()
    }

    fn rendered(&self) -> String {
        self.spans
            .lock()
            .expect("lock poisoned")
            .iter()
            .map(|s| format!("{} {}\n", s.name, s.fields))
            .collect()
    }
}

fn service() -> AuthService<MemoryBackend> {
    AuthService::builder()
        .backend(MemoryBackend::new())
        .signing_key(test_keypair("primary"))
        .user_store(Arc::new(StaticUserStore::new().with_user(
            "alice",
            "hunter2-passphrase",
            "user-1",
            "member",
        )))
        .build()
        .expect("service")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_login_creates_spans() {
    let collector = SpanCollector::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(collector.clone()));

    let service = service();
    service.login("alice", "hunter2-passphrase", "10.0.0.1").await.expect("login");

    let names = collector.names();
    for expected in ["login", "allow", "issue"] {
        assert!(names.iter().any(|n| n == expected), "expected a '{expected}' span, got: {names:?}");
    }
}

#[tokio::test]
async fn test_refresh_and_authenticate_create_spans() {
    let service = service();
    let pair = service.login("alice", "hunter2-passphrase", "10.0.0.1").await.expect("login");

    let collector = SpanCollector::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(collector.clone()));

    service.authenticate(&pair.access.token).await.expect("authenticate");
    service.refresh(&pair.refresh.secret).await.expect("refresh");

    let names = collector.names();
    for expected in ["authenticate", "verify", "refresh", "rotate"] {
        assert!(names.iter().any(|n| n == expected), "expected a '{expected}' span, got: {names:?}");
    }
}

#[tokio::test]
async fn test_spans_never_carry_credentials() {
    let collector = SpanCollector::default();
    let _guard =
        tracing::subscriber::set_default(tracing_subscriber::registry().with(collector.clone()));

    let service = service();
    let pair = service.login("alice", "hunter2-passphrase", "10.0.0.1").await.expect("login");
    let claims = service.authenticate(&pair.access.token).await.expect("authenticate");
    let rotated = service.refresh(&pair.refresh.secret).await.expect("refresh");
    service.logout_claims(&claims).await.expect("logout");

    let rendered = collector.rendered();
    assert!(!rendered.contains("hunter2-passphrase"), "password leaked:\n{rendered}");
    assert!(!rendered.contains(pair.refresh.secret.expose()), "refresh secret leaked");
    assert!(!rendered.contains(rotated.refresh.secret.expose()), "refresh secret leaked");
    assert!(!rendered.contains(&pair.access.token), "bearer token leaked");
}
