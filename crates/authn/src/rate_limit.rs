//! Sliding-window rate limiting.
//!
//! Each scope key holds the timestamps of the requests admitted in the
//! trailing window. A call prunes timestamps older than `now - window`,
//! admits the request if fewer than `limit` remain and records it. The
//! prune-check-record cycle is one compare-and-set against the store, re-run
//! on conflict, so concurrent callers for the same key can never overshoot
//! the limit.
//!
//! When the store is unavailable, [`RateLimiter::check`] applies the scope's
//! [`FailurePolicy`]. The login scope always fails closed. Only connection
//! failures and timeouts count as unavailable: running out of
//! compare-and-set retries means the store is up and the key is contended,
//! so it is always rejected.

use std::{collections::VecDeque, fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_storage::{
    CasRetryConfig, Clock, StorageBackend, StorageResult, clock::add_duration, with_cas_retry,
};

use crate::{
    config::{FailurePolicy, RateLimitRule},
    error::AuthError,
    keys,
};

/// Traffic class a quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    /// Login attempts, keyed by client.
    Login,
    /// All traffic, keyed by client.
    Global,
    /// Authenticated traffic, keyed by principal.
    Authenticated,
}

impl RateScope {
    /// Short name used as the scope-key prefix.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Global => "global",
            Self::Authenticated => "authed",
        }
    }

    /// Composite key for `identity` in this scope, e.g. `login:10.0.0.1`.
    #[must_use]
    pub fn scope_key(&self, identity: &str) -> String {
        format!("{}:{}", self.as_str(), identity)
    }
}

impl fmt::Display for RateScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a rate-limit check.
///
/// These values feed the HTTP rate-limit headers unmodified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request was admitted.
    pub allowed: bool,
    /// Configured limit for the scope.
    pub limit: u32,
    /// Requests still admissible in the current window.
    pub remaining: u32,
    /// Wait before the next request can be admitted; zero when allowed.
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,
    /// When the oldest recorded request leaves the window.
    pub reset_at: DateTime<Utc>,
    /// The store was unreachable and the scope failed open.
    pub degraded: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RateWindow {
    /// Admitted request times, milliseconds since epoch, oldest first.
    hits: VecDeque<i64>,
}

/// Store-backed sliding-window rate limiter.
#[derive(Debug, Clone)]
pub struct RateLimiter<B> {
    backend: B,
    clock: Arc<dyn Clock>,
    cas_retry: CasRetryConfig,
}

impl<B: StorageBackend> RateLimiter<B> {
    /// Creates a limiter over `backend`.
    pub fn new(backend: B, clock: Arc<dyn Clock>, cas_retry: CasRetryConfig) -> Self {
        Self { backend, clock, cas_retry }
    }

    /// Admits or rejects one request for `scope_key`.
    ///
    /// A rejected request is not recorded. `retry_after` is
    /// `window - (now - oldest)`, never more than `window`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails or
    /// the compare-and-set budget runs out.
    #[tracing::instrument(skip(self))]
    pub async fn allow(
        &self,
        scope_key: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateLimitDecision, AuthError> {
        let key = keys::rate_window(scope_key);
        let decision = with_cas_retry(&self.cas_retry, "rate_limit", || {
            self.try_record(&key, limit, window)
        })
        .await?;

        if !decision.allowed {
            tracing::debug!(
                retry_after_ms = decision.retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
        }
        Ok(decision)
    }

    /// One prune-check-record cycle, ending in a compare-and-set.
    async fn try_record(
        &self,
        key: &[u8],
        limit: u32,
        window: Duration,
    ) -> StorageResult<RateLimitDecision> {
        let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
        let now = self.clock.now();
        let now_ms = now.timestamp_millis();
        let cutoff = now_ms.saturating_sub(window_ms);

        let current = self.backend.get(key).await?;
        let mut state: RateWindow = match &current {
            Some(bytes) => serde_json::from_slice(bytes)?,
            None => RateWindow::default(),
        };
        while state.hits.front().is_some_and(|&t| t <= cutoff) {
            state.hits.pop_front();
        }

        let in_window = u32::try_from(state.hits.len()).unwrap_or(u32::MAX);
        if in_window >= limit {
            let oldest = state.hits.front().copied().unwrap_or(now_ms);
            let wait_ms = oldest.saturating_add(window_ms).saturating_sub(now_ms).max(0);
            let retry_after = Duration::from_millis(wait_ms as u64);
            return Ok(RateLimitDecision {
                allowed: false,
                limit,
                remaining: 0,
                retry_after,
                reset_at: add_duration(now, retry_after),
                degraded: false,
            });
        }

        state.hits.push_back(now_ms);
        let encoded = serde_json::to_vec(&state)?;
        self.backend.compare_and_set_with_ttl(key, current.as_deref(), encoded, window).await?;

        let oldest = state.hits.front().copied().unwrap_or(now_ms);
        let reset_in = oldest.saturating_add(window_ms).saturating_sub(now_ms).max(0);
        Ok(RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit - in_window - 1,
            retry_after: Duration::ZERO,
            reset_at: add_duration(now, Duration::from_millis(reset_in as u64)),
            degraded: false,
        })
    }

    /// Checks `identity` against the quota for `scope`, applying the
    /// scope's store-failure policy.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] when the store fails and
    /// the scope fails closed, or when the compare-and-set budget runs out
    /// under any policy.
    pub async fn check(
        &self,
        scope: RateScope,
        identity: &str,
        rule: &RateLimitRule,
    ) -> Result<RateLimitDecision, AuthError> {
        let scope_key = scope.scope_key(identity);
        match self.allow(&scope_key, rule.limit, rule.window).await {
            Err(AuthError::DependencyUnavailable(err))
                if err.is_transient()
                    && scope != RateScope::Login
                    && rule.on_store_failure == FailurePolicy::FailOpen =>
            {
                tracing::warn!(
                    scope = %scope,
                    error = %err,
                    "rate-limit store unavailable, failing open"
                );
                Ok(RateLimitDecision {
                    allowed: true,
                    limit: rule.limit,
                    remaining: rule.limit,
                    retry_after: Duration::ZERO,
                    reset_at: add_duration(self.clock.now(), rule.window),
                    degraded: true,
                })
            },
            other => other,
        }
    }
}
