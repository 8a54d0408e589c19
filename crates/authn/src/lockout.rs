//! Failed-login lockout tracking.
//!
//! Failures for a normalized account key accumulate inside a rolling
//! window. Reaching the threshold locks the account for the cooldown. The
//! increment-and-threshold step is a single compare-and-set on the account's
//! state record, so concurrent failures are never lost.
//!
//! Nothing here distinguishes unknown accounts from known ones: state is
//! keyed by whatever identifier was presented.

use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use warden_storage::{
    CasRetryConfig, Clock, StorageBackend, StorageResult,
    clock::{add_duration, duration_until},
    with_cas_retry,
};

use crate::{config::LockoutConfig, error::AuthError, keys};

/// Normalized login identifier.
///
/// Surrounding whitespace is trimmed and the identifier is lowercased, so
/// `" Alice@Example.com"` and `"alice@example.com"` share one lockout record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccountKey(String);

impl AccountKey {
    /// Normalizes a raw login identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an empty identifier.
    pub fn normalize(raw: &str) -> Result<Self, AuthError> {
        let normalized = raw.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(Self(normalized))
    }

    /// The normalized identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Persisted failure state for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutState {
    /// Normalized account identifier.
    pub account_key: String,
    /// Failures in the current window.
    pub failure_count: u32,
    /// Start of the current failure window.
    pub window_start: DateTime<Utc>,
    /// End of the cooldown, when locked.
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutState {
    fn fresh(account: &AccountKey, now: DateTime<Utc>) -> Self {
        Self {
            account_key: account.as_str().to_owned(),
            failure_count: 0,
            window_start: now,
            locked_until: None,
        }
    }

    /// Whether the account is locked at `now`.
    #[must_use]
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

/// Answer to [`LockoutTracker::is_locked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    /// The account is in its cooldown.
    pub locked: bool,
    /// Time until the cooldown ends; zero when unlocked.
    pub retry_after: Duration,
}

/// Store-backed lockout tracker.
#[derive(Debug, Clone)]
pub struct LockoutTracker<B> {
    backend: B,
    clock: Arc<dyn Clock>,
    config: LockoutConfig,
    cas_retry: CasRetryConfig,
}

impl<B: StorageBackend> LockoutTracker<B> {
    /// Creates a tracker over `backend`.
    pub fn new(
        backend: B,
        clock: Arc<dyn Clock>,
        config: LockoutConfig,
        cas_retry: CasRetryConfig,
    ) -> Self {
        Self { backend, clock, config, cas_retry }
    }

    /// Records a failed attempt and returns the resulting state.
    ///
    /// A failure outside the current window, or after an elapsed lock,
    /// starts a new window. A failure while locked leaves the state as is.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip_all, fields(account = %account))]
    pub async fn record_failure(&self, account: &AccountKey) -> Result<LockoutState, AuthError> {
        let key = keys::lockout(account.as_str());
        let (state, locked_now) = with_cas_retry(&self.cas_retry, "lockout_failure", || {
            self.try_record_failure(&key, account)
        })
        .await?;

        if locked_now && let Some(until) = state.locked_until {
            tracing::warn!(locked_until = %until, "account locked after repeated failures");
        }
        Ok(state)
    }

    async fn try_record_failure(
        &self,
        key: &[u8],
        account: &AccountKey,
    ) -> StorageResult<(LockoutState, bool)> {
        let now = self.clock.now();
        let current = self.backend.get(key).await?;
        let previous: Option<LockoutState> = match &current {
            Some(bytes) => Some(serde_json::from_slice(bytes)?),
            None => None,
        };

        let mut state = match previous {
            Some(state) if state.is_locked_at(now) => return Ok((state, false)),
            Some(state)
                if state.locked_until.is_none()
                    && add_duration(state.window_start, self.config.failure_window) > now =>
            {
                state
            },
            _ => LockoutState::fresh(account, now),
        };

        state.failure_count = state.failure_count.saturating_add(1);
        let locked_now = state.failure_count >= self.config.threshold;
        if locked_now {
            state.locked_until = Some(add_duration(now, self.config.cooldown));
        }

        let window_end = add_duration(state.window_start, self.config.failure_window);
        let retain_until = state.locked_until.map_or(window_end, |until| until.max(window_end));
        let encoded = serde_json::to_vec(&state)?;
        self.backend
            .compare_and_set_with_ttl(
                key,
                current.as_deref(),
                encoded,
                duration_until(now, retain_until),
            )
            .await?;
        Ok((state, locked_now))
    }

    /// Clears all failure state for `account`. A no-op when none exists.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip_all, fields(account = %account))]
    pub async fn record_success(&self, account: &AccountKey) -> Result<(), AuthError> {
        self.backend.delete(&keys::lockout(account.as_str())).await?;
        Ok(())
    }

    /// Returns whether `account` is locked and for how much longer.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    pub async fn is_locked(&self, account: &AccountKey) -> Result<LockStatus, AuthError> {
        let now = self.clock.now();
        let Some(bytes) = self.backend.get(&keys::lockout(account.as_str())).await? else {
            return Ok(LockStatus { locked: false, retry_after: Duration::ZERO });
        };
        let state: LockoutState =
            serde_json::from_slice(&bytes).map_err(warden_storage::StorageError::from)?;

        Ok(match state.locked_until {
            Some(until) if until > now => {
                LockStatus { locked: true, retry_after: duration_until(now, until) }
            },
            _ => LockStatus { locked: false, retry_after: Duration::ZERO },
        })
    }
}
