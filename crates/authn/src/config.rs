//! Configuration for the authentication core.
//!
//! Every field has a default, so an empty document deserializes to a
//! working configuration:
//!
//! ```
//! use warden_authn::config::AuthConfig;
//!
//! let config: AuthConfig = serde_json::from_str("{}").unwrap();
//! assert_eq!(config.issuer, "warden");
//! assert!(config.validate().is_ok());
//! ```
//!
//! Durations use humantime notation (`"15m"`, `"7d"`, `"500ms"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use warden_storage::CasRetryConfig;

use crate::{error::ConfigError, rate_limit::RateScope};

/// Upper bound on the bearer-token lifetime.
pub const MAX_ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Upper bound on the refresh-record lifetime.
pub const MAX_REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Upper bound on the tolerated clock skew for `iat`.
pub const MAX_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(5 * 60);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Value of the `iss` claim on issued bearer tokens.
    #[serde(default = "default_issuer")]
    #[builder(default = default_issuer(), into)]
    pub issuer: String,

    /// Bearer-token lifetime.
    #[serde(with = "humantime_serde", default = "default_access_token_ttl")]
    #[builder(default = default_access_token_ttl())]
    pub access_token_ttl: Duration,

    /// Refresh-record lifetime.
    #[serde(with = "humantime_serde", default = "default_refresh_token_ttl")]
    #[builder(default = default_refresh_token_ttl())]
    pub refresh_token_ttl: Duration,

    /// Tolerated clock skew for a bearer token's `iat`.
    #[serde(with = "humantime_serde", default = "default_clock_skew_leeway")]
    #[builder(default = default_clock_skew_leeway())]
    pub clock_skew_leeway: Duration,

    /// Deadline for each store call.
    #[serde(with = "humantime_serde", default = "default_store_timeout")]
    #[builder(default = default_store_timeout())]
    pub store_timeout: Duration,

    /// Account lockout policy.
    #[serde(default)]
    #[builder(default)]
    pub lockout: LockoutConfig,

    /// Rate-limit scopes.
    #[serde(default)]
    #[builder(default)]
    pub rate_limits: RateLimitsConfig,

    /// Retry budget for compare-and-set loops.
    #[serde(default)]
    #[builder(default)]
    pub cas_retry: CasRetryConfig,
}

fn default_issuer() -> String {
    "warden".to_owned()
}

fn default_access_token_ttl() -> Duration {
    MAX_ACCESS_TOKEN_TTL
}

fn default_refresh_token_ttl() -> Duration {
    MAX_REFRESH_TOKEN_TTL
}

fn default_clock_skew_leeway() -> Duration {
    Duration::from_secs(30)
}

fn default_store_timeout() -> Duration {
    warden_storage::DEFAULT_STORE_TIMEOUT
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl AuthConfig {
    /// Checks every field against its allowed range.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "issuer",
                reason: "must not be empty".into(),
            });
        }
        check_duration("access_token_ttl", self.access_token_ttl, MAX_ACCESS_TOKEN_TTL)?;
        check_duration("refresh_token_ttl", self.refresh_token_ttl, MAX_REFRESH_TOKEN_TTL)?;
        if self.clock_skew_leeway > MAX_CLOCK_SKEW_LEEWAY {
            return Err(ConfigError::AboveMaximum {
                field: "clock_skew_leeway",
                max: format!("{:?}", MAX_CLOCK_SKEW_LEEWAY),
                value: format!("{:?}", self.clock_skew_leeway),
            });
        }
        check_positive("store_timeout", self.store_timeout)?;
        self.lockout.validate()?;
        self.rate_limits.validate()
    }
}

fn check_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::BelowMinimum {
            field,
            min: "1ms".into(),
            value: "0s".into(),
        });
    }
    Ok(())
}

fn check_duration(field: &'static str, value: Duration, max: Duration) -> Result<(), ConfigError> {
    if value < Duration::from_secs(1) {
        return Err(ConfigError::BelowMinimum {
            field,
            min: "1s".into(),
            value: format!("{:?}", value),
        });
    }
    if value > max {
        return Err(ConfigError::AboveMaximum {
            field,
            max: format!("{:?}", max),
            value: format!("{:?}", value),
        });
    }
    Ok(())
}

/// Failed-login lockout policy.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LockoutConfig {
    /// Failures within the window that lock the account.
    #[serde(default = "default_lockout_threshold")]
    #[builder(default = default_lockout_threshold())]
    pub threshold: u32,

    /// Rolling window in which failures accumulate.
    #[serde(with = "humantime_serde", default = "default_lockout_window")]
    #[builder(default = default_lockout_window())]
    pub failure_window: Duration,

    /// How long a locked account stays locked.
    #[serde(with = "humantime_serde", default = "default_lockout_window")]
    #[builder(default = default_lockout_window())]
    pub cooldown: Duration,
}

fn default_lockout_threshold() -> u32 {
    5
}

fn default_lockout_window() -> Duration {
    Duration::from_secs(15 * 60)
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl LockoutConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold == 0 {
            return Err(ConfigError::BelowMinimum {
                field: "lockout.threshold",
                min: "1".into(),
                value: "0".into(),
            });
        }
        check_positive("lockout.failure_window", self.failure_window)?;
        check_positive("lockout.cooldown", self.cooldown)
    }
}

/// What a rate-limit scope does when the store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Reject the request.
    #[default]
    FailClosed,
    /// Admit the request and flag the decision as degraded.
    FailOpen,
}

/// Quota for one rate-limit scope.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitRule {
    /// Requests admitted per window.
    pub limit: u32,

    /// Length of the sliding window.
    #[serde(with = "humantime_serde")]
    pub window: Duration,

    /// Behaviour when the store is unavailable.
    #[serde(default)]
    #[builder(default)]
    pub on_store_failure: FailurePolicy,
}

impl RateLimitRule {
    /// A fail-closed rule of `limit` requests per `window`.
    #[must_use]
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window, on_store_failure: FailurePolicy::FailClosed }
    }

    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        if self.limit == 0 {
            return Err(ConfigError::BelowMinimum { field, min: "1".into(), value: "0".into() });
        }
        check_positive(field, self.window)
    }
}

/// Per-scope quotas.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitsConfig {
    /// Login attempts per client.
    #[serde(default = "default_login_rule")]
    #[builder(default = default_login_rule())]
    pub login: RateLimitRule,

    /// All traffic per client.
    #[serde(default = "default_global_rule")]
    #[builder(default = default_global_rule())]
    pub global: RateLimitRule,

    /// Authenticated traffic per principal.
    #[serde(default = "default_authenticated_rule")]
    #[builder(default = default_authenticated_rule())]
    pub authenticated: RateLimitRule,
}

fn default_login_rule() -> RateLimitRule {
    RateLimitRule::new(5, Duration::from_secs(60))
}

fn default_global_rule() -> RateLimitRule {
    RateLimitRule::new(100, Duration::from_secs(60))
}

fn default_authenticated_rule() -> RateLimitRule {
    RateLimitRule::new(300, Duration::from_secs(60))
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RateLimitsConfig {
    /// The rule governing `scope`.
    #[must_use]
    pub fn rule(&self, scope: RateScope) -> &RateLimitRule {
        match scope {
            RateScope::Login => &self.login,
            RateScope::Global => &self.global,
            RateScope::Authenticated => &self.authenticated,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.login.validate("rate_limits.login")?;
        self.global.validate("rate_limits.global")?;
        self.authenticated.validate("rate_limits.authenticated")?;
        if self.login.on_store_failure == FailurePolicy::FailOpen {
            return Err(ConfigError::InvalidValue {
                field: "rate_limits.login.on_store_failure",
                reason: "the login scope must fail closed".into(),
            });
        }
        Ok(())
    }
}
