//! Audit events for authentication decisions.
//!
//! This core only emits events; durable storage belongs to whatever
//! [`AuditLogger`] the host wires in.
//!
//! Events never carry secrets: actors are normalized account keys or
//! principal ids, resources are session, family or token ids.
//!
//! # Usage
//!
//! ```no_run
//! use warden_authn::audit::{
//!     AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger,
//! };
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let logger = TracingAuditLogger;
//! let event = AuditEvent::builder()
//!     .actor("alice@example.com")
//!     .action(AuditAction::LoginFailed)
//!     .resource("account:alice@example.com")
//!     .result(AuditResult::Failure("invalid credentials".into()))
//!     .build();
//! logger.log(&event).await;
//! # });
//! ```

use std::{collections::BTreeMap, fmt};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Authentication action being audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// Credentials verified and a session issued.
    LoginSucceeded,
    /// Credentials rejected.
    LoginFailed,
    /// Login refused because the account is locked.
    LoginRejectedLocked,
    /// Failure threshold reached; the account is now locked.
    AccountLocked,
    /// A request exceeded its rate-limit scope.
    RateLimited,
    /// A refresh secret was rotated.
    TokenRefreshed,
    /// A rotated-away refresh secret was presented again.
    RefreshReplayDetected,
    /// Every session in a family was revoked.
    FamilyRevoked,
    /// A bearer token and its session were revoked.
    Logout,
    /// A revoked bearer token was presented.
    RevokedTokenPresented,
}

impl AuditAction {
    /// Default severity for this action.
    #[must_use]
    pub fn severity(&self) -> AuditSeverity {
        match self {
            Self::LoginSucceeded | Self::TokenRefreshed | Self::Logout => AuditSeverity::Info,
            Self::LoginFailed
            | Self::LoginRejectedLocked
            | Self::AccountLocked
            | Self::RateLimited
            | Self::FamilyRevoked
            | Self::RevokedTokenPresented => AuditSeverity::Warning,
            Self::RefreshReplayDetected => AuditSeverity::Critical,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoginSucceeded => write!(f, "login_succeeded"),
            Self::LoginFailed => write!(f, "login_failed"),
            Self::LoginRejectedLocked => write!(f, "login_rejected_locked"),
            Self::AccountLocked => write!(f, "account_locked"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::TokenRefreshed => write!(f, "token_refreshed"),
            Self::RefreshReplayDetected => write!(f, "refresh_replay_detected"),
            Self::FamilyRevoked => write!(f, "family_revoked"),
            Self::Logout => write!(f, "logout"),
            Self::RevokedTokenPresented => write!(f, "revoked_token_presented"),
        }
    }
}

/// How urgently an event needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// Routine.
    Info,
    /// Suspicious or policy-enforcing.
    Warning,
    /// Likely credential theft.
    Critical,
}

impl fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Outcome of an audited operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditResult {
    /// Operation completed successfully.
    Success,
    /// Operation was refused for the given reason.
    Failure(String),
}

impl fmt::Display for AuditResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure(reason) => write!(f, "failure: {reason}"),
        }
    }
}

/// Structured audit event.
#[derive(Debug, Clone, bon::Builder)]
pub struct AuditEvent {
    /// When the event occurred (defaults to now).
    #[builder(default = Utc::now())]
    pub timestamp: DateTime<Utc>,
    /// Account key or principal id the event concerns.
    #[builder(into)]
    pub actor: String,
    /// The action that was performed.
    pub action: AuditAction,
    /// Resource identifier (e.g. `session:<sid>`, `family:<fid>`).
    #[builder(into)]
    pub resource: String,
    /// Outcome of the operation.
    pub result: AuditResult,
    /// Severity; defaults to the action's severity.
    pub severity: Option<AuditSeverity>,
    /// Additional context.
    #[builder(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Effective severity.
    #[must_use]
    pub fn severity(&self) -> AuditSeverity {
        self.severity.unwrap_or_else(|| self.action.severity())
    }
}

/// Trait for audit log backends.
#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Records an audit event.
    async fn log(&self, event: &AuditEvent);
}

#[async_trait]
impl<L: AuditLogger + ?Sized> AuditLogger for std::sync::Arc<L> {
    async fn log(&self, event: &AuditEvent) {
        (**self).log(event).await;
    }
}

/// Audit logger that emits structured `tracing` events on the `audit`
/// target.
///
/// Level follows severity: `INFO`, `WARN` or `ERROR`.
///
/// Field mapping:
/// - `audit.timestamp`: RFC 3339 timestamp
/// - `audit.actor`: account key or principal id
/// - `audit.action`: e.g. `login_failed`
/// - `audit.resource`: what was affected
/// - `audit.result`: `success` or `failure: ...`
/// - `audit.severity`: `info`, `warning` or `critical`
/// - `audit.metadata`: `k=v` pairs in key order
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(&self, event: &AuditEvent) {
        let metadata = event
            .metadata
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");

        match event.severity() {
            AuditSeverity::Info => tracing::event!(
                target: "audit",
                tracing::Level::INFO,
                audit.timestamp = %event.timestamp.to_rfc3339(),
                audit.actor = %event.actor,
                audit.action = %event.action,
                audit.resource = %event.resource,
                audit.result = %event.result,
                audit.severity = %AuditSeverity::Info,
                audit.metadata = %metadata,
                "audit_event"
            ),
            AuditSeverity::Warning => tracing::event!(
                target: "audit",
                tracing::Level::WARN,
                audit.timestamp = %event.timestamp.to_rfc3339(),
                audit.actor = %event.actor,
                audit.action = %event.action,
                audit.resource = %event.resource,
                audit.result = %event.result,
                audit.severity = %AuditSeverity::Warning,
                audit.metadata = %metadata,
                "audit_event"
            ),
            AuditSeverity::Critical => tracing::event!(
                target: "audit",
                tracing::Level::ERROR,
                audit.timestamp = %event.timestamp.to_rfc3339(),
                audit.actor = %event.actor,
                audit.action = %event.action,
                audit.resource = %event.resource,
                audit.result = %event.result,
                audit.severity = %AuditSeverity::Critical,
                audit.metadata = %metadata,
                "audit_event"
            ),
        }
    }
}

/// Audit logger that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditLogger;

#[async_trait]
impl AuditLogger for NoopAuditLogger {
    async fn log(&self, _event: &AuditEvent) {}
}
