//! The authentication core's public surface.
//!
//! [`AuthService`] wires the five components to one store and exposes the
//! operations HTTP middleware and handlers call:
//!
//! | operation | flow |
//! |---|---|
//! | [`authenticate`](AuthService::authenticate) | verify signature and claims, then revocation lookup |
//! | [`login`](AuthService::login) | lockout, login rate limit, user store, refresh ledger, signer |
//! | [`refresh`](AuthService::refresh) | ledger rotation (or replay handling), then signer |
//! | [`logout`](AuthService::logout) | revocation registry, then ledger |
//! | [`rate_limit_check`](AuthService::rate_limit_check) | one sliding-window check |
//!
//! Errors come back as precise [`AuthError`] kinds for logging; callers turn
//! them into responses with [`AuthError::public`].

use std::{fmt, sync::Arc};

use warden_storage::{
    Clock, StorageBackend, TimeoutBackend,
    clock::{add_duration, system_clock},
};

use crate::{
    audit::{AuditAction, AuditEvent, AuditLogger, AuditResult, TracingAuditLogger},
    config::AuthConfig,
    error::AuthError,
    jwt::AccessClaims,
    lockout::{AccountKey, LockoutTracker},
    rate_limit::{RateLimitDecision, RateLimiter, RateScope},
    refresh::{RefreshSecret, RefreshSession, RefreshTokenLedger},
    revocation::RevocationRegistry,
    signer::{IssuedToken, SigningKeyPair, TokenSigner},
    user_store::UserStore,
};

/// A bearer token together with the refresh session it is bound to.
#[derive(Debug, Clone)]
pub struct TokenPair {
    /// Signed bearer token and its claims.
    pub access: IssuedToken,
    /// Refresh session; `refresh.secret` goes back to the client.
    pub refresh: RefreshSession,
}

/// Authentication service over a shared store `B`.
pub struct AuthService<B> {
    config: AuthConfig,
    signer: TokenSigner,
    ledger: RefreshTokenLedger<TimeoutBackend<B>>,
    revocations: RevocationRegistry<TimeoutBackend<B>>,
    lockout: LockoutTracker<TimeoutBackend<B>>,
    rate_limiter: RateLimiter<TimeoutBackend<B>>,
    users: Arc<dyn UserStore>,
    audit: Arc<dyn AuditLogger>,
    clock: Arc<dyn Clock>,
}

impl<B> fmt::Debug for AuthService<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthService")
            .field("config", &self.config)
            .field("signer", &self.signer)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl<B: StorageBackend> AuthService<B> {
    /// Builds a service.
    ///
    /// Every store call made by the service is bounded by
    /// `config.store_timeout`. The clock defaults to the system clock and
    /// audit events go to [`TracingAuditLogger`] unless another logger is
    /// supplied.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if `config` fails validation.
    #[builder]
    pub fn new(
        #[builder(default)] config: AuthConfig,
        backend: B,
        signing_key: SigningKeyPair,
        user_store: Arc<dyn UserStore>,
        clock: Option<Arc<dyn Clock>>,
        audit_logger: Option<Arc<dyn AuditLogger>>,
    ) -> Result<Self, AuthError> {
        config.validate()?;

        let clock = clock.unwrap_or_else(system_clock);
        let audit = audit_logger.unwrap_or_else(|| Arc::new(TracingAuditLogger));
        let backend = TimeoutBackend::new(backend, config.store_timeout);

        let signer = TokenSigner::new(&signing_key, &config, Arc::clone(&clock))?;
        let ledger = RefreshTokenLedger::new(
            backend.clone(),
            Arc::clone(&clock),
            config.refresh_token_ttl,
            config.cas_retry.clone(),
        );
        let revocations = RevocationRegistry::new(backend.clone(), Arc::clone(&clock));
        let lockout = LockoutTracker::new(
            backend.clone(),
            Arc::clone(&clock),
            config.lockout.clone(),
            config.cas_retry.clone(),
        );
        let rate_limiter = RateLimiter::new(backend, Arc::clone(&clock), config.cas_retry.clone());

        tracing::info!(kid = %signing_key.kid(), issuer = %config.issuer, "auth service ready");
        Ok(Self {
            config,
            signer,
            ledger,
            revocations,
            lockout,
            rate_limiter,
            users: user_store,
            audit,
            clock,
        })
    }

    /// Validates a bearer token and checks it has not been revoked.
    ///
    /// # Errors
    ///
    /// - token validation errors from [`TokenSigner::verify`]
    /// - [`AuthError::TokenRevoked`] if the token was revoked
    /// - [`AuthError::DependencyUnavailable`] if the revocation lookup fails
    #[tracing::instrument(skip_all)]
    pub async fn authenticate(&self, token: &str) -> Result<AccessClaims, AuthError> {
        let claims = self.signer.verify(token)?;

        if self.revocations.is_revoked(&claims.tid).await? {
            self.emit(
                AuditAction::RevokedTokenPresented,
                &claims.sub,
                format!("token:{}", claims.tid),
                AuditResult::Failure("token revoked".into()),
                &[("session_id", claims.sid.clone())],
            )
            .await;
            return Err(AuthError::TokenRevoked);
        }
        Ok(claims)
    }

    /// Exchanges credentials for a bearer token and a refresh secret.
    ///
    /// A locked account is rejected before the rate limit is charged or
    /// the credentials are looked at.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidCredentials`] for a wrong secret or unknown account
    /// - [`AuthError::AccountLocked`] while the account is in its cooldown
    /// - [`AuthError::RateLimited`] when the client exceeds the login quota
    /// - [`AuthError::DependencyUnavailable`] if the store or user store fails
    #[tracing::instrument(skip(self, account, secret), fields(account = tracing::field::Empty))]
    pub async fn login(
        &self,
        account: &str,
        secret: &str,
        client_id: &str,
    ) -> Result<TokenPair, AuthError> {
        let account = AccountKey::normalize(account)?;
        tracing::Span::current().record("account", account.as_str());
        let resource = format!("account:{account}");

        let status = self.lockout.is_locked(&account).await?;
        if status.locked {
            self.emit(
                AuditAction::LoginRejectedLocked,
                account.as_str(),
                resource,
                AuditResult::Failure("account locked".into()),
                &[("client_id", client_id.to_owned())],
            )
            .await;
            return Err(AuthError::AccountLocked { retry_after: status.retry_after });
        }

        let decision = self
            .rate_limiter
            .check(RateScope::Login, client_id, &self.config.rate_limits.login)
            .await?;
        if !decision.allowed {
            self.emit(
                AuditAction::RateLimited,
                client_id,
                RateScope::Login.scope_key(client_id),
                AuditResult::Failure("login quota exceeded".into()),
                &[("retry_after_ms", decision.retry_after.as_millis().to_string())],
            )
            .await;
            return Err(AuthError::RateLimited(decision));
        }

        let Some(principal) = self.users.verify_credentials(&account, secret).await? else {
            let state = self.lockout.record_failure(&account).await?;
            self.emit(
                AuditAction::LoginFailed,
                account.as_str(),
                resource.clone(),
                AuditResult::Failure("invalid credentials".into()),
                &[
                    ("client_id", client_id.to_owned()),
                    ("failure_count", state.failure_count.to_string()),
                ],
            )
            .await;
            if let Some(until) = state.locked_until
                && state.is_locked_at(self.clock.now())
            {
                self.emit(
                    AuditAction::AccountLocked,
                    account.as_str(),
                    resource,
                    AuditResult::Success,
                    &[("locked_until", until.to_rfc3339())],
                )
                .await;
            }
            return Err(AuthError::InvalidCredentials);
        };

        self.lockout.record_success(&account).await?;
        let refresh = self.ledger.issue(&principal.subject_id, &principal.role).await?;
        let access =
            self.signer.issue(&principal.subject_id, &refresh.session_id, &principal.role)?;

        self.emit(
            AuditAction::LoginSucceeded,
            account.as_str(),
            format!("session:{}", refresh.session_id),
            AuditResult::Success,
            &[
                ("client_id", client_id.to_owned()),
                ("subject_id", principal.subject_id.clone()),
                ("family_id", refresh.family_id.clone()),
            ],
        )
        .await;
        Ok(TokenPair { access, refresh })
    }

    /// Rotates a refresh secret and mints a bearer token for the successor
    /// session.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRefreshToken`] for an unknown or expired secret
    /// - [`AuthError::ReplayDetected`] for a rotated-away secret; the family
    ///   is revoked before this returns
    /// - [`AuthError::DependencyUnavailable`] if the store fails
    #[tracing::instrument(skip_all)]
    pub async fn refresh(&self, secret: &RefreshSecret) -> Result<TokenPair, AuthError> {
        let refresh = match self.ledger.rotate(secret).await {
            Ok(session) => session,
            Err(AuthError::ReplayDetected { family_id }) => {
                let resource = format!("family:{family_id}");
                self.emit(
                    AuditAction::RefreshReplayDetected,
                    &family_id,
                    resource.clone(),
                    AuditResult::Failure("rotated refresh secret presented".into()),
                    &[],
                )
                .await;
                self.emit(AuditAction::FamilyRevoked, &family_id, resource, AuditResult::Success, &[])
                    .await;
                return Err(AuthError::ReplayDetected { family_id });
            },
            Err(err) => return Err(err),
        };

        let access = self.signer.issue(&refresh.subject_id, &refresh.session_id, &refresh.role)?;
        self.emit(
            AuditAction::TokenRefreshed,
            &refresh.subject_id,
            format!("session:{}", refresh.session_id),
            AuditResult::Success,
            &[
                ("family_id", refresh.family_id.clone()),
                ("generation", refresh.generation.to_string()),
            ],
        )
        .await;
        Ok(TokenPair { access, refresh })
    }

    /// Revokes a bearer token by id and its refresh session.
    ///
    /// Without the token's claims the exact expiry is unknown, so the
    /// revocation entry lives for a full access-token lifetime. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn logout(&self, token_id: &str, session_id: &str) -> Result<(), AuthError> {
        let expires_at = add_duration(self.clock.now(), self.signer.ttl());
        self.end_session(token_id, session_id, expires_at, session_id).await
    }

    /// Revokes the token described by verified `claims` and its session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip_all, fields(token_id = %claims.tid, session_id = %claims.sid))]
    pub async fn logout_claims(&self, claims: &AccessClaims) -> Result<(), AuthError> {
        self.end_session(&claims.tid, &claims.sid, claims.expires_at(), &claims.sub).await
    }

    async fn end_session(
        &self,
        token_id: &str,
        session_id: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
        actor: &str,
    ) -> Result<(), AuthError> {
        self.revocations.revoke(token_id, expires_at).await?;
        self.ledger.revoke(session_id).await?;
        self.emit(
            AuditAction::Logout,
            actor,
            format!("session:{session_id}"),
            AuditResult::Success,
            &[("token_id", token_id.to_owned())],
        )
        .await;
        Ok(())
    }

    /// Charges one request against `scope` for `identity`.
    ///
    /// Use [`RateScope::Global`] with the client address for all traffic
    /// and [`RateScope::Authenticated`] with the `sub` claim after
    /// [`authenticate`](Self::authenticate).
    ///
    /// # Errors
    ///
    /// - [`AuthError::RateLimited`] carrying the decision when the quota is
    ///   exhausted
    /// - [`AuthError::DependencyUnavailable`] if the store fails and the
    ///   scope fails closed
    #[tracing::instrument(skip(self))]
    pub async fn rate_limit_check(
        &self,
        scope: RateScope,
        identity: &str,
    ) -> Result<RateLimitDecision, AuthError> {
        let decision =
            self.rate_limiter.check(scope, identity, self.config.rate_limits.rule(scope)).await?;
        if !decision.allowed {
            self.emit(
                AuditAction::RateLimited,
                identity,
                scope.scope_key(identity),
                AuditResult::Failure(format!("{scope} quota exceeded")),
                &[("retry_after_ms", decision.retry_after.as_millis().to_string())],
            )
            .await;
            return Err(AuthError::RateLimited(decision));
        }
        Ok(decision)
    }

    /// The token signer, for handing its verifier to other services.
    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    /// The refresh-token ledger.
    #[must_use]
    pub fn ledger(&self) -> &RefreshTokenLedger<TimeoutBackend<B>> {
        &self.ledger
    }

    /// The lockout tracker.
    #[must_use]
    pub fn lockout(&self) -> &LockoutTracker<TimeoutBackend<B>> {
        &self.lockout
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    async fn emit(
        &self,
        action: AuditAction,
        actor: &str,
        resource: String,
        result: AuditResult,
        metadata: &[(&str, String)],
    ) {
        let event = AuditEvent::builder()
            .timestamp(self.clock.now())
            .actor(actor)
            .action(action)
            .resource(resource)
            .result(result)
            .metadata(metadata.iter().map(|(k, v)| ((*k).to_owned(), v.clone())).collect())
            .build();
        self.audit.log(&event).await;
    }
}
