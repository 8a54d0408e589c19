//! Refresh-token ledger with rotation and replay detection.
//!
//! Every login starts a *family*: a head record plus one session record per
//! refresh secret ever handed out for that login. Exactly one session in a
//! family is current; the head names it.
//!
//! ```text
//! refresh/families/{fid}              head: generation, current_session_id, revoked_at
//! refresh/sessions/{sid}              record: subject, role, token_hash, revoked_at
//! refresh/secrets/{sha256(secret)}    -> sid
//! refresh/family-index/{fid}/{sid}    secondary index for family fan-out
//! ```
//!
//! Rotation compare-and-sets the old session record *and* the family head in
//! one transaction while inserting the successor, so two concurrent rotations
//! of the same secret cannot both commit. The loser re-reads, finds the
//! secret rotated away and is handled as a replay: presenting any
//! non-current secret revokes the whole family.
//!
//! Only SHA-256 hashes of secrets are stored.

use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use warden_storage::{
    CasRetryConfig, Clock, StorageBackend, StorageError, StorageResult, Transaction,
    clock::{add_duration, duration_until},
    types::prefix_range,
    with_cas_retry,
};
use zeroize::Zeroizing;

use crate::{
    error::AuthError,
    ids::{new_family_id, new_session_id},
    keys,
};

/// Raw refresh secret as handed to, and presented by, the client.
///
/// 32 random bytes, base64url without padding. `Debug` never prints the
/// value and the memory is zeroized on drop.
#[derive(Clone)]
pub struct RefreshSecret(Zeroizing<String>);

impl RefreshSecret {
    fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; 32]);
        OsRng.fill_bytes(&mut *bytes);
        Self(Zeroizing::new(URL_SAFE_NO_PAD.encode(&*bytes)))
    }

    /// Wraps a secret presented by a client.
    #[must_use]
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(Zeroizing::new(raw.into()))
    }

    /// The raw secret, for placing in a response.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// One-way hash under which the secret is indexed.
    #[must_use]
    pub fn hash(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret([REDACTED])")
    }
}

/// Persisted refresh session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRecord {
    /// Session id.
    pub session_id: String,
    /// Principal the session belongs to.
    pub subject_id: String,
    /// Role carried into bearer tokens minted from this session.
    pub role: String,
    /// SHA-256 of the raw secret, base64url.
    pub token_hash: String,
    /// Family the session belongs to.
    pub family_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Set once the session is rotated away or revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Head record of a session family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyRecord {
    /// Family id.
    pub family_id: String,
    /// Principal the family belongs to.
    pub subject_id: String,
    /// Number of rotations so far.
    pub generation: u64,
    /// The only session in the family that may be rotated.
    pub current_session_id: String,
    /// Creation time (the original login).
    pub created_at: DateTime<Utc>,
    /// Expiry of the newest session.
    pub expires_at: DateTime<Utc>,
    /// Set once the family is revoked.
    pub revoked_at: Option<DateTime<Utc>>,
}

/// A live refresh session and its raw secret.
#[derive(Debug, Clone)]
pub struct RefreshSession {
    /// Session id (the `sid` claim).
    pub session_id: String,
    /// Family id.
    pub family_id: String,
    /// Principal.
    pub subject_id: String,
    /// Principal role.
    pub role: String,
    /// Raw secret to return to the client.
    pub secret: RefreshSecret,
    /// Expiry time.
    pub expires_at: DateTime<Utc>,
    /// Rotation count within the family; zero for a fresh login.
    pub generation: u64,
}

enum RotateOutcome {
    Rotated(RefreshSession),
    Invalid,
    Replayed { family_id: String, session_id: String },
}

/// Store-backed refresh-token ledger.
#[derive(Debug, Clone)]
pub struct RefreshTokenLedger<B> {
    backend: B,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cas_retry: CasRetryConfig,
}

impl<B: StorageBackend> RefreshTokenLedger<B> {
    /// Creates a ledger over `backend` issuing sessions that live for `ttl`.
    pub fn new(
        backend: B,
        clock: Arc<dyn Clock>,
        ttl: Duration,
        cas_retry: CasRetryConfig,
    ) -> Self {
        Self { backend, clock, ttl, cas_retry }
    }

    /// Starts a new family for `subject_id` and returns its first session.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip(self, role))]
    pub async fn issue(&self, subject_id: &str, role: &str) -> Result<RefreshSession, AuthError> {
        let now = self.clock.now();
        let expires_at = add_duration(now, self.ttl);
        let secret = RefreshSecret::generate();
        let session_id = new_session_id();
        let family_id = new_family_id();

        let record = RefreshRecord {
            session_id: session_id.clone(),
            subject_id: subject_id.to_owned(),
            role: role.to_owned(),
            token_hash: secret.hash(),
            family_id: family_id.clone(),
            created_at: now,
            expires_at,
            revoked_at: None,
        };
        let head = FamilyRecord {
            family_id: family_id.clone(),
            subject_id: subject_id.to_owned(),
            generation: 0,
            current_session_id: session_id.clone(),
            created_at: now,
            expires_at,
            revoked_at: None,
        };

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set_with_ttl(keys::family(&family_id), None, encode(&head)?, self.ttl)?;
        Self::buffer_session(txn.as_mut(), &record, self.ttl)?;
        txn.commit().await?;

        tracing::debug!(session_id = %session_id, family_id = %family_id, "refresh session issued");
        Ok(RefreshSession {
            session_id,
            family_id,
            subject_id: record.subject_id,
            role: record.role,
            secret,
            expires_at,
            generation: 0,
        })
    }

    fn buffer_session(
        txn: &mut dyn Transaction,
        record: &RefreshRecord,
        ttl: Duration,
    ) -> StorageResult<()> {
        txn.set_with_ttl(keys::session(&record.session_id), encode(record)?, ttl);
        txn.set_with_ttl(
            keys::secret(&record.token_hash),
            record.session_id.clone().into_bytes(),
            ttl,
        );
        txn.set_with_ttl(
            keys::family_index(&record.family_id, &record.session_id),
            Vec::new(),
            ttl,
        );
        Ok(())
    }

    /// Exchanges `secret` for a successor in the same family.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRefreshToken`] if the secret is unknown or expired
    /// - [`AuthError::ReplayDetected`] if the secret was already rotated away
    ///   or revoked; the whole family is revoked before returning
    /// - [`AuthError::DependencyUnavailable`] if the store fails
    #[tracing::instrument(skip_all)]
    pub async fn rotate(&self, secret: &RefreshSecret) -> Result<RefreshSession, AuthError> {
        let hash = secret.hash();
        let outcome =
            with_cas_retry(&self.cas_retry, "refresh_rotate", || self.try_rotate(&hash)).await?;

        match outcome {
            RotateOutcome::Rotated(session) => {
                tracing::debug!(
                    session_id = %session.session_id,
                    family_id = %session.family_id,
                    generation = session.generation,
                    "refresh session rotated"
                );
                Ok(session)
            },
            RotateOutcome::Invalid => Err(AuthError::InvalidRefreshToken),
            RotateOutcome::Replayed { family_id, session_id } => {
                tracing::error!(
                    family_id = %family_id,
                    session_id = %session_id,
                    "refresh token replay detected, revoking family"
                );
                self.revoke_family(&family_id).await?;
                Err(AuthError::ReplayDetected { family_id })
            },
        }
    }

    async fn try_rotate(&self, hash: &str) -> StorageResult<RotateOutcome> {
        let now = self.clock.now();

        let Some(session_id) = self.backend.get(&keys::secret(hash)).await? else {
            return Ok(RotateOutcome::Invalid);
        };
        let session_id = String::from_utf8(session_id.to_vec())
            .map_err(|_| StorageError::serialization("secret index holds a non-UTF-8 session id"))?;

        let Some(record_bytes) = self.backend.get(&keys::session(&session_id)).await? else {
            return Ok(RotateOutcome::Invalid);
        };
        let record: RefreshRecord = serde_json::from_slice(&record_bytes)?;
        if record.token_hash != hash || record.expires_at <= now {
            return Ok(RotateOutcome::Invalid);
        }

        let Some(head_bytes) = self.backend.get(&keys::family(&record.family_id)).await? else {
            return Ok(RotateOutcome::Invalid);
        };
        let head: FamilyRecord = serde_json::from_slice(&head_bytes)?;

        if record.revoked_at.is_some()
            || head.revoked_at.is_some()
            || head.current_session_id != record.session_id
        {
            return Ok(RotateOutcome::Replayed {
                family_id: record.family_id,
                session_id: record.session_id,
            });
        }

        let secret = RefreshSecret::generate();
        let expires_at = add_duration(now, self.ttl);
        let successor = RefreshRecord {
            session_id: new_session_id(),
            subject_id: record.subject_id.clone(),
            role: record.role.clone(),
            token_hash: secret.hash(),
            family_id: record.family_id.clone(),
            created_at: now,
            expires_at,
            revoked_at: None,
        };
        let new_head = FamilyRecord {
            generation: head.generation + 1,
            current_session_id: successor.session_id.clone(),
            expires_at: expires_at.max(head.expires_at),
            ..head
        };
        let retired = RefreshRecord { revoked_at: Some(now), ..record };

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set_with_ttl(
            keys::session(&retired.session_id),
            Some(record_bytes.to_vec()),
            encode(&retired)?,
            duration_until(now, retired.expires_at),
        )?;
        txn.compare_and_set_with_ttl(
            keys::family(&new_head.family_id),
            Some(head_bytes.to_vec()),
            encode(&new_head)?,
            duration_until(now, new_head.expires_at),
        )?;
        Self::buffer_session(txn.as_mut(), &successor, self.ttl)?;
        txn.commit().await?;

        Ok(RotateOutcome::Rotated(RefreshSession {
            session_id: successor.session_id,
            family_id: successor.family_id,
            subject_id: successor.subject_id,
            role: successor.role,
            secret,
            expires_at,
            generation: new_head.generation,
        }))
    }

    /// Revokes one session. Idempotent; unknown sessions are ignored.
    ///
    /// When the session is its family's current session the family is
    /// closed too, since no live successor can exist.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn revoke(&self, session_id: &str) -> Result<(), AuthError> {
        let Some(record) = self.mark_revoked(session_id).await? else {
            return Ok(());
        };

        if let Some(head) = self.family(&record.family_id).await?
            && head.current_session_id == session_id
            && head.revoked_at.is_none()
        {
            self.close_family(&record.family_id).await?;
        }
        Ok(())
    }

    /// Revokes every session in `family_id` and closes the family.
    ///
    /// Returns the number of sessions newly marked revoked. Runs in time
    /// proportional to the family size via the family index.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    #[tracing::instrument(skip(self))]
    pub async fn revoke_family(&self, family_id: &str) -> Result<usize, AuthError> {
        self.close_family(family_id).await?;

        let prefix = keys::family_index_prefix(family_id);
        let members = self.backend.get_range(prefix_range(&prefix)).await?;

        let mut revoked = 0;
        for entry in members {
            let Some(session_id) = entry.key.strip_prefix(prefix.as_slice()) else {
                continue;
            };
            let session_id = String::from_utf8_lossy(session_id);
            if self.mark_revoked(&session_id).await?.is_some() {
                revoked += 1;
            }
        }

        tracing::warn!(family_id, sessions_revoked = revoked, "session family revoked");
        Ok(revoked)
    }

    /// Marks the family head revoked so no member can rotate again.
    async fn close_family(&self, family_id: &str) -> Result<(), AuthError> {
        let key = keys::family(family_id);
        with_cas_retry(&self.cas_retry, "refresh_close_family", || self.try_close_family(&key))
            .await?;
        Ok(())
    }

    async fn try_close_family(&self, key: &[u8]) -> StorageResult<()> {
        let now = self.clock.now();
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(());
        };
        let head: FamilyRecord = serde_json::from_slice(&bytes)?;
        if head.revoked_at.is_some() {
            return Ok(());
        }
        let ttl = duration_until(now, head.expires_at);
        let closed = FamilyRecord { revoked_at: Some(now), ..head };
        self.backend.compare_and_set_with_ttl(key, Some(&bytes[..]), encode(&closed)?, ttl).await
    }

    /// Sets `revoked_at` on one session record, returning it if this call
    /// revoked it.
    async fn mark_revoked(&self, session_id: &str) -> Result<Option<RefreshRecord>, AuthError> {
        let key = keys::session(session_id);
        let revoked =
            with_cas_retry(&self.cas_retry, "refresh_revoke_session", || self.try_mark_revoked(&key))
                .await?;
        Ok(revoked)
    }

    async fn try_mark_revoked(&self, key: &[u8]) -> StorageResult<Option<RefreshRecord>> {
        let now = self.clock.now();
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        let record: RefreshRecord = serde_json::from_slice(&bytes)?;
        if record.revoked_at.is_some() {
            return Ok(None);
        }
        let ttl = duration_until(now, record.expires_at);
        let revoked = RefreshRecord { revoked_at: Some(now), ..record };
        self.backend.compare_and_set_with_ttl(key, Some(&bytes[..]), encode(&revoked)?, ttl).await?;
        Ok(Some(revoked))
    }

    /// Reads a session record.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    pub async fn session(&self, session_id: &str) -> Result<Option<RefreshRecord>, AuthError> {
        Ok(read(&self.backend, &keys::session(session_id)).await?)
    }

    /// Reads a family head.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::DependencyUnavailable`] if the store fails.
    pub async fn family(&self, family_id: &str) -> Result<Option<FamilyRecord>, AuthError> {
        Ok(read(&self.backend, &keys::family(family_id)).await?)
    }
}

fn encode<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

async fn read<B, T>(backend: &B, key: &[u8]) -> StorageResult<Option<T>>
where
    B: StorageBackend,
    T: for<'de> Deserialize<'de>,
{
    match backend.get(key).await? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use warden_storage::{ManualClock, MemoryBackend};

    use super::*;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    fn ledger() -> (RefreshTokenLedger<MemoryBackend>, ManualClock) {
        let clock = ManualClock::default();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());
        let backend = MemoryBackend::with_clock(Arc::clone(&shared));
        (RefreshTokenLedger::new(backend, shared, WEEK, CasRetryConfig::default()), clock)
    }

    #[test]
    fn test_secret_is_redacted_and_hashed() {
        let secret = RefreshSecret::generate();
        assert_eq!(secret.expose().len(), 43);
        assert_eq!(format!("{secret:?}"), "RefreshSecret([REDACTED])");
        assert_ne!(secret.hash(), secret.expose());
        assert_eq!(secret.hash(), RefreshSecret::from_raw(secret.expose()).hash());
    }

    #[tokio::test]
    async fn test_issue_stores_only_hash() {
        let (ledger, _clock) = ledger();
        let session = ledger.issue("user-1", "member").await.unwrap();

        let record = ledger.session(&session.session_id).await.unwrap().unwrap();
        assert_eq!(record.token_hash, session.secret.hash());
        assert_eq!(record.role, "member");
        assert!(record.revoked_at.is_none());

        let head = ledger.family(&session.family_id).await.unwrap().unwrap();
        assert_eq!(head.current_session_id, session.session_id);
        assert_eq!(head.generation, 0);
    }

    #[tokio::test]
    async fn test_rotation_chain() {
        let (ledger, _clock) = ledger();
        let first = ledger.issue("user-1", "member").await.unwrap();

        let second = ledger.rotate(&first.secret).await.unwrap();
        assert_eq!(second.family_id, first.family_id);
        assert_ne!(second.session_id, first.session_id);
        assert_eq!(second.generation, 1);
        assert_eq!(second.role, "member");

        let third = ledger.rotate(&second.secret).await.unwrap();
        assert_eq!(third.generation, 2);

        let old = ledger.session(&first.session_id).await.unwrap().unwrap();
        assert!(old.revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_replay_revokes_whole_family() {
        let (ledger, _clock) = ledger();
        let first = ledger.issue("user-1", "member").await.unwrap();
        let second = ledger.rotate(&first.secret).await.unwrap();

        let replay = ledger.rotate(&first.secret).await;
        assert!(matches!(replay, Err(AuthError::ReplayDetected { ref family_id }) if *family_id == first.family_id));

        let current = ledger.session(&second.session_id).await.unwrap().unwrap();
        assert!(current.revoked_at.is_some());
        assert!(matches!(ledger.rotate(&second.secret).await, Err(AuthError::ReplayDetected { .. })));
        assert!(ledger.family(&first.family_id).await.unwrap().unwrap().revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_secret_invalid() {
        let (ledger, _clock) = ledger();
        let result = ledger.rotate(&RefreshSecret::from_raw("not-a-secret")).await;
        assert!(matches!(result, Err(AuthError::InvalidRefreshToken)));
    }

    #[tokio::test]
    async fn test_expired_session_invalid() {
        let (ledger, clock) = ledger();
        let session = ledger.issue("user-1", "member").await.unwrap();

        clock.advance(WEEK);
        assert!(matches!(ledger.rotate(&session.secret).await, Err(AuthError::InvalidRefreshToken)));
    }

    #[tokio::test]
    async fn test_families_are_independent() {
        let (ledger, _clock) = ledger();
        let a = ledger.issue("user-1", "member").await.unwrap();
        let b = ledger.issue("user-1", "member").await.unwrap();

        ledger.rotate(&a.secret).await.unwrap();
        let _ = ledger.rotate(&a.secret).await;

        assert!(ledger.rotate(&b.secret).await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_current_session_closes_family() {
        let (ledger, _clock) = ledger();
        let session = ledger.issue("user-1", "member").await.unwrap();

        ledger.revoke(&session.session_id).await.unwrap();
        ledger.revoke(&session.session_id).await.unwrap();
        ledger.revoke("no-such-session").await.unwrap();

        let head = ledger.family(&session.family_id).await.unwrap().unwrap();
        assert!(head.revoked_at.is_some());
        assert!(ledger.rotate(&session.secret).await.is_err());
    }

    #[tokio::test]
    async fn test_revoke_family_counts_members() {
        let (ledger, _clock) = ledger();
        let first = ledger.issue("user-1", "member").await.unwrap();
        let second = ledger.rotate(&first.secret).await.unwrap();
        let _third = ledger.rotate(&second.secret).await.unwrap();

        // Two members were already rotated away; only the current one is new.
        assert_eq!(ledger.revoke_family(&first.family_id).await.unwrap(), 1);
        assert_eq!(ledger.revoke_family(&first.family_id).await.unwrap(), 0);
    }
}
