//! SessionManager: device sessions, signed access tokens and rotating
//! refresh tokens.
//!
//! Access tokens are HS256 JWTs bound to a session id; the digest of the most
//! recently issued one is cached on the session row, so a refresh retires the
//! previous access token. Refresh tokens are opaque and stored as digests.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::domain::{
    AuditAction, AuthContext, ClientInfo, IssuedSession, NewAuditEntry, NewSession, RevocationAudit, Role, Session,
    SessionRotation, SessionState, TokenPair, User,
};
use crate::errors::AccessError;
use crate::metrics;
use crate::ports::{digest, digest_matches, Clock, TokenGenerator};
use crate::repository::IdentityRepository;
use crate::retry::{retry_read, with_timeout};
use crate::tenant::TenantRegistry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub cid: Uuid,
    pub sid: Uuid,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Signs and checks access tokens. Expiry is judged against the injected
/// clock by the caller, not by the JWT library.
#[derive(Clone)]
pub struct AccessTokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl AccessTokenCodec {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn sign(&self, claims: &AccessClaims) -> Result<String, AccessError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| AccessError::Internal(format!("jwt: {e}")))
    }

    /// Signature and shape only; any failure is `SessionInvalid`.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AccessError> {
        decode::<AccessClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "access_token_rejected");
                AccessError::SessionInvalid
            })
    }
}

#[derive(Clone)]
pub struct SessionManager {
    repo: Arc<dyn IdentityRepository>,
    tenants: TenantRegistry,
    codec: AccessTokenCodec,
    tokens: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    cfg: IdentityConfig,
}

impl SessionManager {
    pub fn new(
        repo: Arc<dyn IdentityRepository>,
        tenants: TenantRegistry,
        tokens: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
        cfg: IdentityConfig,
    ) -> Self {
        let codec = AccessTokenCodec::new(&cfg.jwt_secret);
        Self { repo, tenants, codec, tokens, clock, cfg }
    }

    fn access_token(&self, user: &User, session_id: Uuid, now: DateTime<Utc>) -> Result<String, AccessError> {
        self.codec.sign(&AccessClaims {
            sub: user.id,
            cid: user.company_id,
            sid: session_id,
            role: user.role,
            iat: now.timestamp(),
            exp: (now + self.cfg.access_ttl).timestamp(),
            jti: Uuid::new_v4(),
        })
    }

    /// Open a session for an already verified user. Writes LOGIN with the
    /// session row.
    #[instrument(skip(self, user, client), fields(user_id = %user.id))]
    pub async fn create(&self, user: &User, client: &ClientInfo) -> Result<IssuedSession, AccessError> {
        let now = self.clock.now();
        let session_id = Uuid::new_v4();
        let refresh_token = self.tokens.generate()?;
        let access_token = self.access_token(user, session_id, now)?;

        let audit = NewAuditEntry::classified(AuditAction::Login, "session", now)
            .entity(session_id)
            .by(Some(user.id), Some(user.company_id))
            .new_data(json!({ "session_id": session_id }))
            .client(client);
        let session = self
            .repo
            .insert_session(
                NewSession {
                    id: session_id,
                    user_id: user.id,
                    refresh_token_hash: digest(&refresh_token),
                    access_token_hash: digest(&access_token),
                    user_agent: client.user_agent.clone(),
                    ip_address: client.ip_address.clone(),
                    expires_at: now + self.cfg.refresh_ttl,
                    created_at: now,
                },
                audit,
            )
            .await?;
        info!(session_id = %session.id, company_id = %user.company_id, "session_created");
        let tokens = TokenPair {
            access_token,
            refresh_token,
            access_expires_at: now + self.cfg.access_ttl,
            refresh_expires_at: session.expires_at,
        };
        Ok(IssuedSession { session, tokens })
    }

    /// Exchange a refresh token for a new pair. Every rejection is
    /// `SessionInvalid`; bounded by the request timeout.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AccessError> {
        with_timeout(self.cfg.request_timeout, self.refresh_inner(refresh_token)).await
    }

    async fn refresh_inner(&self, refresh_token: &str) -> Result<TokenPair, AccessError> {
        let hash = digest(refresh_token);
        let hash_ref = hash.as_str();
        let session = retry_read(&self.cfg.retry, move || self.repo.find_session_by_refresh_hash(hash_ref))
            .await?
            .filter(|s| digest_matches(&s.refresh_token_hash, hash_ref))
            .ok_or(AccessError::SessionInvalid)?;

        let now = self.clock.now();
        match session.state(now) {
            SessionState::Active => {}
            SessionState::Expired => {
                if session.is_valid {
                    self.repo.mark_session_expired(session.id, now).await?;
                }
                return Err(AccessError::SessionInvalid);
            }
            SessionState::Revoked => return Err(AccessError::SessionInvalid),
        }
        let user = self.live_owner(&session).await?;

        let access_token = self.access_token(&user, session.id, now)?;
        let rotated = if self.cfg.rotate_refresh_tokens { Some(self.tokens.generate()?) } else { None };
        let swapped = self
            .repo
            .rotate_session(SessionRotation {
                session_id: session.id,
                expected_refresh_hash: hash.clone(),
                new_refresh_hash: rotated.as_deref().map(digest),
                access_token_hash: digest(&access_token),
                now,
            })
            .await?;
        if !swapped {
            // another refresh won the compare-and-set
            return Err(AccessError::SessionInvalid);
        }
        debug!(session_id = %session.id, rotated = rotated.is_some(), "session_refreshed");
        Ok(TokenPair {
            access_token,
            refresh_token: rotated.unwrap_or_else(|| refresh_token.to_string()),
            access_expires_at: now + self.cfg.access_ttl,
            refresh_expires_at: session.expires_at,
        })
    }

    /// Resolve a bearer access token into the caller's context. The role is
    /// read from the current user row, not from the token.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthContext, AccessError> {
        let claims = self.codec.verify(access_token)?;
        let now = self.clock.now();
        if claims.exp <= now.timestamp() {
            return Err(AccessError::SessionInvalid);
        }
        let sid = claims.sid;
        let session = retry_read(&self.cfg.retry, move || self.repo.find_session(sid))
            .await?
            .filter(|s| s.user_id == claims.sub && s.is_effectively_valid(now))
            .ok_or(AccessError::SessionInvalid)?;
        let presented = digest(access_token);
        match session.access_token_hash.as_deref() {
            Some(cached) if digest_matches(cached, &presented) => {}
            _ => return Err(AccessError::SessionInvalid),
        }
        let user = self.live_owner(&session).await?;
        if user.company_id != claims.cid {
            return Err(AccessError::SessionInvalid);
        }
        Ok(AuthContext { user_id: user.id, company_id: user.company_id, role: user.role, session_id: session.id })
    }

    /// Owner of `session`, provided both it and its tenant can still sign in.
    async fn live_owner(&self, session: &Session) -> Result<User, AccessError> {
        let owner_id = session.user_id;
        let user = retry_read(&self.cfg.retry, move || self.repo.find_user(owner_id))
            .await?
            .filter(User::can_authenticate)
            .ok_or(AccessError::SessionInvalid)?;
        match self.tenants.resolve(user.company_id).await {
            Ok(_) => Ok(user),
            Err(AccessError::TenantNotFound) => Err(AccessError::SessionInvalid),
            Err(e) => Err(e),
        }
    }

    pub async fn find(&self, session_id: Uuid) -> Result<Option<Session>, AccessError> {
        retry_read(&self.cfg.retry, move || self.repo.find_session(session_id)).await
    }

    /// Revoke one session. `false` when it was already invalid; LOGOUT is
    /// written only when a row changed.
    #[instrument(skip(self, session, client), fields(session_id = %session.id))]
    pub async fn revoke(
        &self,
        session: &Session,
        company_id: Uuid,
        reason: &str,
        actor_id: Option<Uuid>,
        client: &ClientInfo,
    ) -> Result<bool, AccessError> {
        let now = self.clock.now();
        let audit = RevocationAudit { reason: reason.to_string(), actor_id, company_id, client: client.clone(), now }
            .entry_for(session.id, session.user_id);
        let changed = self.repo.revoke_session(session.id, reason, now, audit).await?;
        if changed {
            metrics::SESSIONS_REVOKED_TOTAL.inc();
            info!(user_id = %session.user_id, reason, "session_revoked");
        }
        Ok(changed)
    }

    /// Revoke every valid session of `user`, one LOGOUT entry each.
    #[instrument(skip(self, user, client), fields(user_id = %user.id))]
    pub async fn revoke_all(
        &self,
        user: &User,
        reason: &str,
        actor_id: Option<Uuid>,
        client: &ClientInfo,
    ) -> Result<Vec<Uuid>, AccessError> {
        let now = self.clock.now();
        let revocation = RevocationAudit {
            reason: reason.to_string(),
            actor_id,
            company_id: user.company_id,
            client: client.clone(),
            now,
        };
        let revoked = self.repo.revoke_user_sessions(user.id, now, revocation).await?;
        metrics::SESSIONS_REVOKED_TOTAL.inc_by(revoked.len() as u64);
        info!(count = revoked.len(), reason, "sessions_revoked");
        Ok(revoked)
    }

    pub async fn list_active(&self, user_id: Uuid) -> Result<Vec<Session>, AccessError> {
        let now = self.clock.now();
        retry_read(&self.cfg.retry, move || self.repo.list_active_sessions(user_id, now)).await
    }

    /// Flag sessions past `expires_at` as invalid. Returns how many changed.
    pub async fn sweep_expired(&self) -> Result<u64, AccessError> {
        let swept = self.repo.sweep_expired_sessions(self.clock.now()).await?;
        if swept > 0 {
            info!(swept, "expired_sessions_swept");
        }
        Ok(swept)
    }
}
