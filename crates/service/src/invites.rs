//! InviteLedger: issues and redeems invite tokens.
//!
//! WAITING -> USED (terminal) | EXPIRED (computed, `expires_at <= now`).
//! Tokens are 256-bit, handed out once and stored only as SHA-256 digests.

use std::sync::Arc;

use chrono::Duration;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::credentials::CredentialStore;
use crate::domain::{
    AuditAction, AuthContext, ClientInfo, Invite, InviteRedemption, InviteRequest, IssuedInvite, NewAuditEntry,
    NewInvite, NewUser, RedeemAccount, RedeemOutcome, RedeemTarget, SeatClaim, User,
};
use crate::errors::AccessError;
use crate::metrics;
use crate::ports::{digest, digest_matches, Clock, TokenGenerator};
use crate::repository::IdentityRepository;
use crate::retry::{retry_read, with_timeout};
use crate::tenant::TenantRegistry;

/// Longest invite lifetime accepted from callers.
pub const MAX_INVITE_HOURS: i64 = 24 * 30;

#[derive(Clone)]
pub struct InviteLedger {
    repo: Arc<dyn IdentityRepository>,
    tenants: TenantRegistry,
    credentials: CredentialStore,
    tokens: Arc<dyn TokenGenerator>,
    clock: Arc<dyn Clock>,
    cfg: IdentityConfig,
}

impl InviteLedger {
    pub fn new(
        repo: Arc<dyn IdentityRepository>,
        tenants: TenantRegistry,
        credentials: CredentialStore,
        tokens: Arc<dyn TokenGenerator>,
        clock: Arc<dyn Clock>,
        cfg: IdentityConfig,
    ) -> Self {
        Self { repo, tenants, credentials, tokens, clock, cfg }
    }

    /// Issue an invite into `company_id`. The returned token is the only copy.
    #[instrument(skip(self, actor, req, client), fields(actor = %actor.user_id, role = %req.role))]
    pub async fn issue(
        &self,
        actor: &AuthContext,
        company_id: Uuid,
        req: InviteRequest,
        client: &ClientInfo,
    ) -> Result<IssuedInvite, AccessError> {
        if actor.company_id != company_id || !actor.role.dominates(req.role) {
            return Err(AccessError::Forbidden);
        }
        models::user::validate_email(&req.email)?;
        let max_uses = req.max_uses.unwrap_or(1);
        if max_uses == 0 {
            return Err(AccessError::Validation("max_uses must be >= 1".into()));
        }
        let ttl = match req.expires_in_hours {
            Some(h) if !(1..=MAX_INVITE_HOURS).contains(&h) => {
                return Err(AccessError::Validation(format!("expires_in_hours must be within 1..={MAX_INVITE_HOURS}")))
            }
            Some(h) => Duration::hours(h),
            None => self.cfg.invite_default_ttl,
        };

        let now = self.clock.now();
        self.tenants.check_quota_for(company_id, req.role, max_uses, now).await?;

        let token = self.tokens.generate()?;
        let new_invite = NewInvite {
            id: Uuid::new_v4(),
            token_hash: digest(&token),
            email: models::user::normalize_email(&req.email),
            role: req.role,
            company_id,
            invited_by_id: actor.user_id,
            max_uses,
            expires_at: now + ttl,
            created_at: now,
        };
        let audit = NewAuditEntry::classified(AuditAction::InviteUser, "invite", now)
            .entity(new_invite.id)
            .by(Some(actor.user_id), Some(company_id))
            .new_data(json!({
                "email": new_invite.email,
                "role": new_invite.role,
                "max_uses": max_uses,
                "expires_at": new_invite.expires_at,
            }))
            .client(client);
        let seat = SeatClaim::quota(company_id, new_invite.role, max_uses, now);
        let invite = self.repo.insert_invite(new_invite, seat, audit).await?;
        metrics::INVITES_ISSUED_TOTAL.inc();
        info!(invite_id = %invite.id, company_id = %company_id, "invite_issued");
        Ok(IssuedInvite { invite, token })
    }

    /// Consume `token` for a new account or for the existing user the invite
    /// was addressed to. Bounded by the request timeout and never retried.
    #[instrument(skip(self, token, account, client))]
    pub async fn redeem(&self, token: &str, account: RedeemAccount, client: &ClientInfo) -> Result<User, AccessError> {
        with_timeout(self.cfg.request_timeout, self.redeem_inner(token, account, client)).await
    }

    async fn redeem_inner(&self, token: &str, account: RedeemAccount, client: &ClientInfo) -> Result<User, AccessError> {
        let hash = digest(token);
        let hash_ref = hash.as_str();
        let invite = retry_read(&self.cfg.retry, move || self.repo.find_invite_by_token_hash(hash_ref))
            .await?
            .filter(|i| digest_matches(&i.token_hash, hash_ref))
            .ok_or(AccessError::InviteNotFound)?;

        let now = self.clock.now();
        if invite.is_exhausted() {
            return Err(AccessError::InviteExhausted);
        }
        if invite.is_expired(now) {
            return Err(AccessError::InviteExpired);
        }
        self.tenants.resolve(invite.company_id).await?;

        let (target, seat, audit) = match account {
            RedeemAccount::NewAccount { name, password } => self.new_account(&invite, &name, &password, client).await?,
            RedeemAccount::ExistingUser { user_id } => self.attach(&invite, user_id, client).await?,
        };
        let outcome = self
            .repo
            .redeem_invite(InviteRedemption {
                invite_id: invite.id,
                single_use: invite.is_single_use(),
                target,
                seat,
                now,
                audit,
            })
            .await?;
        match outcome {
            RedeemOutcome::Redeemed(user) => {
                metrics::INVITES_REDEEMED_TOTAL.inc();
                info!(invite_id = %invite.id, user_id = %user.id, company_id = %invite.company_id, "invite_redeemed");
                Ok(user)
            }
            RedeemOutcome::Exhausted => Err(AccessError::InviteExhausted),
            RedeemOutcome::Expired => Err(AccessError::InviteExpired),
        }
    }

    async fn new_account(
        &self,
        invite: &Invite,
        name: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<(RedeemTarget, Option<SeatClaim>, NewAuditEntry), AccessError> {
        models::user::validate_name(name)?;
        let password_hash = self.credentials.hash_password(password)?;
        self.tenants.ensure_seat(invite.company_id, invite.role).await?;

        let now = self.clock.now();
        let user = NewUser {
            id: Uuid::new_v4(),
            company_id: invite.company_id,
            email: invite.email.clone(),
            name: name.trim().to_string(),
            password_hash,
            role: invite.role,
            created_at: now,
        };
        let audit = NewAuditEntry::classified(AuditAction::Create, "user", now)
            .entity(user.id)
            .by(Some(user.id), Some(invite.company_id))
            .new_data(json!({ "email": user.email, "role": user.role, "invite_id": invite.id }))
            .client(client);
        let seat = SeatClaim::redemption(invite.company_id, invite.role, now);
        Ok((RedeemTarget::Create(user), Some(seat), audit))
    }

    async fn attach(
        &self,
        invite: &Invite,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> Result<(RedeemTarget, Option<SeatClaim>, NewAuditEntry), AccessError> {
        let user = retry_read(&self.cfg.retry, move || self.repo.find_user(user_id))
            .await?
            .ok_or(AccessError::NotFound("user"))?;
        // only the addressee may take the invite
        if user.email != invite.email || user.company_id != invite.company_id || !user.can_authenticate() {
            return Err(AccessError::Forbidden);
        }
        let now = self.clock.now();
        let seat = if user.role.seat_class() != invite.role.seat_class() {
            self.tenants.ensure_seat(invite.company_id, invite.role).await?;
            Some(SeatClaim::redemption(invite.company_id, invite.role, now))
        } else {
            None
        };
        let audit = NewAuditEntry::classified(AuditAction::InviteUser, "user", now)
            .entity(user.id)
            .by(Some(user.id), Some(invite.company_id))
            .old(json!({ "role": user.role }))
            .new_data(json!({ "role": invite.role, "invite_id": invite.id }))
            .client(client);
        Ok((RedeemTarget::Attach { user_id: user.id, role: invite.role }, seat, audit))
    }

    /// Outstanding invites of `company_id`, oldest first. Administrators only.
    #[instrument(skip(self, actor))]
    pub async fn list_pending(&self, actor: &AuthContext, company_id: Uuid) -> Result<Vec<Invite>, AccessError> {
        if actor.company_id != company_id || !actor.role.can_administer() {
            return Err(AccessError::Forbidden);
        }
        let now = self.clock.now();
        retry_read(&self.cfg.retry, move || self.repo.list_pending_invites(company_id, now)).await
    }
}
