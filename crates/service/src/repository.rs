use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AuditCursor, AuditFilter, AuditLog, AuditSubject, Company, DeactivationOutcome, Invite, InviteRedemption,
    LoginFailure, NewAuditEntry, NewInvite, NewSession, NewUser, RedeemOutcome, RevocationAudit, Role, SeatClaim,
    SeatClass, Session, SessionRotation, User,
};
use crate::errors::RepoError;

pub mod mock;
pub mod seaorm;

/// Transactional store behind the identity core.
///
/// Every method taking a [`NewAuditEntry`] (or a [`RevocationAudit`]) writes
/// the mutation and its audit rows in one unit of work. Conditional updates
/// return `false` (or an `Exhausted` outcome) when the guard no longer holds.
/// A [`SeatClaim`] is re-counted inside the same unit of work, serialized per
/// company, and fails with [`RepoError::SeatsExhausted`] before anything is
/// written. Accessors never return soft-deleted rows.
#[async_trait]
pub trait IdentityRepository: Send + Sync {
    // companies & seats
    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, RepoError>;
    async fn count_active_users(&self, company_id: Uuid, class: SeatClass) -> Result<u64, RepoError>;
    async fn count_reserved_seats(&self, company_id: Uuid, class: SeatClass, now: DateTime<Utc>) -> Result<u64, RepoError>;

    // users
    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_user_in_company(&self, company_id: Uuid, user_id: Uuid) -> Result<Option<User>, RepoError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError>;
    async fn insert_user(&self, user: NewUser, seat: SeatClaim, audit: NewAuditEntry) -> Result<User, RepoError>;
    async fn record_login_failure(&self, failure: LoginFailure) -> Result<bool, RepoError>;
    async fn record_login_success(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>, RepoError>;
    async fn update_role(
        &self,
        user_id: Uuid,
        expected: Role,
        role: Role,
        now: DateTime<Utc>,
        seat: Option<SeatClaim>,
        audit: NewAuditEntry,
    ) -> Result<bool, RepoError>;
    async fn deactivate_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
        revocation: RevocationAudit,
    ) -> Result<DeactivationOutcome, RepoError>;

    // invites
    async fn insert_invite(&self, invite: NewInvite, seat: SeatClaim, audit: NewAuditEntry) -> Result<Invite, RepoError>;
    async fn find_invite_by_token_hash(&self, token_hash: &str) -> Result<Option<Invite>, RepoError>;
    async fn list_pending_invites(&self, company_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Invite>, RepoError>;
    async fn redeem_invite(&self, redemption: InviteRedemption) -> Result<RedeemOutcome, RepoError>;

    // sessions
    async fn insert_session(&self, session: NewSession, audit: NewAuditEntry) -> Result<Session, RepoError>;
    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, RepoError>;
    async fn find_session_by_refresh_hash(&self, refresh_hash: &str) -> Result<Option<Session>, RepoError>;
    async fn rotate_session(&self, rotation: SessionRotation) -> Result<bool, RepoError>;
    async fn mark_session_expired(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError>;
    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool, RepoError>;
    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        revocation: RevocationAudit,
    ) -> Result<Vec<Uuid>, RepoError>;
    async fn list_active_sessions(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, RepoError>;
    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepoError>;

    // audit
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLog, RepoError>;
    async fn audit_page(
        &self,
        company_id: Uuid,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: u64,
    ) -> Result<Vec<AuditLog>, RepoError>;

    // support-workflow subjects
    async fn subject_company(&self, subject: AuditSubject) -> Result<Option<Uuid>, RepoError>;
}
