//! AccessGate: the composition root every caller goes through.
//!
//! Builds the components over one repository and one set of ports, checks
//! caller context and scopes every target to the caller's company.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::audit::{AuditRecorder, AuditTrail};
use crate::config::IdentityConfig;
use crate::credentials::CredentialStore;
use crate::domain::{
    AuditAction, AuditFilter, AuditLog, AuditSubject, AuthContext, ClientInfo, CreateUserInput, Invite,
    InviteRequest, IssuedInvite, IssuedSession, NewAuditEntry, RedeemAccount, Role, Session, TokenPair, User,
};
use crate::errors::AccessError;
use crate::invites::InviteLedger;
use crate::metrics;
use crate::pagination::Page;
use crate::ports::{Clock, Ports};
use crate::repository::IdentityRepository;
use crate::retry::{retry_read, with_timeout};
use crate::sessions::SessionManager;
use crate::tenant::TenantRegistry;

#[derive(Clone)]
pub struct AccessGate {
    repo: Arc<dyn IdentityRepository>,
    tenants: TenantRegistry,
    credentials: CredentialStore,
    invites: InviteLedger,
    sessions: SessionManager,
    audit: AuditRecorder,
    clock: Arc<dyn Clock>,
    cfg: IdentityConfig,
}

impl AccessGate {
    pub fn new(repo: Arc<dyn IdentityRepository>, ports: Ports, cfg: IdentityConfig) -> Self {
        let tenants = TenantRegistry::new(repo.clone(), cfg.retry.clone());
        let credentials = CredentialStore::new(
            repo.clone(),
            tenants.clone(),
            ports.hasher.clone(),
            ports.clock.clone(),
            cfg.clone(),
        );
        let invites = InviteLedger::new(
            repo.clone(),
            tenants.clone(),
            credentials.clone(),
            ports.tokens.clone(),
            ports.clock.clone(),
            cfg.clone(),
        );
        let sessions =
            SessionManager::new(repo.clone(), tenants.clone(), ports.tokens.clone(), ports.clock.clone(), cfg.clone());
        let audit = AuditRecorder::new(repo.clone(), cfg.retry.clone());
        Self { repo, tenants, credentials, invites, sessions, audit, clock: ports.clock, cfg }
    }

    pub fn tenants(&self) -> &TenantRegistry {
        &self.tenants
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn invites(&self) -> &InviteLedger {
        &self.invites
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn audit(&self) -> &AuditRecorder {
        &self.audit
    }

    // ---- sessions ----

    /// Verify credentials and open a session.
    #[instrument(skip(self, email, password, client))]
    pub async fn login(&self, email: &str, password: &str, client: &ClientInfo) -> Result<IssuedSession, AccessError> {
        let user = with_timeout(
            self.cfg.request_timeout,
            self.credentials.verify_credentials(email, password, client),
        )
        .await?;
        let issued = self.sessions.create(&user, client).await?;
        metrics::LOGIN_SUCCESS_TOTAL.inc();
        info!(user_id = %user.id, company_id = %user.company_id, session_id = %issued.session.id, "login_succeeded");
        Ok(issued)
    }

    pub async fn authenticate(&self, access_token: &str) -> Result<AuthContext, AccessError> {
        self.sessions.authenticate(access_token).await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AccessError> {
        self.sessions.refresh(refresh_token).await
    }

    /// Revoke the caller's current session.
    #[instrument(skip(self, ctx, client), fields(user_id = %ctx.user_id))]
    pub async fn logout(&self, ctx: &AuthContext, client: &ClientInfo) -> Result<bool, AccessError> {
        let session = self.sessions.find(ctx.session_id).await?.ok_or(AccessError::SessionInvalid)?;
        self.sessions.revoke(&session, ctx.company_id, "logout", Some(ctx.user_id), client).await
    }

    /// Revoke one session: the caller's own, or one belonging to a user of
    /// the same company the caller administers.
    #[instrument(skip(self, ctx, client), fields(user_id = %ctx.user_id))]
    pub async fn revoke_session(
        &self,
        ctx: &AuthContext,
        session_id: Uuid,
        client: &ClientInfo,
    ) -> Result<bool, AccessError> {
        let session = self.sessions.find(session_id).await?.ok_or(AccessError::NotFound("session"))?;
        if session.user_id != ctx.user_id {
            let owner = match self.credentials.user_in_company(ctx.company_id, session.user_id).await {
                Ok(owner) => owner,
                Err(AccessError::NotFound(_)) => return Err(AccessError::NotFound("session")),
                Err(e) => return Err(e),
            };
            if !ctx.role.can_administer() || !ctx.role.dominates(owner.role) {
                return Err(AccessError::Forbidden);
            }
        }
        self.sessions.revoke(&session, ctx.company_id, "revoked", Some(ctx.user_id), client).await
    }

    /// Revoke every session of the caller, the current one included.
    #[instrument(skip(self, ctx, client), fields(user_id = %ctx.user_id))]
    pub async fn logout_everywhere(&self, ctx: &AuthContext, client: &ClientInfo) -> Result<Vec<Uuid>, AccessError> {
        let user = self.credentials.user_in_company(ctx.company_id, ctx.user_id).await?;
        self.sessions.revoke_all(&user, "logout_all", Some(ctx.user_id), client).await
    }

    pub async fn list_sessions(&self, ctx: &AuthContext) -> Result<Vec<Session>, AccessError> {
        self.sessions.list_active(ctx.user_id).await
    }

    pub async fn sweep_expired(&self) -> Result<u64, AccessError> {
        self.sessions.sweep_expired().await
    }

    // ---- invites ----

    pub async fn issue_invite(
        &self,
        ctx: &AuthContext,
        req: InviteRequest,
        client: &ClientInfo,
    ) -> Result<IssuedInvite, AccessError> {
        self.invites.issue(ctx, ctx.company_id, req, client).await
    }

    /// Redeem for a brand-new account (unauthenticated).
    pub async fn redeem_invite(
        &self,
        token: &str,
        name: String,
        password: String,
        client: &ClientInfo,
    ) -> Result<User, AccessError> {
        self.invites.redeem(token, RedeemAccount::NewAccount { name, password }, client).await
    }

    /// Redeem as the authenticated caller.
    pub async fn accept_invite(&self, ctx: &AuthContext, token: &str, client: &ClientInfo) -> Result<User, AccessError> {
        self.invites.redeem(token, RedeemAccount::ExistingUser { user_id: ctx.user_id }, client).await
    }

    pub async fn pending_invites(&self, ctx: &AuthContext) -> Result<Vec<Invite>, AccessError> {
        self.invites.list_pending(ctx, ctx.company_id).await
    }

    // ---- users ----

    pub async fn create_user(
        &self,
        ctx: &AuthContext,
        input: CreateUserInput,
        client: &ClientInfo,
    ) -> Result<User, AccessError> {
        self.credentials.create_user(ctx, input, client).await
    }

    pub async fn set_role(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
        role: Role,
        client: &ClientInfo,
    ) -> Result<User, AccessError> {
        self.credentials.set_role(ctx, user_id, role, client).await
    }

    /// Returns the ids of the sessions revoked along with the user.
    pub async fn deactivate_user(
        &self,
        ctx: &AuthContext,
        user_id: Uuid,
        client: &ClientInfo,
    ) -> Result<Vec<Uuid>, AccessError> {
        self.credentials.deactivate(ctx, user_id, client).await
    }

    // ---- audit ----

    pub fn audit_trail(
        &self,
        ctx: &AuthContext,
        filter: AuditFilter,
        page_size: Option<u64>,
    ) -> Result<AuditTrail, AccessError> {
        if !ctx.role.can_administer() {
            return Err(AccessError::Forbidden);
        }
        Ok(self.audit.query_trail(ctx.company_id, filter, page_size))
    }

    pub async fn audit_page(
        &self,
        ctx: &AuthContext,
        filter: &AuditFilter,
        cursor: Option<&str>,
        page_size: Option<u64>,
    ) -> Result<Page<AuditLog>, AccessError> {
        if !ctx.role.can_administer() {
            return Err(AccessError::Forbidden);
        }
        self.audit.page(ctx.company_id, filter, cursor, page_size).await
    }

    /// Record that the caller touched a support-workflow record. Subjects of
    /// other companies are reported as missing.
    #[instrument(skip(self, ctx, client), fields(user_id = %ctx.user_id))]
    pub async fn record_subject_access(
        &self,
        ctx: &AuthContext,
        subject: AuditSubject,
        action: AuditAction,
        client: &ClientInfo,
    ) -> Result<AuditLog, AccessError> {
        let owner = retry_read(&self.cfg.retry, move || self.repo.subject_company(subject)).await?;
        if owner != Some(ctx.company_id) {
            return Err(AccessError::NotFound(subject.entity_type()));
        }
        let entry = NewAuditEntry::classified(action, subject.entity_type(), self.clock.now())
            .entity(subject.id())
            .by(Some(ctx.user_id), Some(ctx.company_id))
            .client(client);
        self.audit.record(entry).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RiskLevel;
    use crate::test_support::Fixture;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn login_authenticate_logout() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let issued = fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap();
        let ctx = fx.gate.authenticate(&issued.tokens.access_token).await.unwrap();
        assert_eq!(ctx.company_id, company.id);
        assert_eq!(ctx.role, Role::Admin);

        assert!(fx.gate.logout(&ctx, &fx.client).await.unwrap());
        assert!(matches!(
            fx.gate.authenticate(&issued.tokens.access_token).await,
            Err(AccessError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn stalled_storage_surfaces_timeout() {
        let mut fx = Fixture::new();
        fx.cfg.request_timeout = std::time::Duration::from_millis(20);
        fx.rebuild();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let issued = fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap();
        let invite = fx
            .gate
            .issue_invite(
                &fx.ctx(&admin),
                InviteRequest { email: "slow@acme.io".into(), role: Role::Client, expires_in_hours: None, max_uses: None },
                &fx.client,
            )
            .await
            .unwrap();

        fx.repo.stall_reads(std::time::Duration::from_millis(250));
        assert!(matches!(fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await, Err(AccessError::Timeout)));
        assert!(matches!(
            fx.gate.redeem_invite(&invite.token, "Slow".into(), "slow-password".into(), &fx.client).await,
            Err(AccessError::Timeout)
        ));
        assert!(matches!(fx.gate.refresh(&issued.tokens.refresh_token).await, Err(AccessError::Timeout)));

        // nothing was half-applied
        assert_eq!(fx.repo.invite(invite.invite.id).unwrap().uses, 0);
        fx.repo.stall_reads(std::time::Duration::ZERO);
        let user = fx.gate.redeem_invite(&invite.token, "Slow".into(), "slow-password".into(), &fx.client).await.unwrap();
        assert_eq!(user.company_id, company.id);
        fx.gate.refresh(&issued.tokens.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn wrong_password_does_not_open_session() {
        let fx = Fixture::new();
        let (_company, admin) = fx.company_with_admin("Acme", 5, 5);
        let err = fx.gate.login(&admin.email, "not-the-password", &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));
        assert!(fx.gate.list_sessions(&fx.ctx(&admin)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn revoke_session_scoping() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let op = fx.user(company.id, "op@acme.io", Role::Operator);
        let peer = fx.user(company.id, "peer@acme.io", Role::Operator);
        let (_other, outsider) = fx.company_with_admin("Globex", 5, 5);

        let op_session = fx.gate.login(&op.email, Fixture::PASSWORD, &fx.client).await.unwrap().session;
        let outsider_session = fx.gate.login(&outsider.email, Fixture::PASSWORD, &fx.client).await.unwrap().session;

        assert!(matches!(
            fx.gate.revoke_session(&fx.ctx(&peer), op_session.id, &fx.client).await,
            Err(AccessError::Forbidden)
        ));
        assert!(matches!(
            fx.gate.revoke_session(&fx.ctx(&admin), outsider_session.id, &fx.client).await,
            Err(AccessError::NotFound("session"))
        ));
        assert!(fx.gate.revoke_session(&fx.ctx(&admin), op_session.id, &fx.client).await.unwrap());
        // second revoke is a no-op
        assert!(!fx.gate.revoke_session(&fx.ctx(&op), op_session.id, &fx.client).await.unwrap());

        let logout = fx.repo.audit_entries().into_iter().find(|e| e.action == AuditAction::Logout).unwrap();
        assert_eq!(logout.user_id, Some(admin.id));
        assert_eq!(logout.entity_id, Some(op_session.id));
    }

    #[tokio::test]
    async fn logout_everywhere_revokes_all_devices() {
        let fx = Fixture::new();
        let (_company, admin) = fx.company_with_admin("Acme", 5, 5);
        let a = fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap();
        fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap();
        let ctx = fx.gate.authenticate(&a.tokens.access_token).await.unwrap();
        assert_eq!(fx.gate.list_sessions(&ctx).await.unwrap().len(), 2);

        let revoked = fx.gate.logout_everywhere(&ctx, &fx.client).await.unwrap();
        assert_eq!(revoked.len(), 2);
        assert!(fx.gate.list_sessions(&ctx).await.unwrap().is_empty());
        let logouts = fx.repo.audit_entries().into_iter().filter(|e| e.action == AuditAction::Logout).count();
        assert_eq!(logouts, 2);
    }

    #[tokio::test]
    async fn deactivation_kills_live_sessions() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let op = fx.user(company.id, "op@acme.io", Role::Operator);
        let issued = fx.gate.login(&op.email, Fixture::PASSWORD, &fx.client).await.unwrap();

        let revoked = fx.gate.deactivate_user(&fx.ctx(&admin), op.id, &fx.client).await.unwrap();
        assert_eq!(revoked, vec![issued.session.id]);
        assert!(matches!(fx.gate.refresh(&issued.tokens.refresh_token).await, Err(AccessError::SessionInvalid)));
        assert!(matches!(
            fx.gate.authenticate(&issued.tokens.access_token).await,
            Err(AccessError::SessionInvalid)
        ));
    }

    #[tokio::test]
    async fn subject_access_is_company_scoped() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let (other, _) = fx.company_with_admin("Globex", 5, 5);
        let conversation = fx.repo.seed_conversation(company.id);
        let message = fx.repo.seed_message(conversation);
        let foreign_ticket = fx.repo.seed_ticket(other.id);
        let ctx = fx.ctx(&admin);

        let log = fx
            .gate
            .record_subject_access(&ctx, AuditSubject::Message(message), AuditAction::ViewPii, &fx.client)
            .await
            .unwrap();
        assert_eq!(log.entity_type, "message");
        assert_eq!(log.risk, RiskLevel::High);
        assert_eq!(log.company_id, Some(company.id));

        let err = fx
            .gate
            .record_subject_access(&ctx, AuditSubject::Ticket(foreign_ticket), AuditAction::Read, &fx.client)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::NotFound("ticket")));
    }

    #[tokio::test]
    async fn audit_trail_is_admin_only_and_tenant_scoped() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let (_other, outsider) = fx.company_with_admin("Globex", 5, 5);
        let op = fx.user(company.id, "op@acme.io", Role::Operator);
        fx.gate.login(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap();
        fx.gate.login(&outsider.email, Fixture::PASSWORD, &fx.client).await.unwrap();

        assert!(matches!(fx.gate.audit_trail(&fx.ctx(&op), AuditFilter::default(), None), Err(AccessError::Forbidden)));
        let trail = fx.gate.audit_trail(&fx.ctx(&admin), AuditFilter::default(), None).unwrap();
        let logs: Vec<AuditLog> = trail.into_stream().try_collect().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs.iter().all(|l| l.company_id == Some(company.id)));

        let page = fx.gate.audit_page(&fx.ctx(&admin), &AuditFilter::default(), None, Some(1)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.next_cursor.is_none());
    }
}
