//! CredentialStore: company-scoped users, credential checks, lock-out and
//! role administration.

use std::sync::Arc;

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::IdentityConfig;
use crate::domain::{
    AuditAction, AuthContext, ClientInfo, CreateUserInput, LoginFailure, NewAuditEntry, NewUser, RevocationAudit, Role,
    SeatClaim, User,
};
use crate::errors::AccessError;
use crate::metrics;
use crate::ports::{Clock, PasswordHasher};
use crate::repository::IdentityRepository;
use crate::retry::retry_read;
use crate::tenant::TenantRegistry;

/// Lost compare-and-set rounds tolerated on the failure counter.
const MAX_COUNTER_RACES: usize = 5;
pub const MIN_PASSWORD_LEN: usize = 8;

#[derive(Clone)]
pub struct CredentialStore {
    repo: Arc<dyn IdentityRepository>,
    tenants: TenantRegistry,
    hasher: Arc<dyn PasswordHasher>,
    clock: Arc<dyn Clock>,
    cfg: IdentityConfig,
}

impl CredentialStore {
    pub fn new(
        repo: Arc<dyn IdentityRepository>,
        tenants: TenantRegistry,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        cfg: IdentityConfig,
    ) -> Self {
        Self { repo, tenants, hasher, clock, cfg }
    }

    /// Check `email`/`password`.
    ///
    /// Unknown email, wrong password, inactive user and unresolvable tenant
    /// all yield `InvalidCredentials`; a current lock yields `AccountLocked`
    /// before the password is looked at. Every failure leaves one
    /// LOGIN_FAILED entry with the precise cause.
    #[instrument(skip(self, email, password, client), fields(email = %email))]
    pub async fn verify_credentials(&self, email: &str, password: &str, client: &ClientInfo) -> Result<User, AccessError> {
        let email = models::user::normalize_email(email);
        let email_ref = email.as_str();

        for _ in 0..MAX_COUNTER_RACES {
            let now = self.clock.now();
            let found = retry_read(&self.cfg.retry, move || self.repo.find_user_by_email(email_ref)).await?;
            let Some(user) = found else {
                let entry = NewAuditEntry::classified(AuditAction::LoginFailed, "user", now)
                    .new_data(json!({ "email": email, "reason": "unknown_email" }))
                    .client(client);
                self.repo.append_audit(entry).await?;
                metrics::LOGIN_FAILURE_TOTAL.inc();
                return Err(AccessError::InvalidCredentials);
            };

            if user.is_locked(now) {
                self.audit_rejection(&user, "locked", client).await?;
                return Err(AccessError::AccountLocked);
            }
            if !user.can_authenticate() {
                self.audit_rejection(&user, "inactive", client).await?;
                return Err(AccessError::InvalidCredentials);
            }
            match self.tenants.resolve(user.company_id).await {
                Ok(_) => {}
                Err(AccessError::TenantNotFound) => {
                    self.audit_rejection(&user, "tenant_unresolvable", client).await?;
                    return Err(AccessError::InvalidCredentials);
                }
                Err(e) => return Err(e),
            }

            if self.hasher.verify(password, &user.password_hash)? {
                let refreshed = self.repo.record_login_success(user.id, now).await?;
                return refreshed.ok_or(AccessError::InvalidCredentials);
            }

            // a lock that has lapsed restarts the count
            let base = if user.locked_until.is_some() { 0 } else { user.failed_login_attempts };
            let attempts = base + 1;
            let locked_until = (attempts >= self.cfg.lockout_threshold).then(|| now + self.cfg.lockout_window);
            let audit = NewAuditEntry::classified(AuditAction::LoginFailed, "user", now)
                .entity(user.id)
                .by(Some(user.id), Some(user.company_id))
                .new_data(json!({
                    "reason": "bad_password",
                    "attempts": attempts,
                    "locked_until": locked_until,
                }))
                .client(client);
            let applied = self
                .repo
                .record_login_failure(LoginFailure {
                    user_id: user.id,
                    expected_attempts: user.failed_login_attempts,
                    attempts,
                    locked_until,
                    now,
                    audit,
                })
                .await?;
            if applied {
                metrics::LOGIN_FAILURE_TOTAL.inc();
                if let Some(until) = locked_until {
                    metrics::ACCOUNT_LOCKED_TOTAL.inc();
                    warn!(user_id = %user.id, company_id = %user.company_id, %until, "account_locked");
                }
                return Err(AccessError::InvalidCredentials);
            }
        }
        Err(AccessError::Conflict("login attempt counter contended".into()))
    }

    async fn audit_rejection(&self, user: &User, reason: &str, client: &ClientInfo) -> Result<(), AccessError> {
        let entry = NewAuditEntry::classified(AuditAction::LoginFailed, "user", self.clock.now())
            .entity(user.id)
            .by(Some(user.id), Some(user.company_id))
            .new_data(json!({ "reason": reason }))
            .client(client);
        self.repo.append_audit(entry).await?;
        metrics::LOGIN_FAILURE_TOTAL.inc();
        Ok(())
    }

    /// Change `target_id`'s role within the actor's company.
    ///
    /// An unchanged role is a no-op. Moving an active user into the other
    /// seat pool needs a free, unreserved seat there. Upgrades audit
    /// GRANT_PERMISSION, downgrades REVOKE_PERMISSION.
    #[instrument(skip(self, actor, client), fields(actor = %actor.user_id, company_id = %actor.company_id))]
    pub async fn set_role(
        &self,
        actor: &AuthContext,
        target_id: Uuid,
        role: Role,
        client: &ClientInfo,
    ) -> Result<User, AccessError> {
        let target = self.administered(actor, target_id).await?;
        if !actor.role.dominates(role) {
            return Err(AccessError::Forbidden);
        }
        if target.role == role {
            return Ok(target);
        }
        let now = self.clock.now();
        let seat = if target.role.seat_class() != role.seat_class() && target.can_authenticate() {
            self.tenants.check_quota(actor.company_id, role, now).await?;
            Some(SeatClaim::quota(actor.company_id, role, 1, now))
        } else {
            None
        };

        let action = if role.rank() > target.role.rank() {
            AuditAction::GrantPermission
        } else {
            AuditAction::RevokePermission
        };
        let audit = NewAuditEntry::classified(action, "user", now)
            .entity(target.id)
            .by(Some(actor.user_id), Some(actor.company_id))
            .old(json!({ "role": target.role }))
            .new_data(json!({ "role": role }))
            .client(client);
        if !self.repo.update_role(target.id, target.role, role, now, seat, audit).await? {
            return Err(AccessError::Conflict("role changed concurrently".into()));
        }
        info!(user_id = %target.id, from = %target.role, to = %role, "role_changed");
        Ok(User { role, updated_at: now, ..target })
    }

    /// Deactivate `target_id` and revoke all of its sessions in one unit of
    /// work. Returns the revoked session ids; already inactive is a no-op.
    #[instrument(skip(self, actor, client), fields(actor = %actor.user_id, company_id = %actor.company_id))]
    pub async fn deactivate(
        &self,
        actor: &AuthContext,
        target_id: Uuid,
        client: &ClientInfo,
    ) -> Result<Vec<Uuid>, AccessError> {
        let target = self.administered(actor, target_id).await?;
        if !target.is_active {
            return Ok(Vec::new());
        }
        let now = self.clock.now();
        let audit = NewAuditEntry::classified(AuditAction::DeactivateUser, "user", now)
            .entity(target.id)
            .by(Some(actor.user_id), Some(actor.company_id))
            .old(json!({ "is_active": true }))
            .new_data(json!({ "is_active": false }))
            .client(client);
        let revocation = RevocationAudit {
            reason: "user_deactivated".into(),
            actor_id: Some(actor.user_id),
            company_id: actor.company_id,
            client: client.clone(),
            now,
        };
        let outcome = self.repo.deactivate_user(target.id, now, audit, revocation).await?;
        if outcome.changed {
            metrics::SESSIONS_REVOKED_TOTAL.inc_by(outcome.revoked_sessions.len() as u64);
            info!(user_id = %target.id, sessions = outcome.revoked_sessions.len(), "user_deactivated");
        }
        Ok(outcome.revoked_sessions)
    }

    /// Direct creation by an administrator of the same company. Seats held by
    /// outstanding invites are not available here.
    #[instrument(skip(self, actor, input, client), fields(actor = %actor.user_id, email = %input.email))]
    pub async fn create_user(
        &self,
        actor: &AuthContext,
        input: CreateUserInput,
        client: &ClientInfo,
    ) -> Result<User, AccessError> {
        if !actor.role.can_administer() || !actor.role.dominates(input.role) {
            return Err(AccessError::Forbidden);
        }
        models::user::validate_email(&input.email)?;
        models::user::validate_name(&input.name)?;
        validate_password(&input.password)?;
        let now = self.clock.now();
        self.tenants.check_quota(actor.company_id, input.role, now).await?;

        let new_user = NewUser {
            id: Uuid::new_v4(),
            company_id: actor.company_id,
            email: models::user::normalize_email(&input.email),
            name: input.name.trim().to_string(),
            password_hash: self.hasher.hash(&input.password)?,
            role: input.role,
            created_at: now,
        };
        let audit = NewAuditEntry::classified(AuditAction::Create, "user", now)
            .entity(new_user.id)
            .by(Some(actor.user_id), Some(actor.company_id))
            .new_data(json!({ "email": new_user.email, "role": new_user.role }))
            .client(client);
        let seat = SeatClaim::quota(actor.company_id, input.role, 1, now);
        let user = self.repo.insert_user(new_user, seat, audit).await?;
        info!(user_id = %user.id, company_id = %user.company_id, "user_created");
        Ok(user)
    }

    /// Validate and hash a password for a new account.
    pub fn hash_password(&self, password: &str) -> Result<String, AccessError> {
        validate_password(password)?;
        self.hasher.hash(password)
    }

    /// Non-deleted user in `company_id`, or `NotFound`.
    pub async fn user_in_company(&self, company_id: Uuid, user_id: Uuid) -> Result<User, AccessError> {
        retry_read(&self.cfg.retry, move || self.repo.find_user_in_company(company_id, user_id))
            .await?
            .ok_or(AccessError::NotFound("user"))
    }

    /// Administrative preconditions shared by role changes and deactivation.
    async fn administered(&self, actor: &AuthContext, target_id: Uuid) -> Result<User, AccessError> {
        if !actor.role.can_administer() || actor.user_id == target_id {
            return Err(AccessError::Forbidden);
        }
        let target = self.user_in_company(actor.company_id, target_id).await?;
        if !actor.role.dominates(target.role) {
            return Err(AccessError::Forbidden);
        }
        Ok(target)
    }
}

pub fn validate_password(password: &str) -> Result<(), AccessError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccessError::Validation(format!("password too short (>={MIN_PASSWORD_LEN})")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Fixture;
    use chrono::Duration;

    #[tokio::test]
    async fn fifth_failure_locks_and_sixth_reports_locked() {
        let fx = Fixture::new();
        let (company, _admin) = fx.company_with_admin("Acme", 5, 5);
        let user = fx.user(company.id, "op@acme.io", Role::Operator);

        for attempt in 1..=5 {
            let err = fx.credentials.verify_credentials("op@acme.io", "wrong-password", &fx.client).await.unwrap_err();
            assert!(matches!(err, AccessError::InvalidCredentials), "attempt {attempt}: {err:?}");
        }
        let stored = fx.repo.user(user.id).unwrap();
        assert_eq!(stored.failed_login_attempts, 5);
        assert_eq!(stored.locked_until, Some(fx.clock.now() + Duration::minutes(15)));

        let err = fx.credentials.verify_credentials("op@acme.io", Fixture::PASSWORD, &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::AccountLocked));
        assert_eq!(fx.repo.user(user.id).unwrap().failed_login_attempts, 5);
    }

    #[tokio::test]
    async fn lapsed_lock_restarts_counter() {
        let fx = Fixture::new();
        let (company, _admin) = fx.company_with_admin("Acme", 5, 5);
        let user = fx.user(company.id, "op@acme.io", Role::Operator);
        for _ in 0..5 {
            let _ = fx.credentials.verify_credentials("op@acme.io", "nope-nope", &fx.client).await;
        }
        fx.clock.advance(Duration::minutes(15));
        let err = fx.credentials.verify_credentials("op@acme.io", "nope-nope", &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));
        let stored = fx.repo.user(user.id).unwrap();
        assert_eq!(stored.failed_login_attempts, 1);
        assert!(stored.locked_until.is_none());

        let ok = fx.credentials.verify_credentials("op@acme.io", Fixture::PASSWORD, &fx.client).await.unwrap();
        assert_eq!(ok.failed_login_attempts, 0);
        assert_eq!(ok.last_login_at, Some(fx.clock.now()));
    }

    #[tokio::test]
    async fn unknown_email_writes_system_level_entry() {
        let fx = Fixture::new();
        let err = fx.credentials.verify_credentials("ghost@nowhere.io", "whatever1", &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));
        let entries = fx.repo.audit_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::LoginFailed);
        assert_eq!(entries[0].risk, crate::domain::RiskLevel::Medium);
        assert!(entries[0].user_id.is_none() && entries[0].company_id.is_none());
    }

    #[tokio::test]
    async fn inactive_user_and_dead_tenant_are_invalid_credentials() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let user = fx.user(company.id, "op@acme.io", Role::Operator);
        fx.credentials.deactivate(&fx.ctx(&admin), user.id, &fx.client).await.unwrap();
        let err = fx.credentials.verify_credentials("op@acme.io", Fixture::PASSWORD, &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));

        fx.repo.soft_delete_company(company.id);
        let err = fx.credentials.verify_credentials(&admin.email, Fixture::PASSWORD, &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCredentials));
    }

    #[tokio::test]
    async fn operator_cannot_change_roles() {
        let fx = Fixture::new();
        let (company, _admin) = fx.company_with_admin("Acme", 5, 5);
        let operator = fx.user(company.id, "op@acme.io", Role::Operator);
        let client = fx.user(company.id, "cli@acme.io", Role::Client);
        let before = fx.repo.audit_entries().len();

        let err = fx.credentials.set_role(&fx.ctx(&operator), client.id, Role::Admin, &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::Forbidden));
        assert_eq!(fx.repo.user(client.id).unwrap().role, Role::Client);
        assert_eq!(fx.repo.audit_entries().len(), before);
    }

    #[tokio::test]
    async fn admin_role_changes_are_audited_high() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let op = fx.user(company.id, "op@acme.io", Role::Operator);

        let updated = fx.credentials.set_role(&fx.ctx(&admin), op.id, Role::Admin, &fx.client).await.unwrap();
        assert_eq!(updated.role, Role::Admin);
        let back = fx.credentials.set_role(&fx.ctx(&admin), op.id, Role::Operator, &fx.client).await.unwrap();
        assert_eq!(back.role, Role::Operator);
        // no-op
        fx.credentials.set_role(&fx.ctx(&admin), op.id, Role::Operator, &fx.client).await.unwrap();

        let entries = fx.repo.audit_entries();
        let actions: Vec<AuditAction> = entries.iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::GrantPermission, AuditAction::RevokePermission]);
        assert!(entries.iter().all(|e| e.risk == crate::domain::RiskLevel::High));
        assert_eq!(entries[0].old_data, Some(json!({ "role": "OPERATOR" })));
        assert_eq!(entries[0].new_data, Some(json!({ "role": "ADMIN" })));
    }

    #[tokio::test]
    async fn admins_cannot_touch_themselves_higher_roles_or_other_tenants() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let master = fx.user(company.id, "boss@acme.io", Role::MasterAdmin);
        let (_other, other_admin) = fx.company_with_admin("Globex", 5, 5);
        let ctx = fx.ctx(&admin);

        assert!(matches!(fx.credentials.set_role(&ctx, admin.id, Role::Operator, &fx.client).await, Err(AccessError::Forbidden)));
        assert!(matches!(fx.credentials.set_role(&ctx, master.id, Role::Admin, &fx.client).await, Err(AccessError::Forbidden)));
        assert!(matches!(fx.credentials.deactivate(&ctx, master.id, &fx.client).await, Err(AccessError::Forbidden)));
        assert!(matches!(
            fx.credentials.set_role(&ctx, other_admin.id, Role::Client, &fx.client).await,
            Err(AccessError::NotFound("user"))
        ));
        let op = fx.user(company.id, "op@acme.io", Role::Operator);
        assert!(matches!(fx.credentials.set_role(&ctx, op.id, Role::MasterAdmin, &fx.client).await, Err(AccessError::Forbidden)));
    }

    #[tokio::test]
    async fn deactivate_is_idempotent() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 5);
        let op = fx.user(company.id, "op@acme.io", Role::Operator);
        fx.credentials.deactivate(&fx.ctx(&admin), op.id, &fx.client).await.unwrap();
        let after_first = fx.repo.audit_entries().len();
        fx.credentials.deactivate(&fx.ctx(&admin), op.id, &fx.client).await.unwrap();
        assert_eq!(fx.repo.audit_entries().len(), after_first);
        let deact = fx.repo.audit_entries().into_iter().find(|e| e.action == AuditAction::DeactivateUser).unwrap();
        assert_eq!(deact.risk, crate::domain::RiskLevel::Medium);
    }

    #[tokio::test]
    async fn create_user_checks_seats_and_duplicates() {
        let fx = Fixture::new();
        let (_company, admin) = fx.company_with_admin("Acme", 1, 2);
        let ctx = fx.ctx(&admin);
        let input = |email: &str, role| CreateUserInput {
            email: email.into(),
            name: "New".into(),
            password: "longenough".into(),
            role,
        };
        let created = fx.credentials.create_user(&ctx, input("New@Acme.io", Role::Operator), &fx.client).await.unwrap();
        assert_eq!(created.email, "new@acme.io");
        assert!(matches!(
            fx.credentials.create_user(&ctx, input("third@acme.io", Role::Operator), &fx.client).await,
            Err(AccessError::QuotaExceeded(_))
        ));
        assert!(matches!(
            fx.credentials.create_user(&ctx, input("new@acme.io", Role::Client), &fx.client).await,
            Err(AccessError::Conflict(_))
        ));
        assert!(matches!(
            fx.credentials
                .create_user(&ctx, CreateUserInput { password: "short".into(), ..input("x@acme.io", Role::Client) }, &fx.client)
                .await,
            Err(AccessError::Validation(_))
        ));
        let audit = fx.repo.audit_entries();
        assert_eq!(audit.iter().filter(|e| e.action == AuditAction::Create).count(), 1);
    }

    fn operator(email: String) -> CreateUserInput {
        CreateUserInput { email, name: "Op".into(), password: "longenough".into(), role: Role::Operator }
    }

    #[tokio::test]
    async fn create_user_leaves_invite_reservations_alone() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 2);
        let ctx = fx.ctx(&admin);
        let req = crate::domain::InviteRequest {
            email: "invited@acme.io".into(),
            role: Role::Operator,
            expires_in_hours: None,
            max_uses: None,
        };
        let issued = fx.invites.issue(&ctx, company.id, req, &fx.client).await.unwrap();

        let err = fx.credentials.create_user(&ctx, operator("direct@acme.io".into()), &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::QuotaExceeded(crate::domain::SeatClass::Agents)));

        // the reserved seat still goes to the invitee
        let redeemed = fx
            .invites
            .redeem(
                &issued.token,
                crate::domain::RedeemAccount::NewAccount { name: "Invited".into(), password: "longenough".into() },
                &fx.client,
            )
            .await
            .unwrap();
        assert_eq!(redeemed.role, Role::Operator);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creations_never_overfill_seats() {
        let fx = Fixture::new();
        for round in 0..20 {
            // the admin holds one of the two agent seats
            let (company, admin) = fx.company_with_admin(&format!("Round{round}"), 10, 2);
            let ctx = fx.ctx(&admin);
            let attempts: Vec<_> = (0..8)
                .map(|i| {
                    let credentials = fx.credentials.clone();
                    let client = fx.client.clone();
                    let input = operator(format!("op{i}@round{round}.io"));
                    tokio::spawn(async move { credentials.create_user(&ctx, input, &client).await })
                })
                .collect();

            let mut created = 0;
            for attempt in attempts {
                match attempt.await.unwrap() {
                    Ok(_) => created += 1,
                    Err(AccessError::QuotaExceeded(_)) => {}
                    Err(other) => panic!("round {round}: unexpected {other:?}"),
                }
            }
            assert_eq!(created, 1, "round {round}");
            let seated = fx.repo.count_active_users(company.id, crate::domain::SeatClass::Agents).await.unwrap();
            assert_eq!(seated, 2, "round {round}");
        }
    }

    #[tokio::test]
    async fn role_change_into_full_pool_is_rejected() {
        let fx = Fixture::new();
        let (company, admin) = fx.company_with_admin("Acme", 5, 2);
        let client = fx.user(company.id, "cli@acme.io", Role::Client);
        let req = crate::domain::InviteRequest {
            email: "invited@acme.io".into(),
            role: Role::Operator,
            expires_in_hours: None,
            max_uses: None,
        };
        fx.invites.issue(&fx.ctx(&admin), company.id, req, &fx.client).await.unwrap();

        let err = fx.credentials.set_role(&fx.ctx(&admin), client.id, Role::Operator, &fx.client).await.unwrap_err();
        assert!(matches!(err, AccessError::QuotaExceeded(_)));
        assert_eq!(fx.repo.user(client.id).unwrap().role, Role::Client);
    }
}
