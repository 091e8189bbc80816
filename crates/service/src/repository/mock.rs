//! In-memory repository for tests and doc examples.
//!
//! All state sits behind one mutex and every trait method holds it for its
//! whole body, so each call is an atomic unit of work just like a database
//! transaction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::*;
use crate::domain::RedeemTarget;

#[derive(Default)]
struct State {
    companies: HashMap<Uuid, Company>,
    users: HashMap<Uuid, User>,
    invites: HashMap<Uuid, Invite>,
    sessions: HashMap<Uuid, Session>,
    audit: Vec<AuditLog>,
    conversations: HashMap<Uuid, Uuid>, // conversation -> company
    messages: HashMap<Uuid, Uuid>,      // message -> conversation
    tickets: HashMap<Uuid, Uuid>,       // ticket -> company
}

impl State {
    fn push_audit(&mut self, entry: NewAuditEntry) -> AuditLog {
        let log = entry.into_log(Uuid::new_v4());
        self.audit.push(log.clone());
        log
    }

    fn live_user(&self, user_id: Uuid) -> Option<&User> {
        self.users.get(&user_id).filter(|u| u.deleted_at.is_none())
    }

    fn email_taken(&self, email: &str) -> bool {
        self.users.values().any(|u| u.email == email)
    }

    fn active_seats(&self, company_id: Uuid, class: SeatClass) -> u64 {
        self.users
            .values()
            .filter(|u| u.company_id == company_id && u.can_authenticate() && u.role.seat_class() == class)
            .count() as u64
    }

    fn reserved_seats(&self, company_id: Uuid, class: SeatClass, now: DateTime<Utc>) -> u64 {
        self.invites
            .values()
            .filter(|i| i.company_id == company_id && i.role.seat_class() == class)
            .map(|i| u64::from(i.reserved_seats(now)))
            .sum()
    }

    /// Counted under the state lock the caller already holds.
    fn claim_seats(&self, claim: &SeatClaim) -> Result<(), RepoError> {
        let company = self
            .companies
            .get(&claim.company_id)
            .filter(|c| c.is_resolvable())
            .ok_or(RepoError::TenantGone)?;
        let active = self.active_seats(claim.company_id, claim.class);
        let reserved = self.reserved_seats(claim.company_id, claim.class, claim.now);
        if !claim.fits(company.seat_limit(claim.class), active, reserved) {
            return Err(RepoError::SeatsExhausted(claim.class));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MockIdentityRepository {
    state: Mutex<State>,
    failing_reads: AtomicU32,
    stall_ms: AtomicU64,
}

impl MockIdentityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, RepoError> {
        self.state.lock().map_err(|_| RepoError::Unavailable("mock state poisoned".into()))
    }

    /// Read paths consume injected failures first.
    fn read(&self) -> Result<MutexGuard<'_, State>, RepoError> {
        let injected = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(RepoError::Unavailable("injected read failure".into()));
        }
        self.lock()
    }

    /// Make the next `n` reads fail with `Unavailable`.
    pub fn fail_next_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }

    /// Delay lookups by email, invite token and refresh token by `delay`
    /// until reset with `Duration::ZERO`.
    pub fn stall_reads(&self, delay: Duration) {
        self.stall_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    async fn stall(&self) {
        let ms = self.stall_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    pub fn seed_company(&self, name: &str, max_users: u32, max_agents: u32) -> Company {
        let now = Utc::now();
        let company = Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            slug: format!("{}-{}", name.to_ascii_lowercase().replace(' ', "-"), &Uuid::new_v4().simple().to_string()[..8]),
            cnpj: None,
            plan: "pro".into(),
            max_users,
            max_agents,
            is_active: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if let Ok(mut st) = self.lock() {
            st.companies.insert(company.id, company.clone());
        }
        company
    }

    /// Insert a user directly, without audit (fixtures only).
    pub fn seed_user(&self, company_id: Uuid, email: &str, role: Role, password_hash: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            company_id,
            email: email.to_string(),
            name: email.split('@').next().unwrap_or(email).to_string(),
            password_hash: password_hash.to_string(),
            role,
            is_active: true,
            is_email_verified: true,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        if let Ok(mut st) = self.lock() {
            st.users.insert(user.id, user.clone());
        }
        user
    }

    pub fn seed_conversation(&self, company_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut st) = self.lock() {
            st.conversations.insert(id, company_id);
        }
        id
    }

    pub fn seed_message(&self, conversation_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut st) = self.lock() {
            st.messages.insert(id, conversation_id);
        }
        id
    }

    pub fn seed_ticket(&self, company_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        if let Ok(mut st) = self.lock() {
            st.tickets.insert(id, company_id);
        }
        id
    }

    pub fn soft_delete_company(&self, company_id: Uuid) {
        if let Ok(mut st) = self.lock() {
            if let Some(c) = st.companies.get_mut(&company_id) {
                c.deleted_at = Some(Utc::now());
            }
        }
    }

    pub fn soft_delete_user(&self, user_id: Uuid) {
        if let Ok(mut st) = self.lock() {
            if let Some(u) = st.users.get_mut(&user_id) {
                u.deleted_at = Some(Utc::now());
            }
        }
    }

    /// Raw row, soft-deleted or not.
    pub fn user(&self, user_id: Uuid) -> Option<User> {
        self.lock().ok()?.users.get(&user_id).cloned()
    }

    pub fn invite(&self, invite_id: Uuid) -> Option<Invite> {
        self.lock().ok()?.invites.get(&invite_id).cloned()
    }

    pub fn session(&self, session_id: Uuid) -> Option<Session> {
        self.lock().ok()?.sessions.get(&session_id).cloned()
    }

    /// Every audit row in insertion order.
    pub fn audit_entries(&self) -> Vec<AuditLog> {
        self.lock().map(|st| st.audit.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl IdentityRepository for MockIdentityRepository {
    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, RepoError> {
        let st = self.read()?;
        Ok(st.companies.get(&company_id).filter(|c| c.deleted_at.is_none()).cloned())
    }

    async fn count_active_users(&self, company_id: Uuid, class: SeatClass) -> Result<u64, RepoError> {
        Ok(self.read()?.active_seats(company_id, class))
    }

    async fn count_reserved_seats(&self, company_id: Uuid, class: SeatClass, now: DateTime<Utc>) -> Result<u64, RepoError> {
        Ok(self.read()?.reserved_seats(company_id, class, now))
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError> {
        let st = self.read()?;
        Ok(st.live_user(user_id).cloned())
    }

    async fn find_user_in_company(&self, company_id: Uuid, user_id: Uuid) -> Result<Option<User>, RepoError> {
        let st = self.read()?;
        Ok(st.live_user(user_id).filter(|u| u.company_id == company_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        self.stall().await;
        let st = self.read()?;
        Ok(st.users.values().find(|u| u.email == email && u.deleted_at.is_none()).cloned())
    }

    async fn insert_user(&self, user: NewUser, seat: SeatClaim, audit: NewAuditEntry) -> Result<User, RepoError> {
        let mut st = self.lock()?;
        st.claim_seats(&seat)?;
        if st.email_taken(&user.email) {
            return Err(RepoError::Conflict("user.email".into()));
        }
        let created = new_user_row(user);
        st.users.insert(created.id, created.clone());
        st.push_audit(audit);
        Ok(created)
    }

    async fn record_login_failure(&self, failure: LoginFailure) -> Result<bool, RepoError> {
        let mut st = self.lock()?;
        let Some(user) = st.users.get_mut(&failure.user_id) else { return Ok(false) };
        if user.failed_login_attempts != failure.expected_attempts {
            return Ok(false);
        }
        user.failed_login_attempts = failure.attempts;
        user.locked_until = failure.locked_until;
        user.updated_at = failure.now;
        st.push_audit(failure.audit);
        Ok(true)
    }

    async fn record_login_success(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>, RepoError> {
        let mut st = self.lock()?;
        let Some(user) = st.users.get_mut(&user_id).filter(|u| u.deleted_at.is_none()) else { return Ok(None) };
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.updated_at = now;
        Ok(Some(user.clone()))
    }

    async fn update_role(
        &self,
        user_id: Uuid,
        expected: Role,
        role: Role,
        now: DateTime<Utc>,
        seat: Option<SeatClaim>,
        audit: NewAuditEntry,
    ) -> Result<bool, RepoError> {
        let mut st = self.lock()?;
        let current = st.users.get(&user_id).filter(|u| u.deleted_at.is_none()).map(|u| u.role);
        if current != Some(expected) {
            return Ok(false);
        }
        if let Some(seat) = &seat {
            st.claim_seats(seat)?;
        }
        let Some(user) = st.users.get_mut(&user_id) else { return Ok(false) };
        user.role = role;
        user.updated_at = now;
        st.push_audit(audit);
        Ok(true)
    }

    async fn deactivate_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
        revocation: RevocationAudit,
    ) -> Result<DeactivationOutcome, RepoError> {
        let mut st = self.lock()?;
        let Some(user) = st.users.get_mut(&user_id).filter(|u| u.deleted_at.is_none() && u.is_active) else {
            return Ok(DeactivationOutcome::default());
        };
        user.is_active = false;
        user.updated_at = now;
        st.push_audit(audit);
        let revoked = revoke_all_locked(&mut st, user_id, &revocation);
        Ok(DeactivationOutcome { changed: true, revoked_sessions: revoked })
    }

    async fn insert_invite(&self, invite: NewInvite, seat: SeatClaim, audit: NewAuditEntry) -> Result<Invite, RepoError> {
        let mut st = self.lock()?;
        st.claim_seats(&seat)?;
        if st.invites.values().any(|i| i.token_hash == invite.token_hash) {
            return Err(RepoError::Conflict("invite.token_hash".into()));
        }
        let created = Invite {
            id: invite.id,
            token_hash: invite.token_hash,
            email: invite.email,
            role: invite.role,
            company_id: invite.company_id,
            invited_by_id: invite.invited_by_id,
            used_by_id: None,
            max_uses: invite.max_uses,
            uses: 0,
            expires_at: invite.expires_at,
            used_at: None,
            created_at: invite.created_at,
        };
        st.invites.insert(created.id, created.clone());
        st.push_audit(audit);
        Ok(created)
    }

    async fn find_invite_by_token_hash(&self, token_hash: &str) -> Result<Option<Invite>, RepoError> {
        self.stall().await;
        let st = self.read()?;
        Ok(st.invites.values().find(|i| i.token_hash == token_hash).cloned())
    }

    async fn list_pending_invites(&self, company_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Invite>, RepoError> {
        let st = self.read()?;
        let mut pending: Vec<Invite> = st
            .invites
            .values()
            .filter(|i| i.company_id == company_id && i.reserved_seats(now) > 0)
            .cloned()
            .collect();
        pending.sort_by_key(|i| (i.created_at, i.id));
        Ok(pending)
    }

    async fn redeem_invite(&self, redemption: InviteRedemption) -> Result<RedeemOutcome, RepoError> {
        let mut st = self.lock()?;
        let InviteRedemption { invite_id, single_use, target, seat, now, audit } = redemption;

        // guards first, so a lost race writes nothing
        let Some(invite) = st.invites.get(&invite_id) else { return Ok(RedeemOutcome::Exhausted) };
        if invite.uses >= invite.max_uses || (single_use && invite.used_by_id.is_some()) {
            return Ok(RedeemOutcome::Exhausted);
        }
        if invite.expires_at <= now {
            return Ok(RedeemOutcome::Expired);
        }
        if let Some(seat) = &seat {
            st.claim_seats(seat)?;
        }

        let user = match target {
            RedeemTarget::Create(new_user) => {
                if st.email_taken(&new_user.email) {
                    return Err(RepoError::Conflict("user.email".into()));
                }
                let created = new_user_row(new_user);
                st.users.insert(created.id, created.clone());
                created
            }
            RedeemTarget::Attach { user_id, role } => {
                let Some(user) = st.users.get_mut(&user_id).filter(|u| u.deleted_at.is_none()) else {
                    return Err(RepoError::Corrupt(format!("user {user_id} vanished during redemption")));
                };
                user.role = role;
                user.updated_at = now;
                user.clone()
            }
        };

        if let Some(invite) = st.invites.get_mut(&invite_id) {
            invite.uses += 1;
            invite.used_at = Some(now);
            if single_use {
                invite.used_by_id = Some(user.id);
            }
        }
        st.push_audit(audit);
        Ok(RedeemOutcome::Redeemed(user))
    }

    async fn insert_session(&self, session: NewSession, audit: NewAuditEntry) -> Result<Session, RepoError> {
        let mut st = self.lock()?;
        if st.sessions.values().any(|s| s.refresh_token_hash == session.refresh_token_hash) {
            return Err(RepoError::Conflict("session.refresh_token_hash".into()));
        }
        let created = Session {
            id: session.id,
            user_id: session.user_id,
            refresh_token_hash: session.refresh_token_hash,
            access_token_hash: Some(session.access_token_hash),
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            is_valid: true,
            revoked_at: None,
            revoked_reason: None,
            expires_at: session.expires_at,
            last_used_at: None,
            created_at: session.created_at,
        };
        st.sessions.insert(created.id, created.clone());
        st.push_audit(audit);
        Ok(created)
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, RepoError> {
        let st = self.read()?;
        Ok(st.sessions.get(&session_id).cloned())
    }

    async fn find_session_by_refresh_hash(&self, refresh_hash: &str) -> Result<Option<Session>, RepoError> {
        self.stall().await;
        let st = self.read()?;
        Ok(st.sessions.values().find(|s| s.refresh_token_hash == refresh_hash).cloned())
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> Result<bool, RepoError> {
        let mut st = self.lock()?;
        if let Some(new_hash) = &rotation.new_refresh_hash {
            if st.sessions.values().any(|s| &s.refresh_token_hash == new_hash) {
                return Err(RepoError::Conflict("session.refresh_token_hash".into()));
            }
        }
        let Some(session) = st.sessions.get_mut(&rotation.session_id) else { return Ok(false) };
        let guard = session.refresh_token_hash == rotation.expected_refresh_hash
            && session.is_valid
            && session.revoked_at.is_none()
            && session.expires_at > rotation.now;
        if !guard {
            return Ok(false);
        }
        if let Some(new_hash) = rotation.new_refresh_hash {
            session.refresh_token_hash = new_hash;
        }
        session.access_token_hash = Some(rotation.access_token_hash);
        session.last_used_at = Some(rotation.now);
        Ok(true)
    }

    async fn mark_session_expired(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let mut st = self.lock()?;
        match st.sessions.get_mut(&session_id) {
            Some(s) if s.is_valid && s.expires_at <= now => {
                s.is_valid = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool, RepoError> {
        let mut st = self.lock()?;
        match st.sessions.get_mut(&session_id) {
            Some(s) if s.is_valid => {
                s.is_valid = false;
                s.revoked_at = Some(now);
                s.revoked_reason = Some(reason.to_string());
            }
            _ => return Ok(false),
        }
        st.push_audit(audit);
        Ok(true)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        _now: DateTime<Utc>,
        revocation: RevocationAudit,
    ) -> Result<Vec<Uuid>, RepoError> {
        let mut st = self.lock()?;
        Ok(revoke_all_locked(&mut st, user_id, &revocation))
    }

    async fn list_active_sessions(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, RepoError> {
        let st = self.read()?;
        let mut active: Vec<Session> = st
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_effectively_valid(now))
            .cloned()
            .collect();
        active.sort_by_key(|s| (s.created_at, s.id));
        Ok(active)
    }

    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepoError> {
        let mut st = self.lock()?;
        let mut flagged = 0;
        for s in st.sessions.values_mut().filter(|s| s.is_valid && s.expires_at <= now) {
            s.is_valid = false;
            flagged += 1;
        }
        Ok(flagged)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLog, RepoError> {
        let mut st = self.lock()?;
        Ok(st.push_audit(entry))
    }

    async fn audit_page(
        &self,
        company_id: Uuid,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: u64,
    ) -> Result<Vec<AuditLog>, RepoError> {
        let st = self.read()?;
        let mut rows: Vec<AuditLog> = st
            .audit
            .iter()
            .filter(|l| l.company_id == Some(company_id) && filter.matches(l))
            .filter(|l| after.map_or(true, |c| AuditCursor::of(l) > c))
            .cloned()
            .collect();
        rows.sort_by_key(AuditCursor::of);
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn subject_company(&self, subject: AuditSubject) -> Result<Option<Uuid>, RepoError> {
        let st = self.read()?;
        Ok(match subject {
            AuditSubject::User(id) => st.live_user(id).map(|u| u.company_id),
            AuditSubject::Conversation(id) => st.conversations.get(&id).copied(),
            AuditSubject::Message(id) => st.messages.get(&id).and_then(|c| st.conversations.get(c)).copied(),
            AuditSubject::Ticket(id) => st.tickets.get(&id).copied(),
        })
    }
}

fn new_user_row(user: NewUser) -> User {
    User {
        id: user.id,
        company_id: user.company_id,
        email: user.email,
        name: user.name,
        password_hash: user.password_hash,
        role: user.role,
        is_active: true,
        is_email_verified: false,
        failed_login_attempts: 0,
        locked_until: None,
        last_login_at: None,
        created_at: user.created_at,
        updated_at: user.created_at,
        deleted_at: None,
    }
}

fn revoke_all_locked(st: &mut State, user_id: Uuid, revocation: &RevocationAudit) -> Vec<Uuid> {
    let mut revoked = Vec::new();
    for s in st.sessions.values_mut().filter(|s| s.user_id == user_id && s.is_valid) {
        s.is_valid = false;
        s.revoked_at = Some(revocation.now);
        s.revoked_reason = Some(revocation.reason.clone());
        revoked.push(s.id);
    }
    revoked.sort();
    for id in &revoked {
        st.push_audit(revocation.entry_for(*id, user_id));
    }
    revoked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AuditAction;

    #[tokio::test]
    async fn injected_failures_hit_reads_only() {
        let repo = MockIdentityRepository::new();
        let c = repo.seed_company("Acme", 5, 5);
        repo.fail_next_reads(1);
        assert!(matches!(repo.find_company(c.id).await, Err(RepoError::Unavailable(_))));
        assert!(repo.find_company(c.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_hidden() {
        let repo = MockIdentityRepository::new();
        let c = repo.seed_company("Acme", 5, 5);
        let u = repo.seed_user(c.id, "a@acme.io", Role::Operator, "h");
        repo.soft_delete_user(u.id);
        assert!(repo.find_user(u.id).await.unwrap().is_none());
        assert!(repo.find_user_by_email("a@acme.io").await.unwrap().is_none());
        repo.soft_delete_company(c.id);
        assert!(repo.find_company(c.id).await.unwrap().is_none());
    }

    fn new_user(company_id: Uuid, email: &str, role: Role, now: DateTime<Utc>) -> NewUser {
        NewUser {
            id: Uuid::new_v4(),
            company_id,
            email: email.into(),
            name: "N".into(),
            password_hash: "h".into(),
            role,
            created_at: now,
        }
    }

    #[tokio::test]
    async fn insert_user_recounts_seats_under_the_lock() {
        let repo = MockIdentityRepository::new();
        let c = repo.seed_company("Acme", 5, 1);
        let now = Utc::now();
        let audit = || NewAuditEntry::classified(AuditAction::Create, "user", now);

        let seat = SeatClaim::quota(c.id, Role::Operator, 1, now);
        repo.insert_user(new_user(c.id, "a@acme.io", Role::Operator, now), seat, audit()).await.unwrap();
        let err = repo.insert_user(new_user(c.id, "b@acme.io", Role::Operator, now), seat, audit()).await.unwrap_err();
        assert!(matches!(err, RepoError::SeatsExhausted(SeatClass::Agents)));
        assert!(repo.find_user_by_email("b@acme.io").await.unwrap().is_none());
        assert_eq!(repo.audit_entries().len(), 1);

        repo.soft_delete_company(c.id);
        let seat = SeatClaim::quota(c.id, Role::Client, 1, now);
        let err = repo.insert_user(new_user(c.id, "c@acme.io", Role::Client, now), seat, audit()).await.unwrap_err();
        assert!(matches!(err, RepoError::TenantGone));
    }

    #[tokio::test]
    async fn lapsed_claim_reports_expired_not_exhausted() {
        let repo = MockIdentityRepository::new();
        let c = repo.seed_company("Acme", 5, 5);
        let admin = repo.seed_user(c.id, "admin@acme.io", Role::Admin, "h");
        let now = Utc::now();
        let expires_at = now + chrono::Duration::hours(1);
        let invite = repo
            .insert_invite(
                NewInvite {
                    id: Uuid::new_v4(),
                    token_hash: "digest".into(),
                    email: "late@acme.io".into(),
                    role: Role::Client,
                    company_id: c.id,
                    invited_by_id: admin.id,
                    max_uses: 1,
                    expires_at,
                    created_at: now,
                },
                SeatClaim::quota(c.id, Role::Client, 1, now),
                NewAuditEntry::classified(AuditAction::InviteUser, "invite", now),
            )
            .await
            .unwrap();

        // the invite lapsed between the caller's lookup and the claim
        let redemption = |at: DateTime<Utc>| InviteRedemption {
            invite_id: invite.id,
            single_use: true,
            target: RedeemTarget::Create(new_user(c.id, "late@acme.io", Role::Client, at)),
            seat: Some(SeatClaim::redemption(c.id, Role::Client, at)),
            now: at,
            audit: NewAuditEntry::classified(AuditAction::Create, "user", at),
        };
        let outcome = repo.redeem_invite(redemption(expires_at)).await.unwrap();
        assert_eq!(outcome, RedeemOutcome::Expired);
        assert_eq!(repo.invite(invite.id).unwrap().uses, 0);
        assert!(repo.find_user_by_email("late@acme.io").await.unwrap().is_none());

        assert!(matches!(repo.redeem_invite(redemption(now)).await.unwrap(), RedeemOutcome::Redeemed(_)));
        // spent and lapsed: exhaustion wins
        assert_eq!(repo.redeem_invite(redemption(expires_at)).await.unwrap(), RedeemOutcome::Exhausted);
    }

    #[tokio::test]
    async fn bulk_revocation_writes_one_entry_per_session() {
        let repo = MockIdentityRepository::new();
        let c = repo.seed_company("Acme", 5, 5);
        let u = repo.seed_user(c.id, "a@acme.io", Role::Operator, "h");
        let now = Utc::now();
        for _ in 0..3 {
            let id = Uuid::new_v4();
            repo.insert_session(
                NewSession {
                    id,
                    user_id: u.id,
                    refresh_token_hash: id.to_string(),
                    access_token_hash: String::new(),
                    user_agent: None,
                    ip_address: None,
                    expires_at: now + chrono::Duration::days(1),
                    created_at: now,
                },
                NewAuditEntry::classified(AuditAction::Login, "session", now),
            )
            .await
            .unwrap();
        }
        let revocation = RevocationAudit { reason: "test".into(), actor_id: None, company_id: c.id, client: Default::default(), now };
        let revoked = repo.revoke_user_sessions(u.id, now, revocation.clone()).await.unwrap();
        assert_eq!(revoked.len(), 3);
        let logouts = repo.audit_entries().iter().filter(|l| l.action == AuditAction::Logout).count();
        assert_eq!(logouts, 3);
        assert!(repo.revoke_user_sessions(u.id, now, revocation).await.unwrap().is_empty());
    }
}
