#![cfg(test)]
//! Shared fixture for unit tests: every component wired over one in-memory
//! repository, a manual clock and a cheap Argon2 setting.

use std::sync::Arc;

use argon2::Params;
use chrono::{TimeZone, Utc};
use uuid::Uuid;

use crate::audit::AuditRecorder;
use crate::config::IdentityConfig;
use crate::credentials::CredentialStore;
use crate::domain::{AuthContext, ClientInfo, Company, Role, User};
use crate::gate::AccessGate;
use crate::invites::InviteLedger;
use crate::ports::{Argon2Hasher, ManualClock, OsTokenGenerator, PasswordHasher, Ports};
use crate::repository::mock::MockIdentityRepository;
use crate::retry::RetryPolicy;
use crate::sessions::SessionManager;
use crate::tenant::TenantRegistry;

pub struct Fixture {
    pub repo: Arc<MockIdentityRepository>,
    pub clock: Arc<ManualClock>,
    pub client: ClientInfo,
    pub cfg: IdentityConfig,
    pub gate: AccessGate,
    pub tenants: TenantRegistry,
    pub credentials: CredentialStore,
    pub invites: InviteLedger,
    pub sessions: SessionManager,
    pub audit: AuditRecorder,
    password_hash: String,
    ports: Ports,
}

impl Fixture {
    pub const PASSWORD: &'static str = "correct-horse-battery";

    pub fn new() -> Self {
        let repo = Arc::new(MockIdentityRepository::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()));
        let hasher = Arc::new(Argon2Hasher::with_params(Params::new(8, 1, 1, None).unwrap()));
        let password_hash = hasher.hash(Self::PASSWORD).unwrap();
        let ports = Ports { clock: clock.clone(), tokens: Arc::new(OsTokenGenerator::default()), hasher };

        let mut cfg = IdentityConfig::new("fixture-signing-secret-0123456789");
        cfg.retry = RetryPolicy::new(3, std::time::Duration::ZERO, std::time::Duration::ZERO, true);

        let gate = AccessGate::new(repo.clone(), ports.clone(), cfg.clone());
        Self {
            tenants: gate.tenants().clone(),
            credentials: gate.credentials().clone(),
            invites: gate.invites().clone(),
            sessions: gate.sessions().clone(),
            audit: gate.audit().clone(),
            gate,
            repo,
            clock,
            client: ClientInfo::new(Some("203.0.113.7".into()), Some("fixture-agent/1.0".into())),
            cfg,
            password_hash,
            ports,
        }
    }

    /// Rewire the components after editing `cfg`.
    pub fn rebuild(&mut self) {
        self.gate = AccessGate::new(self.repo.clone(), self.ports.clone(), self.cfg.clone());
        self.tenants = self.gate.tenants().clone();
        self.credentials = self.gate.credentials().clone();
        self.invites = self.gate.invites().clone();
        self.sessions = self.gate.sessions().clone();
        self.audit = self.gate.audit().clone();
    }

    /// Company plus one ADMIN (`admin@<name>.io`) occupying an agent seat.
    pub fn company_with_admin(&self, name: &str, max_users: u32, max_agents: u32) -> (Company, User) {
        let company = self.repo.seed_company(name, max_users, max_agents);
        let admin = self.user(company.id, &format!("admin@{}.io", name.to_lowercase()), Role::Admin);
        (company, admin)
    }

    /// Active user whose password is [`Fixture::PASSWORD`].
    pub fn user(&self, company_id: Uuid, email: &str, role: Role) -> User {
        self.repo.seed_user(company_id, email, role, &self.password_hash)
    }

    pub fn ctx(&self, user: &User) -> AuthContext {
        AuthContext { user_id: user.id, company_id: user.company_id, role: user.role, session_id: Uuid::new_v4() }
    }
}
