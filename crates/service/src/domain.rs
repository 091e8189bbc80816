//! Domain types for the identity core (business view, storage-agnostic).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::AccessError;
use crate::policy::risk_for;

/// Company-scoped role. Ordering is explicit through [`Role::rank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    MasterAdmin,
    Admin,
    Operator,
    Client,
}

impl Role {
    pub fn rank(self) -> u8 {
        match self {
            Role::MasterAdmin => 4,
            Role::Admin => 3,
            Role::Operator => 2,
            Role::Client => 1,
        }
    }

    /// `self` may grant or act on `other` (rank >=).
    pub fn dominates(self, other: Role) -> bool {
        self.rank() >= other.rank()
    }

    pub fn can_administer(self) -> bool {
        self.dominates(Role::Admin)
    }

    pub fn seat_class(self) -> SeatClass {
        match self {
            Role::Client => SeatClass::Users,
            _ => SeatClass::Agents,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::MasterAdmin => "MASTER_ADMIN",
            Role::Admin => "ADMIN",
            Role::Operator => "OPERATOR",
            Role::Client => "CLIENT",
        }
    }

    pub const ALL: [Role; 4] = [Role::MasterAdmin, Role::Admin, Role::Operator, Role::Client];
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AccessError::Validation(format!("unknown role: {s}")))
    }
}

/// Seat pool a role draws from: CLIENT against `max_users`, staff against `max_agents`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeatClass {
    Users,
    Agents,
}

impl SeatClass {
    pub fn roles(self) -> &'static [Role] {
        match self {
            SeatClass::Users => &[Role::Client],
            SeatClass::Agents => &[Role::MasterAdmin, Role::Admin, Role::Operator],
        }
    }
}

/// Seat consumption re-checked by the repository inside the unit of work
/// that takes the seat, with the company row locked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatClaim {
    pub company_id: Uuid,
    pub class: SeatClass,
    pub seats: u32,
    /// Whether outstanding invites count against the limit.
    pub count_reserved: bool,
    pub now: DateTime<Utc>,
}

impl SeatClaim {
    /// New seats not backed by an invite: reservations count.
    pub fn quota(company_id: Uuid, role: Role, seats: u32, now: DateTime<Utc>) -> Self {
        Self { company_id, class: role.seat_class(), seats, count_reserved: true, now }
    }

    /// Redemption of an invite that already holds its reservation.
    pub fn redemption(company_id: Uuid, role: Role, now: DateTime<Utc>) -> Self {
        Self { company_id, class: role.seat_class(), seats: 1, count_reserved: false, now }
    }

    pub fn fits(&self, limit: u32, active: u64, reserved: u64) -> bool {
        let reserved = if self.count_reserved { reserved } else { 0 };
        active + reserved + u64::from(self.seats) <= u64::from(limit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    LoginFailed,
    ViewPii,
    DownloadPii,
    DeletePii,
    GrantPermission,
    RevokePermission,
    InviteUser,
    DeactivateUser,
    SystemConfigChange,
    Restore,
    Backup,
}

impl AuditAction {
    pub const ALL: [AuditAction; 17] = [
        AuditAction::Create,
        AuditAction::Read,
        AuditAction::Update,
        AuditAction::Delete,
        AuditAction::Login,
        AuditAction::Logout,
        AuditAction::LoginFailed,
        AuditAction::ViewPii,
        AuditAction::DownloadPii,
        AuditAction::DeletePii,
        AuditAction::GrantPermission,
        AuditAction::RevokePermission,
        AuditAction::InviteUser,
        AuditAction::DeactivateUser,
        AuditAction::SystemConfigChange,
        AuditAction::Restore,
        AuditAction::Backup,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Create => "CREATE",
            AuditAction::Read => "READ",
            AuditAction::Update => "UPDATE",
            AuditAction::Delete => "DELETE",
            AuditAction::Login => "LOGIN",
            AuditAction::Logout => "LOGOUT",
            AuditAction::LoginFailed => "LOGIN_FAILED",
            AuditAction::ViewPii => "VIEW_PII",
            AuditAction::DownloadPii => "DOWNLOAD_PII",
            AuditAction::DeletePii => "DELETE_PII",
            AuditAction::GrantPermission => "GRANT_PERMISSION",
            AuditAction::RevokePermission => "REVOKE_PERMISSION",
            AuditAction::InviteUser => "INVITE_USER",
            AuditAction::DeactivateUser => "DEACTIVATE_USER",
            AuditAction::SystemConfigChange => "SYSTEM_CONFIG_CHANGE",
            AuditAction::Restore => "RESTORE",
            AuditAction::Backup => "BACKUP",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AuditAction::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| AccessError::Validation(format!("unknown audit action: {s}")))
    }
}

/// Severity tag of an audit entry; variants are declared in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    /// Levels at or above `self`.
    pub fn at_least(self) -> Vec<RiskLevel> {
        RiskLevel::ALL.into_iter().filter(|r| *r >= self).collect()
    }
}

impl FromStr for RiskLevel {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskLevel::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| AccessError::Validation(format!("unknown risk level: {s}")))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub cnpj: Option<String>,
    pub plan: String,
    pub max_users: u32,
    pub max_agents: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Company {
    pub fn is_resolvable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }

    pub fn seat_limit(&self, class: SeatClass) -> u32 {
        match class {
            SeatClass::Users => self.max_users,
            SeatClass::Agents => self.max_agents,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub failed_login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.map_or(false, |until| until > now)
    }

    pub fn can_authenticate(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Waiting,
    Used,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invite {
    pub id: Uuid,
    #[serde(skip_serializing, default)]
    pub token_hash: String,
    pub email: String,
    pub role: Role,
    pub company_id: Uuid,
    pub invited_by_id: Uuid,
    pub used_by_id: Option<Uuid>,
    pub max_uses: u32,
    pub uses: u32,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    /// An invite expiring exactly now is already expired.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn is_single_use(&self) -> bool {
        self.max_uses == 1
    }

    pub fn is_exhausted(&self) -> bool {
        self.uses >= self.max_uses || (self.is_single_use() && self.used_by_id.is_some())
    }

    pub fn status(&self, now: DateTime<Utc>) -> InviteStatus {
        if self.is_exhausted() {
            InviteStatus::Used
        } else if self.is_expired(now) {
            InviteStatus::Expired
        } else {
            InviteStatus::Waiting
        }
    }

    /// Seats this invite still holds against its role class.
    pub fn reserved_seats(&self, now: DateTime<Utc>) -> u32 {
        if self.status(now) == InviteStatus::Waiting {
            self.max_uses - self.uses
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Active,
    Revoked,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing, default)]
    pub refresh_token_hash: String,
    #[serde(skip_serializing, default)]
    pub access_token_hash: Option<String>,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub is_valid: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// The stored `is_valid` flag alone is not authoritative.
    pub fn is_effectively_valid(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == SessionState::Active
    }

    pub fn state(&self, now: DateTime<Utc>) -> SessionState {
        if self.revoked_at.is_some() {
            SessionState::Revoked
        } else if self.expires_at <= now {
            SessionState::Expired
        } else if !self.is_valid {
            SessionState::Revoked
        } else {
            SessionState::Active
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub user_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub risk: RiskLevel,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Device metadata captured from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientInfo {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self { ip_address, user_agent }
    }
}

/// Audit entry awaiting persistence. Built by mutating components and handed
/// to the repository so it commits with the mutation it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: Option<Uuid>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub user_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub risk: RiskLevel,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    /// Entry with the policy risk for `action`.
    pub fn classified(action: AuditAction, entity_type: &str, now: DateTime<Utc>) -> Self {
        Self {
            action,
            entity_type: entity_type.to_string(),
            entity_id: None,
            old_data: None,
            new_data: None,
            user_id: None,
            company_id: None,
            risk: risk_for(action),
            ip_address: None,
            user_agent: None,
            created_at: now,
        }
    }

    pub fn entity(mut self, id: Uuid) -> Self {
        self.entity_id = Some(id);
        self
    }

    /// Acting user and tenant; either may be absent for system-level entries.
    pub fn by(mut self, user_id: Option<Uuid>, company_id: Option<Uuid>) -> Self {
        self.user_id = user_id;
        self.company_id = company_id;
        self
    }

    pub fn old(mut self, data: Value) -> Self {
        self.old_data = Some(data);
        self
    }

    pub fn new_data(mut self, data: Value) -> Self {
        self.new_data = Some(data);
        self
    }

    pub fn client(mut self, client: &ClientInfo) -> Self {
        self.ip_address = client.ip_address.clone();
        self.user_agent = client.user_agent.clone();
        self
    }

    pub fn into_log(self, id: Uuid) -> AuditLog {
        AuditLog {
            id,
            action: self.action,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            old_data: self.old_data,
            new_data: self.new_data,
            user_id: self.user_id,
            company_id: self.company_id,
            risk: self.risk,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            created_at: self.created_at,
        }
    }
}

/// Authenticated request context produced by the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub company_id: Uuid,
    pub role: Role,
    pub session_id: Uuid,
}

/// Admin-facing user creation input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserInput {
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: Role,
}

/// Fully prepared user row (password already hashed).
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub id: Uuid,
    pub company_id: Uuid,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub role: Role,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
    #[serde(default)]
    pub max_uses: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewInvite {
    pub id: Uuid,
    pub token_hash: String,
    pub email: String,
    pub role: Role,
    pub company_id: Uuid,
    pub invited_by_id: Uuid,
    pub max_uses: u32,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Result of issuing an invite. `token` is shown once and never stored.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedInvite {
    pub invite: Invite,
    pub token: String,
}

/// Who consumes an invite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedeemAccount {
    NewAccount { name: String, password: String },
    ExistingUser { user_id: Uuid },
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedeemTarget {
    Create(NewUser),
    Attach { user_id: Uuid, role: Role },
}

/// One redemption unit of work: the user write, the conditional use
/// increment and the audit entry commit together or not at all.
#[derive(Debug, Clone, PartialEq)]
pub struct InviteRedemption {
    pub invite_id: Uuid,
    pub single_use: bool,
    pub target: RedeemTarget,
    /// Set when the redeemer takes a seat it did not hold before.
    pub seat: Option<SeatClaim>,
    pub now: DateTime<Utc>,
    pub audit: NewAuditEntry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedeemOutcome {
    Redeemed(User),
    Exhausted,
    /// Uses remained but `expires_at` passed before the claim.
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub refresh_token_hash: String,
    pub access_token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Compare-and-set on the presented refresh digest.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRotation {
    pub session_id: Uuid,
    pub expected_refresh_hash: String,
    pub new_refresh_hash: Option<String>,
    pub access_token_hash: String,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub session: Session,
    pub tokens: TokenPair,
}

/// LOGOUT entry template for bulk revocation; one entry per revoked session.
#[derive(Debug, Clone, PartialEq)]
pub struct RevocationAudit {
    pub reason: String,
    pub actor_id: Option<Uuid>,
    pub company_id: Uuid,
    pub client: ClientInfo,
    pub now: DateTime<Utc>,
}

impl RevocationAudit {
    pub fn entry_for(&self, session_id: Uuid, owner_id: Uuid) -> NewAuditEntry {
        NewAuditEntry::classified(AuditAction::Logout, "session", self.now)
            .entity(session_id)
            .by(self.actor_id.or(Some(owner_id)), Some(self.company_id))
            .new_data(serde_json::json!({ "owner_id": owner_id, "reason": self.reason }))
            .client(&self.client)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeactivationOutcome {
    pub changed: bool,
    pub revoked_sessions: Vec<Uuid>,
}

/// Failed-password bookkeeping; applied only if the counter is still `expected_attempts`.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginFailure {
    pub user_id: Uuid,
    pub expected_attempts: u32,
    pub attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
    pub audit: NewAuditEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub action: Option<AuditAction>,
    pub min_risk: Option<RiskLevel>,
    pub user_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn matches(&self, log: &AuditLog) -> bool {
        self.action.map_or(true, |a| a == log.action)
            && self.min_risk.map_or(true, |r| log.risk >= r)
            && self.user_id.map_or(true, |u| log.user_id == Some(u))
            && self.entity_type.as_deref().map_or(true, |t| t == log.entity_type)
            && self.entity_id.map_or(true, |e| log.entity_id == Some(e))
            && self.from.map_or(true, |f| log.created_at >= f)
            && self.until.map_or(true, |u| log.created_at < u)
    }
}

/// Keyset position: the last `(created_at, id)` already delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuditCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl AuditCursor {
    pub fn of(log: &AuditLog) -> Self {
        Self { created_at: log.created_at, id: log.id }
    }
}

/// Support-workflow rows that may be the subject of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AuditSubject {
    User(Uuid),
    Conversation(Uuid),
    Message(Uuid),
    Ticket(Uuid),
}

impl AuditSubject {
    pub fn entity_type(&self) -> &'static str {
        match self {
            AuditSubject::User(_) => "user",
            AuditSubject::Conversation(_) => "conversation",
            AuditSubject::Message(_) => "message",
            AuditSubject::Ticket(_) => "ticket",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AuditSubject::User(id)
            | AuditSubject::Conversation(id)
            | AuditSubject::Message(id)
            | AuditSubject::Ticket(id) => *id,
        }
    }
}
