//! PostgreSQL repository on SeaORM.
//!
//! Each mutating method runs in one transaction. Guards are expressed as
//! conditional `UPDATE ... WHERE` statements and judged by `rows_affected`;
//! returning early drops the transaction, which rolls it back.

use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, TransactionTrait,
};

use models::{audit_log, company, conversation, invite, message, session, ticket, user};

use super::*;
use crate::domain::{InviteStatus, RedeemTarget};

pub struct SeaOrmIdentityRepository {
    pub db: DatabaseConnection,
}

impl SeaOrmIdentityRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn begin(&self) -> Result<DatabaseTransaction, RepoError> {
        self.db.begin().await.map_err(db_err)
    }
}

fn db_err(e: DbErr) -> RepoError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(detail)) => RepoError::Conflict(detail),
        _ => RepoError::Unavailable(e.to_string()),
    }
}

fn ts(t: DateTime<Utc>) -> DateTimeWithTimeZone {
    t.into()
}

fn utc(t: DateTimeWithTimeZone) -> DateTime<Utc> {
    t.with_timezone(&Utc)
}

fn count(n: i32) -> u32 {
    n.max(0) as u32
}

fn parse<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T, RepoError> {
    raw.parse().map_err(|_| RepoError::Corrupt(format!("{what}: {raw}")))
}

fn company_row(m: company::Model) -> Company {
    Company {
        id: m.id,
        name: m.name,
        slug: m.slug,
        cnpj: m.cnpj,
        plan: m.plan,
        max_users: count(m.max_users),
        max_agents: count(m.max_agents),
        is_active: m.is_active,
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
        deleted_at: m.deleted_at.map(utc),
    }
}

fn user_row(m: user::Model) -> Result<User, RepoError> {
    Ok(User {
        id: m.id,
        company_id: m.company_id,
        role: parse(&m.role, "user.role")?,
        email: m.email,
        name: m.name,
        password_hash: m.password_hash,
        is_active: m.is_active,
        is_email_verified: m.is_email_verified,
        failed_login_attempts: count(m.failed_login_attempts),
        locked_until: m.locked_until.map(utc),
        last_login_at: m.last_login_at.map(utc),
        created_at: utc(m.created_at),
        updated_at: utc(m.updated_at),
        deleted_at: m.deleted_at.map(utc),
    })
}

fn invite_row(m: invite::Model) -> Result<Invite, RepoError> {
    Ok(Invite {
        id: m.id,
        role: parse(&m.role, "invite.role")?,
        token_hash: m.token_hash,
        email: m.email,
        company_id: m.company_id,
        invited_by_id: m.invited_by_id,
        used_by_id: m.used_by_id,
        max_uses: count(m.max_uses),
        uses: count(m.uses),
        expires_at: utc(m.expires_at),
        used_at: m.used_at.map(utc),
        created_at: utc(m.created_at),
    })
}

fn session_row(m: session::Model) -> Session {
    Session {
        id: m.id,
        user_id: m.user_id,
        refresh_token_hash: m.refresh_token_hash,
        access_token_hash: m.access_token_hash,
        user_agent: m.user_agent,
        ip_address: m.ip_address,
        is_valid: m.is_valid,
        revoked_at: m.revoked_at.map(utc),
        revoked_reason: m.revoked_reason,
        expires_at: utc(m.expires_at),
        last_used_at: m.last_used_at.map(utc),
        created_at: utc(m.created_at),
    }
}

fn audit_row(m: audit_log::Model) -> Result<AuditLog, RepoError> {
    Ok(AuditLog {
        id: m.id,
        action: parse(&m.action, "audit_log.action")?,
        risk: parse(&m.risk, "audit_log.risk")?,
        entity_type: m.entity_type,
        entity_id: m.entity_id,
        old_data: m.old_data,
        new_data: m.new_data,
        user_id: m.user_id,
        company_id: m.company_id,
        ip_address: m.ip_address,
        user_agent: m.user_agent,
        created_at: utc(m.created_at),
    })
}

async fn insert_audit<C: ConnectionTrait>(conn: &C, entry: NewAuditEntry) -> Result<AuditLog, DbErr> {
    let log = entry.into_log(Uuid::new_v4());
    audit_log::ActiveModel {
        id: Set(log.id),
        action: Set(log.action.as_str().to_string()),
        entity_type: Set(log.entity_type.clone()),
        entity_id: Set(log.entity_id),
        old_data: Set(log.old_data.clone()),
        new_data: Set(log.new_data.clone()),
        user_id: Set(log.user_id),
        company_id: Set(log.company_id),
        risk: Set(log.risk.as_str().to_string()),
        ip_address: Set(log.ip_address.clone()),
        user_agent: Set(log.user_agent.clone()),
        created_at: Set(ts(log.created_at)),
    }
    .insert(conn)
    .await?;
    Ok(log)
}

async fn insert_user_row<C: ConnectionTrait>(conn: &C, u: NewUser) -> Result<user::Model, DbErr> {
    let at = ts(u.created_at);
    user::ActiveModel {
        id: Set(u.id),
        company_id: Set(u.company_id),
        email: Set(u.email),
        name: Set(u.name),
        password_hash: Set(u.password_hash),
        role: Set(u.role.as_str().to_string()),
        is_active: Set(true),
        is_email_verified: Set(false),
        failed_login_attempts: Set(0),
        locked_until: Set(None),
        last_login_at: Set(None),
        created_at: Set(at),
        updated_at: Set(at),
        deleted_at: Set(None),
    }
    .insert(conn)
    .await
}

/// Revoke every still-valid session of `user_id`, one LOGOUT row each.
async fn revoke_all_in(
    txn: &DatabaseTransaction,
    user_id: Uuid,
    revocation: &RevocationAudit,
) -> Result<Vec<Uuid>, DbErr> {
    let mut ids: Vec<Uuid> = session::Entity::find()
        .select_only()
        .column(session::Column::Id)
        .filter(session::Column::UserId.eq(user_id))
        .filter(session::Column::IsValid.eq(true))
        .into_tuple()
        .all(txn)
        .await?;
    ids.sort();

    let mut revoked = Vec::with_capacity(ids.len());
    for id in ids {
        let res = session::Entity::update_many()
            .col_expr(session::Column::IsValid, Expr::value(false))
            .col_expr(session::Column::RevokedAt, Expr::value(Some(ts(revocation.now))))
            .col_expr(session::Column::RevokedReason, Expr::value(Some(revocation.reason.clone())))
            .filter(session::Column::Id.eq(id))
            .filter(session::Column::IsValid.eq(true))
            .exec(txn)
            .await?;
        if res.rows_affected > 0 {
            insert_audit(txn, revocation.entry_for(id, user_id)).await?;
            revoked.push(id);
        }
    }
    Ok(revoked)
}

fn live_users() -> Condition {
    Condition::all().add(user::Column::DeletedAt.is_null())
}

async fn count_active_in<C: ConnectionTrait>(conn: &C, company_id: Uuid, class: SeatClass) -> Result<u64, DbErr> {
    user::Entity::find()
        .filter(live_users())
        .filter(user::Column::CompanyId.eq(company_id))
        .filter(user::Column::IsActive.eq(true))
        .filter(user::Column::Role.is_in(class.roles().iter().map(|r| r.as_str())))
        .count(conn)
        .await
}

async fn count_reserved_in<C: ConnectionTrait>(
    conn: &C,
    company_id: Uuid,
    class: SeatClass,
    now: DateTime<Utc>,
) -> Result<u64, RepoError> {
    let rows = invite::Entity::find()
        .filter(invite::Column::CompanyId.eq(company_id))
        .filter(invite::Column::Role.is_in(class.roles().iter().map(|r| r.as_str())))
        .filter(invite::Column::ExpiresAt.gt(ts(now)))
        .filter(Expr::col(invite::Column::Uses).lt(Expr::col(invite::Column::MaxUses)))
        .all(conn)
        .await
        .map_err(db_err)?;
    let mut reserved = 0u64;
    for row in rows {
        reserved += u64::from(invite_row(row)?.reserved_seats(now));
    }
    Ok(reserved)
}

/// Lock the company row (`SELECT ... FOR UPDATE`) and count seats under it.
/// Concurrent claims on one company queue here until the holder commits.
async fn claim_seats(txn: &DatabaseTransaction, claim: &SeatClaim) -> Result<(), RepoError> {
    let company = company::Entity::find_by_id(claim.company_id)
        .filter(company::Column::DeletedAt.is_null())
        .lock_exclusive()
        .one(txn)
        .await
        .map_err(db_err)?
        .map(company_row)
        .filter(Company::is_resolvable)
        .ok_or(RepoError::TenantGone)?;
    let active = count_active_in(txn, claim.company_id, claim.class).await.map_err(db_err)?;
    let reserved = if claim.count_reserved {
        count_reserved_in(txn, claim.company_id, claim.class, claim.now).await?
    } else {
        0
    };
    if !claim.fits(company.seat_limit(claim.class), active, reserved) {
        return Err(RepoError::SeatsExhausted(claim.class));
    }
    Ok(())
}

#[async_trait]
impl IdentityRepository for SeaOrmIdentityRepository {
    async fn find_company(&self, company_id: Uuid) -> Result<Option<Company>, RepoError> {
        let row = company::Entity::find_by_id(company_id)
            .filter(company::Column::DeletedAt.is_null())
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(row.map(company_row))
    }

    async fn count_active_users(&self, company_id: Uuid, class: SeatClass) -> Result<u64, RepoError> {
        count_active_in(&self.db, company_id, class).await.map_err(db_err)
    }

    async fn count_reserved_seats(&self, company_id: Uuid, class: SeatClass, now: DateTime<Utc>) -> Result<u64, RepoError> {
        count_reserved_in(&self.db, company_id, class, now).await
    }

    async fn find_user(&self, user_id: Uuid) -> Result<Option<User>, RepoError> {
        user::Entity::find_by_id(user_id)
            .filter(live_users())
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(user_row)
            .transpose()
    }

    async fn find_user_in_company(&self, company_id: Uuid, user_id: Uuid) -> Result<Option<User>, RepoError> {
        user::Entity::find_by_id(user_id)
            .filter(live_users())
            .filter(user::Column::CompanyId.eq(company_id))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(user_row)
            .transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, RepoError> {
        user::Entity::find()
            .filter(live_users())
            .filter(user::Column::Email.eq(email))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(user_row)
            .transpose()
    }

    async fn insert_user(&self, new_user: NewUser, seat: SeatClaim, audit: NewAuditEntry) -> Result<User, RepoError> {
        let txn = self.begin().await?;
        claim_seats(&txn, &seat).await?;
        let row = insert_user_row(&txn, new_user).await.map_err(db_err)?;
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        user_row(row)
    }

    async fn record_login_failure(&self, failure: LoginFailure) -> Result<bool, RepoError> {
        let txn = self.begin().await?;
        let res = user::Entity::update_many()
            .col_expr(user::Column::FailedLoginAttempts, Expr::value(failure.attempts as i32))
            .col_expr(user::Column::LockedUntil, Expr::value(failure.locked_until.map(ts)))
            .col_expr(user::Column::UpdatedAt, Expr::value(ts(failure.now)))
            .filter(user::Column::Id.eq(failure.user_id))
            .filter(user::Column::FailedLoginAttempts.eq(failure.expected_attempts as i32))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        insert_audit(&txn, failure.audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn record_login_success(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Option<User>, RepoError> {
        user::Entity::update_many()
            .col_expr(user::Column::FailedLoginAttempts, Expr::value(0))
            .col_expr(user::Column::LockedUntil, Expr::value(Option::<DateTimeWithTimeZone>::None))
            .col_expr(user::Column::LastLoginAt, Expr::value(Some(ts(now))))
            .col_expr(user::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(user::Column::Id.eq(user_id))
            .filter(live_users())
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        self.find_user(user_id).await
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
        let txn = self.begin().await?;
        if let Some(seat) = &seat {
            claim_seats(&txn, seat).await?;
        }
        let res = user::Entity::update_many()
            .col_expr(user::Column::Role, Expr::value(role.as_str()))
            .col_expr(user::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::Role.eq(expected.as_str()))
            .filter(live_users())
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn deactivate_user(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
        revocation: RevocationAudit,
    ) -> Result<DeactivationOutcome, RepoError> {
        let txn = self.begin().await?;
        let res = user::Entity::update_many()
            .col_expr(user::Column::IsActive, Expr::value(false))
            .col_expr(user::Column::UpdatedAt, Expr::value(ts(now)))
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::IsActive.eq(true))
            .filter(live_users())
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if res.rows_affected == 0 {
            return Ok(DeactivationOutcome::default());
        }
        insert_audit(&txn, audit).await.map_err(db_err)?;
        let revoked = revoke_all_in(&txn, user_id, &revocation).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(DeactivationOutcome { changed: true, revoked_sessions: revoked })
    }

    async fn insert_invite(&self, new_invite: NewInvite, seat: SeatClaim, audit: NewAuditEntry) -> Result<Invite, RepoError> {
        let txn = self.begin().await?;
        claim_seats(&txn, &seat).await?;
        let row = invite::ActiveModel {
            id: Set(new_invite.id),
            token_hash: Set(new_invite.token_hash),
            email: Set(new_invite.email),
            role: Set(new_invite.role.as_str().to_string()),
            company_id: Set(new_invite.company_id),
            invited_by_id: Set(new_invite.invited_by_id),
            used_by_id: Set(None),
            max_uses: Set(new_invite.max_uses as i32),
            uses: Set(0),
            expires_at: Set(ts(new_invite.expires_at)),
            used_at: Set(None),
            created_at: Set(ts(new_invite.created_at)),
        }
        .insert(&txn)
        .await
        .map_err(db_err)?;
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        invite_row(row)
    }

    async fn find_invite_by_token_hash(&self, token_hash: &str) -> Result<Option<Invite>, RepoError> {
        invite::Entity::find()
            .filter(invite::Column::TokenHash.eq(token_hash))
            .one(&self.db)
            .await
            .map_err(db_err)?
            .map(invite_row)
            .transpose()
    }

    async fn list_pending_invites(&self, company_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Invite>, RepoError> {
        let rows = invite::Entity::find()
            .filter(invite::Column::CompanyId.eq(company_id))
            .filter(invite::Column::ExpiresAt.gt(ts(now)))
            .order_by_asc(invite::Column::CreatedAt)
            .order_by_asc(invite::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        let mut pending = Vec::with_capacity(rows.len());
        for row in rows {
            let inv = invite_row(row)?;
            if inv.status(now) == InviteStatus::Waiting {
                pending.push(inv);
            }
        }
        Ok(pending)
    }

    async fn redeem_invite(&self, redemption: InviteRedemption) -> Result<RedeemOutcome, RepoError> {
        let InviteRedemption { invite_id, single_use, target, seat, now, audit } = redemption;
        let txn = self.begin().await?;

        // claim a use first; the row lock holds off concurrent redeemers
        let mut claim = invite::Entity::update_many()
            .col_expr(invite::Column::Uses, Expr::col(invite::Column::Uses).add(1))
            .col_expr(invite::Column::UsedAt, Expr::value(Some(ts(now))))
            .filter(invite::Column::Id.eq(invite_id))
            .filter(invite::Column::ExpiresAt.gt(ts(now)))
            .filter(Expr::col(invite::Column::Uses).lt(Expr::col(invite::Column::MaxUses)));
        if single_use {
            claim = claim.filter(invite::Column::UsedById.is_null());
        }
        if claim.exec(&txn).await.map_err(db_err)?.rows_affected == 0 {
            let current = invite::Entity::find_by_id(invite_id)
                .one(&txn)
                .await
                .map_err(db_err)?
                .map(invite_row)
                .transpose()?;
            return Ok(match current {
                Some(inv) if !inv.is_exhausted() && inv.is_expired(now) => RedeemOutcome::Expired,
                _ => RedeemOutcome::Exhausted,
            });
        }
        if let Some(seat) = &seat {
            claim_seats(&txn, seat).await?;
        }

        let row = match target {
            RedeemTarget::Create(new_user) => insert_user_row(&txn, new_user).await.map_err(db_err)?,
            RedeemTarget::Attach { user_id, role } => {
                let res = user::Entity::update_many()
                    .col_expr(user::Column::Role, Expr::value(role.as_str()))
                    .col_expr(user::Column::UpdatedAt, Expr::value(ts(now)))
                    .filter(user::Column::Id.eq(user_id))
                    .filter(live_users())
                    .exec(&txn)
                    .await
                    .map_err(db_err)?;
                if res.rows_affected == 0 {
                    return Err(RepoError::Corrupt(format!("user {user_id} vanished during redemption")));
                }
                user::Entity::find_by_id(user_id)
                    .one(&txn)
                    .await
                    .map_err(db_err)?
                    .ok_or_else(|| RepoError::Corrupt(format!("user {user_id} vanished during redemption")))?
            }
        };

        if single_use {
            invite::Entity::update_many()
                .col_expr(invite::Column::UsedById, Expr::value(Some(row.id)))
                .filter(invite::Column::Id.eq(invite_id))
                .exec(&txn)
                .await
                .map_err(db_err)?;
        }
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(RedeemOutcome::Redeemed(user_row(row)?))
    }

    async fn insert_session(&self, new_session: NewSession, audit: NewAuditEntry) -> Result<Session, RepoError> {
        let txn = self.begin().await?;
        let row = session::ActiveModel {
            id: Set(new_session.id),
            user_id: Set(new_session.user_id),
            refresh_token_hash: Set(new_session.refresh_token_hash),
            access_token_hash: Set(Some(new_session.access_token_hash)),
            user_agent: Set(new_session.user_agent),
            ip_address: Set(new_session.ip_address),
            is_valid: Set(true),
            revoked_at: Set(None),
            revoked_reason: Set(None),
            expires_at: Set(ts(new_session.expires_at)),
            last_used_at: Set(None),
            created_at: Set(ts(new_session.created_at)),
        }
        .insert(&txn)
        .await
        .map_err(db_err)?;
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(session_row(row))
    }

    async fn find_session(&self, session_id: Uuid) -> Result<Option<Session>, RepoError> {
        let row = session::Entity::find_by_id(session_id).one(&self.db).await.map_err(db_err)?;
        Ok(row.map(session_row))
    }

    async fn find_session_by_refresh_hash(&self, refresh_hash: &str) -> Result<Option<Session>, RepoError> {
        let row = session::Entity::find()
            .filter(session::Column::RefreshTokenHash.eq(refresh_hash))
            .one(&self.db)
            .await
            .map_err(db_err)?;
        Ok(row.map(session_row))
    }

    async fn rotate_session(&self, rotation: SessionRotation) -> Result<bool, RepoError> {
        let mut update = session::Entity::update_many()
            .col_expr(session::Column::AccessTokenHash, Expr::value(Some(rotation.access_token_hash)))
            .col_expr(session::Column::LastUsedAt, Expr::value(Some(ts(rotation.now))));
        if let Some(new_hash) = rotation.new_refresh_hash {
            update = update.col_expr(session::Column::RefreshTokenHash, Expr::value(new_hash));
        }
        let res = update
            .filter(session::Column::Id.eq(rotation.session_id))
            .filter(session::Column::RefreshTokenHash.eq(rotation.expected_refresh_hash))
            .filter(session::Column::IsValid.eq(true))
            .filter(session::Column::RevokedAt.is_null())
            .filter(session::Column::ExpiresAt.gt(ts(rotation.now)))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected > 0)
    }

    async fn mark_session_expired(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<bool, RepoError> {
        let res = session::Entity::update_many()
            .col_expr(session::Column::IsValid, Expr::value(false))
            .filter(session::Column::Id.eq(session_id))
            .filter(session::Column::IsValid.eq(true))
            .filter(session::Column::ExpiresAt.lte(ts(now)))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected > 0)
    }

    async fn revoke_session(
        &self,
        session_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
        audit: NewAuditEntry,
    ) -> Result<bool, RepoError> {
        let txn = self.begin().await?;
        let res = session::Entity::update_many()
            .col_expr(session::Column::IsValid, Expr::value(false))
            .col_expr(session::Column::RevokedAt, Expr::value(Some(ts(now))))
            .col_expr(session::Column::RevokedReason, Expr::value(Some(reason.to_string())))
            .filter(session::Column::Id.eq(session_id))
            .filter(session::Column::IsValid.eq(true))
            .exec(&txn)
            .await
            .map_err(db_err)?;
        if res.rows_affected == 0 {
            return Ok(false);
        }
        insert_audit(&txn, audit).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(true)
    }

    async fn revoke_user_sessions(
        &self,
        user_id: Uuid,
        _now: DateTime<Utc>,
        revocation: RevocationAudit,
    ) -> Result<Vec<Uuid>, RepoError> {
        let txn = self.begin().await?;
        let revoked = revoke_all_in(&txn, user_id, &revocation).await.map_err(db_err)?;
        txn.commit().await.map_err(db_err)?;
        Ok(revoked)
    }

    async fn list_active_sessions(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Session>, RepoError> {
        let rows = session::Entity::find()
            .filter(session::Column::UserId.eq(user_id))
            .filter(session::Column::IsValid.eq(true))
            .filter(session::Column::RevokedAt.is_null())
            .filter(session::Column::ExpiresAt.gt(ts(now)))
            .order_by_asc(session::Column::CreatedAt)
            .order_by_asc(session::Column::Id)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(session_row).collect())
    }

    async fn sweep_expired_sessions(&self, now: DateTime<Utc>) -> Result<u64, RepoError> {
        let res = session::Entity::update_many()
            .col_expr(session::Column::IsValid, Expr::value(false))
            .filter(session::Column::IsValid.eq(true))
            .filter(session::Column::ExpiresAt.lte(ts(now)))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(res.rows_affected)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditLog, RepoError> {
        insert_audit(&self.db, entry).await.map_err(db_err)
    }

    async fn audit_page(
        &self,
        company_id: Uuid,
        filter: &AuditFilter,
        after: Option<AuditCursor>,
        limit: u64,
    ) -> Result<Vec<AuditLog>, RepoError> {
        let mut query = audit_log::Entity::find().filter(audit_log::Column::CompanyId.eq(company_id));
        if let Some(action) = filter.action {
            query = query.filter(audit_log::Column::Action.eq(action.as_str()));
        }
        if let Some(min) = filter.min_risk {
            query = query.filter(audit_log::Column::Risk.is_in(min.at_least().into_iter().map(|r| r.as_str())));
        }
        if let Some(user_id) = filter.user_id {
            query = query.filter(audit_log::Column::UserId.eq(user_id));
        }
        if let Some(entity_type) = &filter.entity_type {
            query = query.filter(audit_log::Column::EntityType.eq(entity_type.as_str()));
        }
        if let Some(entity_id) = filter.entity_id {
            query = query.filter(audit_log::Column::EntityId.eq(entity_id));
        }
        if let Some(from) = filter.from {
            query = query.filter(audit_log::Column::CreatedAt.gte(ts(from)));
        }
        if let Some(until) = filter.until {
            query = query.filter(audit_log::Column::CreatedAt.lt(ts(until)));
        }
        if let Some(cursor) = after {
            query = query.filter(
                Condition::any().add(audit_log::Column::CreatedAt.gt(ts(cursor.created_at))).add(
                    Condition::all()
                        .add(audit_log::Column::CreatedAt.eq(ts(cursor.created_at)))
                        .add(audit_log::Column::Id.gt(cursor.id)),
                ),
            );
        }
        let rows = query
            .order_by_asc(audit_log::Column::CreatedAt)
            .order_by_asc(audit_log::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(audit_row).collect()
    }

    async fn subject_company(&self, subject: AuditSubject) -> Result<Option<Uuid>, RepoError> {
        match subject {
            AuditSubject::User(id) => Ok(self.find_user(id).await?.map(|u| u.company_id)),
            AuditSubject::Conversation(id) => {
                let row = conversation::Entity::find_by_id(id).one(&self.db).await.map_err(db_err)?;
                Ok(row.map(|c| c.company_id))
            }
            AuditSubject::Message(id) => {
                let Some(msg) = message::Entity::find_by_id(id).one(&self.db).await.map_err(db_err)? else {
                    return Ok(None);
                };
                let row = conversation::Entity::find_by_id(msg.conversation_id).one(&self.db).await.map_err(db_err)?;
                Ok(row.map(|c| c.company_id))
            }
            AuditSubject::Ticket(id) => {
                let row = ticket::Entity::find_by_id(id).one(&self.db).await.map_err(db_err)?;
                Ok(row.map(|t| t.company_id))
            }
        }
    }
}
