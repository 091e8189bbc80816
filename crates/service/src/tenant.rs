//! TenantRegistry: company resolution and seat accounting (read-only).
//!
//! These checks fail fast before any work is done. The repository repeats
//! them inside the writing transaction via [`SeatClaim`](crate::domain::SeatClaim).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{Company, Role};
use crate::errors::AccessError;
use crate::repository::IdentityRepository;
use crate::retry::{retry_read, RetryPolicy};

#[derive(Clone)]
pub struct TenantRegistry {
    repo: Arc<dyn IdentityRepository>,
    retry: RetryPolicy,
}

impl TenantRegistry {
    pub fn new(repo: Arc<dyn IdentityRepository>, retry: RetryPolicy) -> Self {
        Self { repo, retry }
    }

    /// Active, non-deleted company or `TenantNotFound`.
    #[instrument(skip(self))]
    pub async fn resolve(&self, company_id: Uuid) -> Result<Company, AccessError> {
        let company = retry_read(&self.retry, move || self.repo.find_company(company_id)).await?;
        match company {
            Some(c) if c.is_resolvable() => Ok(c),
            _ => Err(AccessError::TenantNotFound),
        }
    }

    /// Seats held by active users plus outstanding invites must leave room
    /// for one more `role`.
    pub async fn check_quota(&self, company_id: Uuid, role: Role, now: DateTime<Utc>) -> Result<(), AccessError> {
        self.check_quota_for(company_id, role, 1, now).await
    }

    /// Like [`check_quota`](Self::check_quota) for an invite reserving `seats` at once.
    #[instrument(skip(self))]
    pub async fn check_quota_for(
        &self,
        company_id: Uuid,
        role: Role,
        seats: u32,
        now: DateTime<Utc>,
    ) -> Result<(), AccessError> {
        let company = self.resolve(company_id).await?;
        let class = role.seat_class();
        let active = retry_read(&self.retry, move || self.repo.count_active_users(company_id, class)).await?;
        let reserved = retry_read(&self.retry, move || self.repo.count_reserved_seats(company_id, class, now)).await?;
        let limit = u64::from(company.seat_limit(class));
        debug!(?class, active, reserved, limit, "seat usage");
        if active + reserved + u64::from(seats) > limit {
            return Err(AccessError::QuotaExceeded(class));
        }
        Ok(())
    }

    /// Invite redemption: only active users count, the invite being redeemed
    /// already holds its reservation.
    #[instrument(skip(self))]
    pub async fn ensure_seat(&self, company_id: Uuid, role: Role) -> Result<(), AccessError> {
        let company = self.resolve(company_id).await?;
        let class = role.seat_class();
        let active = retry_read(&self.retry, move || self.repo.count_active_users(company_id, class)).await?;
        if active >= u64::from(company.seat_limit(class)) {
            return Err(AccessError::QuotaExceeded(class));
        }
        Ok(())
    }
}
