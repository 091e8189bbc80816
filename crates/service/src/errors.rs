use thiserror::Error;

use crate::domain::SeatClass;

/// Failures surfaced by the identity core.
///
/// Credential failures keep their precise cause here (and in the audit
/// trail); the HTTP layer collapses them before they leave the process.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("tenant not found")]
    TenantNotFound,
    #[error("seat quota exceeded for {0:?}")]
    QuotaExceeded(SeatClass),
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked")]
    AccountLocked,
    #[error("forbidden")]
    Forbidden,
    #[error("invite not found")]
    InviteNotFound,
    #[error("invite expired")]
    InviteExpired,
    #[error("invite exhausted")]
    InviteExhausted,
    #[error("session invalid")]
    SessionInvalid,
    #[error("operation timed out")]
    Timeout,
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    /// Stable numeric code for external mapping/logging
    pub fn code(&self) -> u16 {
        match self {
            AccessError::Validation(_) => 1001,
            AccessError::Conflict(_) => 1002,
            AccessError::NotFound(_) => 1003,
            AccessError::InvalidCredentials => 1004,
            AccessError::AccountLocked => 1005,
            AccessError::SessionInvalid => 1006,
            AccessError::Forbidden => 1007,
            AccessError::TenantNotFound => 1010,
            AccessError::QuotaExceeded(_) => 1011,
            AccessError::InviteNotFound => 1020,
            AccessError::InviteExpired => 1021,
            AccessError::InviteExhausted => 1022,
            AccessError::Internal(_) => 1101,
            AccessError::Timeout => 1201,
            AccessError::StorageUnavailable(_) => 1200,
        }
    }

    /// Only transient storage failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AccessError::StorageUnavailable(_))
    }
}

/// Repository-level failures, independent of the backing store.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("unique constraint: {0}")]
    Conflict(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("no free {0:?} seat")]
    SeatsExhausted(SeatClass),
    #[error("company missing or inactive")]
    TenantGone,
}

impl From<RepoError> for AccessError {
    fn from(e: RepoError) -> Self {
        match e {
            RepoError::Unavailable(msg) => AccessError::StorageUnavailable(msg),
            RepoError::Conflict(msg) => AccessError::Conflict(msg),
            RepoError::Corrupt(msg) => AccessError::Internal(msg),
            RepoError::SeatsExhausted(class) => AccessError::QuotaExceeded(class),
            RepoError::TenantGone => AccessError::TenantNotFound,
        }
    }
}

impl From<models::errors::ModelError> for AccessError {
    fn from(e: models::errors::ModelError) -> Self {
        match e {
            models::errors::ModelError::Validation(msg) => AccessError::Validation(msg),
            models::errors::ModelError::Db(msg) => AccessError::StorageUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let all = [
            AccessError::TenantNotFound,
            AccessError::QuotaExceeded(SeatClass::Agents),
            AccessError::InvalidCredentials,
            AccessError::AccountLocked,
            AccessError::Forbidden,
            AccessError::InviteNotFound,
            AccessError::InviteExpired,
            AccessError::InviteExhausted,
            AccessError::SessionInvalid,
            AccessError::Timeout,
            AccessError::StorageUnavailable("x".into()),
            AccessError::Validation("x".into()),
            AccessError::Conflict("x".into()),
            AccessError::NotFound("user"),
            AccessError::Internal("x".into()),
        ];
        let mut codes: Vec<u16> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn only_storage_unavailable_retries() {
        assert!(AccessError::StorageUnavailable("down".into()).is_retryable());
        assert!(!AccessError::Timeout.is_retryable());
        assert!(!AccessError::Conflict("dup".into()).is_retryable());
    }

    #[test]
    fn repo_errors_map_into_taxonomy() {
        assert!(matches!(AccessError::from(RepoError::Unavailable("x".into())), AccessError::StorageUnavailable(_)));
        assert!(matches!(AccessError::from(RepoError::Conflict("x".into())), AccessError::Conflict(_)));
        assert!(matches!(AccessError::from(RepoError::Corrupt("x".into())), AccessError::Internal(_)));
        assert!(matches!(
            AccessError::from(RepoError::SeatsExhausted(SeatClass::Users)),
            AccessError::QuotaExceeded(SeatClass::Users)
        ));
        assert!(matches!(AccessError::from(RepoError::TenantGone), AccessError::TenantNotFound));
    }
}
