use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::types::ErrorBody;
use service::AccessError;
use thiserror::Error;
use tracing::{error, warn};

/// Handler error: an [`AccessError`] rendered as `{code, error}` JSON.
#[derive(Debug)]
pub struct ApiError(pub AccessError);

impl From<AccessError> for ApiError {
    fn from(e: AccessError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AccessError::Validation(_) => StatusCode::BAD_REQUEST,
            AccessError::InvalidCredentials | AccessError::AccountLocked | AccessError::SessionInvalid => {
                StatusCode::UNAUTHORIZED
            }
            AccessError::Forbidden => StatusCode::FORBIDDEN,
            AccessError::TenantNotFound | AccessError::NotFound(_) | AccessError::InviteNotFound => {
                StatusCode::NOT_FOUND
            }
            AccessError::Conflict(_) | AccessError::QuotaExceeded(_) => StatusCode::CONFLICT,
            AccessError::InviteExpired | AccessError::InviteExhausted => StatusCode::GONE,
            AccessError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AccessError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AccessError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the caller. A locked account is indistinguishable from a
    /// wrong password, and storage details never leave the process.
    pub fn body(&self) -> ErrorBody {
        match &self.0 {
            AccessError::InvalidCredentials | AccessError::AccountLocked => {
                let e = AccessError::InvalidCredentials;
                ErrorBody::new(e.code(), e.to_string())
            }
            AccessError::StorageUnavailable(_) => ErrorBody::new(self.0.code(), "storage unavailable"),
            AccessError::Internal(_) => ErrorBody::new(self.0.code(), "internal error"),
            other => ErrorBody::new(other.code(), other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "request failed");
        } else if status == StatusCode::UNAUTHORIZED {
            warn!(code = self.0.code(), "unauthorized");
        }
        (status, Json(self.body())).into_response()
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("database setup failed: {0}")]
    Database(String),
    #[error(transparent)]
    Any(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::domain::SeatClass;

    #[test]
    fn locked_account_looks_like_bad_password() {
        let locked = ApiError(AccessError::AccountLocked);
        let wrong = ApiError(AccessError::InvalidCredentials);
        assert_eq!(locked.status(), wrong.status());
        assert_eq!(locked.body(), wrong.body());
    }

    #[test]
    fn storage_details_are_hidden() {
        let err = ApiError(AccessError::StorageUnavailable("pool timed out at 10.0.0.3".into()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.body().error, "storage unavailable");
    }

    #[test]
    fn maps_domain_failures() {
        assert_eq!(ApiError(AccessError::QuotaExceeded(SeatClass::Agents)).status(), StatusCode::CONFLICT);
        assert_eq!(ApiError(AccessError::InviteExhausted).status(), StatusCode::GONE);
        assert_eq!(ApiError(AccessError::NotFound("session")).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError(AccessError::Timeout).status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
