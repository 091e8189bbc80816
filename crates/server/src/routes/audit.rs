use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use service::domain::{AuditAction, AuditFilter, AuditLog, AuditSubject, AuthContext, RiskLevel};
use service::pagination::Page;

use super::{client_info, AppState};
use crate::errors::ApiError;

/// `GET /audit` query string; every filter is optional.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub action: Option<AuditAction>,
    pub min_risk: Option<RiskLevel>,
    pub user_id: Option<Uuid>,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cursor: Option<String>,
    pub limit: Option<u64>,
}

impl AuditQuery {
    fn filter(&self) -> AuditFilter {
        AuditFilter {
            action: self.action,
            min_risk: self.min_risk,
            user_id: self.user_id,
            entity_type: self.entity_type.clone(),
            entity_id: self.entity_id,
            from: self.from,
            until: self.until,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AccessInput {
    pub subject: AuditSubject,
    pub action: AuditAction,
}

pub async fn page(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Query(q): Query<AuditQuery>,
) -> Result<Json<Page<AuditLog>>, ApiError> {
    let page = state.gate.audit_page(&ctx, &q.filter(), q.cursor.as_deref(), q.limit).await?;
    Ok(Json(page))
}

pub async fn record_access(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<AccessInput>,
) -> Result<(StatusCode, Json<AuditLog>), ApiError> {
    let entry = state.gate.record_subject_access(&ctx, input.subject, input.action, &client_info(&headers)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
