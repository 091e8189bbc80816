use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use service::domain::{AuthContext, CreateUserInput, Role, User};

use super::{client_info, AppState};
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct RoleInput {
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct DeactivatedOutput {
    pub user_id: Uuid,
    pub revoked_sessions: Vec<Uuid>,
}

pub async fn create(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<CreateUserInput>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let user = state.gate.create_user(&ctx, input, &client_info(&headers)).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn set_role(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(input): Json<RoleInput>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.gate.set_role(&ctx, id, input.role, &client_info(&headers)).await?))
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<DeactivatedOutput>, ApiError> {
    let revoked_sessions = state.gate.deactivate_user(&ctx, id, &client_info(&headers)).await?;
    Ok(Json(DeactivatedOutput { user_id: id, revoked_sessions }))
}
