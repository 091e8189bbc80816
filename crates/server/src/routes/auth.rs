use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use service::domain::{AuthContext, IssuedSession, Session, TokenPair};
use service::AccessError;

use super::{client_info, AppState};
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct LoginInput {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshInput {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RevokedOutput {
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct RevokedAllOutput {
    pub revoked_sessions: Vec<Uuid>,
}

/// Resolve `Authorization: Bearer <access token>` into an [`AuthContext`]
/// extension for downstream handlers.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AccessError::SessionInvalid)?
        .to_owned();
    let ctx = state.gate.authenticate(&token).await?;
    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<LoginInput>,
) -> Result<Json<IssuedSession>, ApiError> {
    let issued = state.gate.login(&input.email, &input.password, &client_info(&headers)).await?;
    Ok(Json(issued))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(input): Json<RefreshInput>,
) -> Result<Json<TokenPair>, ApiError> {
    Ok(Json(state.gate.refresh(&input.refresh_token).await?))
}

pub async fn me(Extension(ctx): Extension<AuthContext>) -> Json<AuthContext> {
    Json(ctx)
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<RevokedOutput>, ApiError> {
    let revoked = state.gate.logout(&ctx, &client_info(&headers)).await?;
    Ok(Json(RevokedOutput { revoked }))
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
) -> Result<Json<RevokedAllOutput>, ApiError> {
    let revoked_sessions = state.gate.logout_everywhere(&ctx, &client_info(&headers)).await?;
    Ok(Json(RevokedAllOutput { revoked_sessions }))
}

pub async fn list_sessions(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.gate.list_sessions(&ctx).await?))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<RevokedOutput>, ApiError> {
    let revoked = state.gate.revoke_session(&ctx, id, &client_info(&headers)).await?;
    Ok(Json(RevokedOutput { revoked }))
}
