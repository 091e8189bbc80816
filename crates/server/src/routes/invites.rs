use axum::{extract::State, http::HeaderMap, Extension, Json};
use serde::{Deserialize, Serialize};

use service::domain::{AuthContext, Invite, InviteRequest, IssuedInvite, User};

use super::{client_info, AppState};
use crate::errors::ApiError;

#[derive(Debug, Deserialize)]
pub struct RedeemInput {
    pub token: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptInput {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct InviteList {
    pub items: Vec<Invite>,
}

pub async fn issue(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(req): Json<InviteRequest>,
) -> Result<Json<IssuedInvite>, ApiError> {
    Ok(Json(state.gate.issue_invite(&ctx, req, &client_info(&headers)).await?))
}

pub async fn list_pending(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<InviteList>, ApiError> {
    let items = state.gate.pending_invites(&ctx).await?;
    Ok(Json(InviteList { items }))
}

/// Unauthenticated: creates the account the invite was sent for.
pub async fn redeem(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<RedeemInput>,
) -> Result<Json<User>, ApiError> {
    let user = state.gate.redeem_invite(&input.token, input.name, input.password, &client_info(&headers)).await?;
    Ok(Json(user))
}

pub async fn accept(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    headers: HeaderMap,
    Json(input): Json<AcceptInput>,
) -> Result<Json<User>, ApiError> {
    Ok(Json(state.gate.accept_invite(&ctx, &input.token, &client_info(&headers)).await?))
}
