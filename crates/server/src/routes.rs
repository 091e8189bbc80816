use axum::{
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use common::types::Health;
use service::domain::ClientInfo;
use service::AccessGate;

pub mod audit;
pub mod auth;
pub mod invites;
pub mod users;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gate: AccessGate,
}

impl AppState {
    pub fn new(gate: AccessGate) -> Self {
        Self { gate }
    }
}

pub async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn metrics() -> impl IntoResponse {
    match service::metrics::encode_metrics() {
        Ok(text) => (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "metrics encoding failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Caller address and agent as reported by the proxy in front of us.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let text = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty());
    let ip = text("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .or_else(|| text("x-real-ip"))
        .map(String::from);
    let agent = text(header::USER_AGENT.as_str()).map(String::from);
    ClientInfo::new(ip, agent)
}

/// Build the application router: public auth endpoints plus everything
/// behind a bearer session.
pub fn build_router(state: AppState, cors: CorsLayer) -> Router {
    let public = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/invites/redeem", post(invites::redeem));

    let protected = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/logout-all", post(auth::logout_all))
        .route("/auth/sessions", get(auth::list_sessions))
        .route("/auth/sessions/:id", delete(auth::revoke_session))
        .route("/invites", get(invites::list_pending).post(invites::issue))
        .route("/invites/accept", post(invites::accept))
        .route("/users", post(users::create))
        .route("/users/:id/role", put(users::set_role))
        .route("/users/:id/deactivate", post(users::deactivate))
        .route("/audit", get(audit::page))
        .route("/audit/access", post(audit::record_access))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_session));

    public
        .merge(protected)
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO).include_headers(false))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                // status and latency
                .on_response(DefaultOnResponse::new().level(Level::INFO).include_headers(false))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn client_info_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.4, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("10.0.0.1"));
        headers.insert(header::USER_AGENT, HeaderValue::from_static("desk/2.1"));
        let info = client_info(&headers);
        assert_eq!(info.ip_address.as_deref(), Some("198.51.100.4"));
        assert_eq!(info.user_agent.as_deref(), Some("desk/2.1"));
    }

    #[test]
    fn client_info_tolerates_missing_headers() {
        assert_eq!(client_info(&HeaderMap::new()), ClientInfo::default());
    }
}
