use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use common::utils::logging::init_logging;
use configs::AppConfig;
use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use service::ports::Ports;
use service::repository::seaorm::SeaOrmIdentityRepository;
use service::{AccessGate, IdentityConfig};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::errors::StartupError;
use crate::routes::{self, AppState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Load and validate configuration; `SERVER_HOST`/`SERVER_PORT` override the file.
fn load_config() -> Result<AppConfig, StartupError> {
    let mut cfg = configs::load_default().unwrap_or_else(|e| {
        warn!(error = %e, "config file not loaded; using defaults and environment");
        AppConfig::default()
    });
    if let Ok(host) = env::var("SERVER_HOST") {
        cfg.server.host = host;
    }
    if let Some(port) = env::var("SERVER_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        cfg.server.port = port;
    }
    cfg.normalize_and_validate().map_err(|e| StartupError::InvalidConfig(e.to_string()))?;
    Ok(cfg)
}

fn bind_addr(cfg: &AppConfig) -> Result<SocketAddr, StartupError> {
    format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| StartupError::InvalidConfig(format!("server address: {e}")))
}

/// Router over an already wired gate.
pub fn build_app(gate: AccessGate) -> Router {
    routes::build_router(AppState::new(gate), build_cors())
}

/// Periodically flag expired sessions as invalid.
fn spawn_session_sweeper(gate: AccessGate) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            match gate.sweep_expired().await {
                Ok(0) => {}
                Ok(swept) => info!(swept, "expired_sessions_swept"),
                Err(e) => warn!(error = %e, "session sweep failed"),
            }
        }
    });
}

/// Public entry: load config, prepare the database and serve HTTP.
pub async fn run() -> anyhow::Result<()> {
    dotenv().ok();
    let cfg = load_config()?;
    init_logging(&cfg.logging.format);

    let db = models::db::connect_with_config(&cfg.database)
        .await
        .map_err(|e| StartupError::Database(e.to_string()))?;
    Migrator::up(&db, None).await.map_err(|e| StartupError::Database(e.to_string()))?;

    let repo = Arc::new(SeaOrmIdentityRepository::new(db));
    let gate = AccessGate::new(repo, Ports::system(), IdentityConfig::from_app_config(&cfg));
    spawn_session_sweeper(gate.clone());

    let app = build_app(gate);
    let addr = bind_addr(&cfg)?;
    info!(%addr, "starting server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
