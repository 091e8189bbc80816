//! Runtime policy of the identity core, derived from `configs::AppConfig`.

use std::time::Duration as StdDuration;

use chrono::Duration;

use crate::retry::RetryPolicy;

#[derive(Clone, Debug)]
pub struct IdentityConfig {
    pub jwt_secret: String,
    pub lockout_threshold: u32,
    pub lockout_window: Duration,
    pub refresh_ttl: Duration,
    pub access_ttl: Duration,
    pub invite_default_ttl: Duration,
    pub request_timeout: StdDuration,
    pub rotate_refresh_tokens: bool,
    pub retry: RetryPolicy,
}

impl IdentityConfig {
    /// Defaults with the given signing secret.
    pub fn new(jwt_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            lockout_threshold: 5,
            lockout_window: Duration::minutes(15),
            refresh_ttl: Duration::days(30),
            access_ttl: Duration::minutes(15),
            invite_default_ttl: Duration::hours(72),
            request_timeout: StdDuration::from_millis(5000),
            rotate_refresh_tokens: true,
            retry: RetryPolicy::default(),
        }
    }

    pub fn from_app_config(cfg: &configs::AppConfig) -> Self {
        let auth = &cfg.auth;
        Self {
            jwt_secret: auth.jwt_secret.clone(),
            lockout_threshold: auth.lockout_threshold,
            lockout_window: Duration::seconds(auth.lockout_window_secs as i64),
            refresh_ttl: Duration::days(auth.refresh_ttl_days),
            access_ttl: Duration::seconds(auth.access_ttl_secs),
            invite_default_ttl: Duration::hours(auth.invite_default_hours),
            request_timeout: StdDuration::from_millis(auth.request_timeout_ms),
            rotate_refresh_tokens: auth.rotate_refresh_tokens,
            retry: RetryPolicy::from_config(&cfg.retry),
        }
    }
}
