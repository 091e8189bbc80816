use once_cell::sync::Lazy;
use prometheus::{register_int_counter, Encoder, IntCounter, TextEncoder};

// Prometheus metrics (default registry)
pub static LOGIN_SUCCESS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_login_success_total",
        "Successful logins"
    )
    .expect("register login_success_total")
});

pub static LOGIN_FAILURE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_login_failure_total",
        "Rejected login attempts"
    )
    .expect("register login_failure_total")
});

pub static ACCOUNT_LOCKED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_account_locked_total",
        "Accounts locked after repeated failures"
    )
    .expect("register account_locked_total")
});

pub static INVITES_ISSUED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_invites_issued_total",
        "Invites issued"
    )
    .expect("register invites_issued_total")
});

pub static INVITES_REDEEMED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_invites_redeemed_total",
        "Invites redeemed"
    )
    .expect("register invites_redeemed_total")
});

pub static SESSIONS_REVOKED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_sessions_revoked_total",
        "Sessions revoked"
    )
    .expect("register sessions_revoked_total")
});

pub static STORAGE_RETRIES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "helpdesk_identity_storage_retries_total",
        "Storage read retries"
    )
    .expect("register storage_retries_total")
});

/// Text exposition of the default registry.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        LOGIN_SUCCESS_TOTAL.inc();
        let text = encode_metrics().unwrap();
        assert!(text.contains("helpdesk_identity_login_success_total"));
    }
}
