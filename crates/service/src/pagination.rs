//! Keyset pagination helpers for the audit trail.
//!
//! Cursors are opaque to callers: URL-safe base64 of `rfc3339|uuid`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::AuditCursor;
use crate::errors::AccessError;

pub const DEFAULT_PAGE_SIZE: u64 = 100;
pub const MAX_PAGE_SIZE: u64 = 500;

/// Clamp a requested page size into `1..=500`.
pub fn clamp_page_size(requested: Option<u64>) -> u64 {
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub fn encode_cursor(cursor: &AuditCursor) -> String {
    URL_SAFE_NO_PAD.encode(format!("{}|{}", cursor.created_at.to_rfc3339(), cursor.id))
}

pub fn decode_cursor(raw: &str) -> Result<AuditCursor, AccessError> {
    let invalid = || AccessError::Validation("invalid cursor".into());
    let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
    let text = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (ts, id) = text.split_once('|').ok_or_else(invalid)?;
    let created_at = DateTime::parse_from_rfc3339(ts).map_err(|_| invalid())?.with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok(AuditCursor { created_at, id })
}

/// One page plus the cursor to continue from, if more rows may follow.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_page_size() {
        assert_eq!(clamp_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(0)), 1);
        assert_eq!(clamp_page_size(Some(10_000)), MAX_PAGE_SIZE);
        assert_eq!(clamp_page_size(Some(42)), 42);
    }

    #[test]
    fn cursor_survives_encoding() {
        let c = AuditCursor { created_at: Utc::now(), id: Uuid::new_v4() };
        assert_eq!(decode_cursor(&encode_cursor(&c)).unwrap(), c);
    }

    #[test]
    fn garbage_cursor_is_validation_error() {
        assert!(matches!(decode_cursor("%%%"), Err(AccessError::Validation(_))));
        let no_sep = URL_SAFE_NO_PAD.encode("2024-01-01T00:00:00Z");
        assert!(matches!(decode_cursor(&no_sep), Err(AccessError::Validation(_))));
    }
}
