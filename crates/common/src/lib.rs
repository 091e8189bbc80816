//! Shared building blocks for the workspace: logging setup and the small
//! response types every HTTP surface returns.

pub mod types;
pub mod utils;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_type_ok() {
        let h = types::Health { status: "ok" };
        assert_eq!(h.status, "ok");
    }

    #[test]
    fn error_body_serializes_code_and_message() {
        let body = types::ErrorBody::new(1004, "invalid credentials");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], 1004);
        assert_eq!(json["error"], "invalid credentials");
    }
}
