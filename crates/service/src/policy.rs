//! Risk classification for audit actions.

use crate::domain::{AuditAction, RiskLevel};

/// Deterministic risk level for `action`. DEACTIVATE_USER is MEDIUM.
pub fn risk_for(action: AuditAction) -> RiskLevel {
    use AuditAction::*;
    match action {
        Login | Logout | Read | InviteUser => RiskLevel::Low,
        Create | Update | Delete | LoginFailed | DeactivateUser => RiskLevel::Medium,
        ViewPii | DownloadPii | GrantPermission | RevokePermission => RiskLevel::High,
        DeletePii | SystemConfigChange | Restore | Backup => RiskLevel::Critical,
    }
}
