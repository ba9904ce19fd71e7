//! Caller identity carried explicitly into every report and scheduler call.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{ReportError, Result};

/// Permission flags granted by the upstream authorization gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    ViewReports,
    ViewFinancial,
    ManageSchedules,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ViewReports => "reports.view",
            Permission::ViewFinancial => "reports.financial",
            Permission::ManageSchedules => "schedules.manage",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "reports.view" => Some(Permission::ViewReports),
            "reports.financial" => Some(Permission::ViewFinancial),
            "schedules.manage" => Some(Permission::ManageSchedules),
            _ => None,
        }
    }
}

/// The acting user (or the scheduler itself) for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorContext {
    pub actor_id: String,
    pub permissions: BTreeSet<Permission>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>, permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self {
            actor_id: actor_id.into(),
            permissions: permissions.into_iter().collect(),
        }
    }

    /// Identity used for unattended scheduled runs. Holds every permission;
    /// access was checked when the schedule was created.
    pub fn system() -> Self {
        Self::new(
            "system:scheduler",
            [
                Permission::ViewReports,
                Permission::ViewFinancial,
                Permission::ManageSchedules,
            ],
        )
    }

    /// Parse a comma-separated permission header. Unknown names are dropped.
    pub fn from_header_values(actor_id: &str, permissions: &str) -> Self {
        Self::new(actor_id.trim(), permissions.split(',').filter_map(Permission::parse))
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(ReportError::Forbidden(permission.as_str()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parsing_drops_unknown() {
        let ctx = ActorContext::from_header_values(" pastor-jo ", "reports.view, admin.all,schedules.manage");
        assert_eq!(ctx.actor_id, "pastor-jo");
        assert!(ctx.has(Permission::ViewReports));
        assert!(ctx.has(Permission::ManageSchedules));
        assert!(!ctx.has(Permission::ViewFinancial));
    }

    #[test]
    fn test_require() {
        let ctx = ActorContext::new("usher", [Permission::ViewReports]);
        assert!(ctx.require(Permission::ViewReports).is_ok());
        assert!(matches!(
            ctx.require(Permission::ViewFinancial),
            Err(ReportError::Forbidden("reports.financial"))
        ));
        assert!(ActorContext::system().require(Permission::ViewFinancial).is_ok());
    }
}
