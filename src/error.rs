//! Error taxonomy shared by the report pipeline and the scheduler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("unknown report type '{0}'")]
    UnknownReportType(String),

    #[error("unknown report format '{0}'")]
    UnknownFormat(String),

    #[error("report query failed: {message}")]
    QueryExecution { message: String },

    #[error("schedule {0} not found")]
    ScheduleNotFound(i64),

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("schedule {0} already has a run in progress")]
    AlreadyRunning(i64),

    #[error("permission '{0}' required")]
    Forbidden(&'static str),

    #[error("report rendering failed: {0}")]
    Render(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ReportError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ReportError::Validation(msg.into())
    }

    pub fn query(err: impl std::fmt::Display) -> Self {
        ReportError::QueryExecution {
            message: err.to_string(),
        }
    }

    /// Whether the message is safe to show to an end user verbatim.
    /// Storage and query failures may leak schema details and are not.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            ReportError::QueryExecution { .. } | ReportError::Storage(_) | ReportError::Render(_)
        )
    }
}

impl From<rusqlite::Error> for ReportError {
    fn from(e: rusqlite::Error) -> Self {
        ReportError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ReportError {
    fn from(e: r2d2::Error) -> Self {
        ReportError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for ReportError {
    fn from(e: serde_json::Error) -> Self {
        ReportError::Storage(format!("malformed stored json: {e}"))
    }
}

pub type Result<T, E = ReportError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_errors_are_not_user_facing() {
        assert!(!ReportError::query("no such table: members").is_user_facing());
        assert!(!ReportError::Storage("disk I/O error".into()).is_user_facing());
        assert!(ReportError::UnknownFormat("docx".into()).is_user_facing());
        assert!(ReportError::ScheduleNotFound(4).is_user_facing());
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            ReportError::UnknownReportType("payroll".into()).to_string(),
            "unknown report type 'payroll'"
        );
        assert_eq!(
            ReportError::query("near \"SELEC\": syntax error").to_string(),
            "report query failed: near \"SELEC\": syntax error"
        );
    }
}
