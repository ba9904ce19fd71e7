//! Execution history tracking for scheduled runs.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A record of one scheduled report execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub schedule_id: i64,
    pub executed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub status: RunStatus,
    pub artifact_ref: Option<String>,
    pub error_detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Terminal result handed to the store when a run finishes.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Delivered { artifact_ref: String },
    Failed { error: String },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Delivered { .. } => RunStatus::Success,
            RunOutcome::Failed { .. } => RunStatus::Failed,
        }
    }
}
