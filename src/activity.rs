//! Activity trail for report generation and schedule management.
//!
//! Events are fire-and-forget: a sink that cannot write logs the failure and
//! moves on, it never fails the operation that produced the event.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// ActivityKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    ReportGenerated,
    ScheduleCreated,
    ScheduleUpdated,
    ScheduleDeleted,
    ScheduleToggled,
    ScheduleExecuted,
}

// ---------------------------------------------------------------------------
// ActivityEvent
// ---------------------------------------------------------------------------

/// One activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEvent {
    /// RFC 3339 timestamp of the event.
    pub timestamp: String,
    pub kind: ActivityKind,
    pub actor_id: String,
    /// Report type or schedule id the event concerns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, actor_id: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            kind,
            actor_id: actor_id.into(),
            subject: None,
            detail: None,
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Emits events as structured `tracing` records under the `activity` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, event: ActivityEvent) {
        info!(
            target: "activity",
            kind = ?event.kind,
            actor = %event.actor_id,
            subject = event.subject.as_deref().unwrap_or("-"),
            detail = %event.detail.as_ref().map(|d| d.to_string()).unwrap_or_default(),
            "activity"
        );
    }
}

/// Appends one JSON object per line to a file.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create activity log directory: {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open activity log: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    fn write_event(&self, event: &ActivityEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("failed to serialize activity event")?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("activity log lock poisoned"))?;
        file.write_all(line.as_bytes()).context("failed to append activity event")?;
        file.flush().context("failed to flush activity log")?;
        Ok(())
    }
}

impl ActivitySink for JsonLinesSink {
    fn record(&self, event: ActivityEvent) {
        if let Err(e) = self.write_event(&event) {
            warn!(path = %self.path.display(), error = %e, "dropping activity event");
        }
    }
}

/// Keeps events in memory; used by tests and embedders that inspect activity.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ActivitySink for MemorySink {
    fn record(&self, event: ActivityEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
