//! Delivery of rendered reports to schedule recipients.

pub mod outbox;

use async_trait::async_trait;

use crate::error::Result;
use crate::report::Artifact;

pub use outbox::{OutboxEntry, OutboxNotifier};

/// One message: an artifact addressed to a schedule's recipients.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub schedule_id: i64,
    pub schedule_name: String,
    pub recipients: Vec<String>,
    pub subject: String,
    pub body: String,
    pub artifact: Artifact,
}

/// Hands a delivery to whatever transport sits behind it.
///
/// Returns a reference to where the artifact ended up; it is recorded on the
/// execution record. Any error marks the run failed.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, delivery: &Delivery) -> Result<String>;
}
