use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::runner::Runner;

/// Main scheduler execution loop.
/// Polls for due schedules every `poll` interval until the task is dropped.
pub async fn run_scheduler_loop(runner: Arc<Runner>, poll: Duration) {
    info!(poll_secs = poll.as_secs(), "Scheduler engine started");

    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let summary = runner.run_due(Utc::now()).await;
        if summary.due > 0 {
            debug!(?summary, "poll tick");
        }
    }
}
