//! Executes due schedules: claim, generate, deliver, finalize, reschedule.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};

use super::history::{ExecutionRecord, RunOutcome, RunStatus};
use super::model::ScheduleDefinition;
use super::store::ScheduleStore;
use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::blocking;
use crate::context::{ActorContext, Permission};
use crate::error::{ReportError, Result};
use crate::notify::{Delivery, Notifier};
use crate::report::service::ReportService;

/// Tally of one `run_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub due: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Claimed elsewhere or no longer due by the time we got to it.
    pub skipped: usize,
}

pub struct Runner {
    store: ScheduleStore,
    reports: ReportService,
    notifier: Arc<dyn Notifier>,
    activity: Arc<dyn ActivitySink>,
    max_concurrent: usize,
}

impl Runner {
    pub fn new(
        store: ScheduleStore,
        reports: ReportService,
        notifier: Arc<dyn Notifier>,
        activity: Arc<dyn ActivitySink>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            reports,
            notifier,
            activity,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Run every active schedule whose `next_run` has passed. Never fails:
    /// per-schedule errors end up on the execution record or in the log.
    pub async fn run_due(&self, now: DateTime<Utc>) -> RunSummary {
        let store = self.store.clone();
        let due = match blocking(move || store.due(now)).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to load due schedules");
                return RunSummary::default();
            }
        };

        let mut summary = RunSummary {
            due: due.len(),
            ..Default::default()
        };
        if due.is_empty() {
            return summary;
        }

        let system = ActorContext::system();
        let results: Vec<_> = stream::iter(due)
            .map(|schedule| {
                let system = &system;
                async move {
                    let id = schedule.id;
                    (id, self.execute(schedule, now, true, system).await)
                }
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for (schedule_id, result) in results {
            match result {
                Ok(Some(record)) if record.status == RunStatus::Success => summary.succeeded += 1,
                Ok(Some(_)) => summary.failed += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    error!(schedule_id, error = %e, "scheduled run could not be recorded");
                    summary.failed += 1;
                }
            }
        }

        info!(
            due = summary.due,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "scheduler pass complete"
        );
        summary
    }

    /// Manual run that ignores `next_run` and `is_active` but still refuses
    /// to overlap an unresolved run of the same schedule. The regular cadence
    /// is left untouched.
    pub async fn run_one(&self, ctx: &ActorContext, schedule_id: i64, now: DateTime<Utc>) -> Result<ExecutionRecord> {
        ctx.require(Permission::ManageSchedules)?;
        let store = self.store.clone();
        let schedule = blocking(move || store.get(schedule_id)).await?;
        ctx.require(schedule.report_type.required_permission())?;

        self.execute(schedule, now, false, ctx)
            .await?
            .ok_or(ReportError::AlreadyRunning(schedule_id))
    }

    /// `Ok(None)` when the claim was refused.
    async fn execute(
        &self,
        schedule: ScheduleDefinition,
        now: DateTime<Utc>,
        scheduled: bool,
        actor: &ActorContext,
    ) -> Result<Option<ExecutionRecord>> {
        let store = self.store.clone();
        let id = schedule.id;
        let Some(claim) = blocking(move || store.claim(id, now, scheduled)).await? else {
            info!(schedule_id = id, "run skipped, schedule already claimed");
            return Ok(None);
        };

        let started = Instant::now();
        let outcome = match self.produce(&schedule, now).await {
            Ok(artifact_ref) => RunOutcome::Delivered { artifact_ref },
            Err(e) => {
                warn!(schedule_id = id, error = %e, "scheduled run failed");
                RunOutcome::Failed { error: e.to_string() }
            }
        };
        let duration = started.elapsed().as_secs_f64();

        let store = self.store.clone();
        let record = if scheduled {
            let (record, next_run) =
                blocking(move || store.finish_scheduled(claim.id, id, &outcome, duration, now)).await?;
            match next_run {
                Some(next) => info!(schedule_id = id, next_run = %next, "schedule rolled forward"),
                None => info!(schedule_id = id, "schedule deactivated during run, next_run kept"),
            }
            record
        } else {
            blocking(move || store.finalize(claim.id, &outcome, duration)).await?
        };

        info!(
            schedule_id = id,
            execution_id = record.id,
            status = record.status.as_str(),
            duration_s = duration,
            "schedule executed"
        );
        self.activity.record(
            ActivityEvent::new(ActivityKind::ScheduleExecuted, &actor.actor_id)
                .with_subject(id.to_string())
                .with_detail(serde_json::json!({
                    "execution_id": record.id,
                    "status": record.status,
                    "artifact_ref": record.artifact_ref,
                    "error": record.error_detail,
                })),
        );

        Ok(Some(record))
    }

    async fn produce(&self, schedule: &ScheduleDefinition, now: DateTime<Utc>) -> Result<String> {
        let today = now.with_timezone(&self.reports.offset()).date_naive();
        let request = schedule.report_request(today);
        let reports = self.reports.clone();
        let artifact = blocking(move || reports.generate(&ActorContext::system(), &request, now)).await?;

        let delivery = Delivery {
            schedule_id: schedule.id,
            schedule_name: schedule.name.clone(),
            recipients: schedule.recipients.clone(),
            subject: format!("{} ({})", schedule.name, artifact.filename),
            body: format!(
                "The scheduled {} report \"{}\" is attached ({} rows).",
                schedule.report_type, schedule.name, artifact.row_count
            ),
            artifact,
        };
        self.notifier.deliver(&delivery).await
    }
}
