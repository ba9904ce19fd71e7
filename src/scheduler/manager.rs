use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::history::ExecutionRecord;
use super::model::{ScheduleDefinition, ScheduleInput};
use super::store::ScheduleStore;
use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::context::{ActorContext, Permission};
use crate::error::Result;
use crate::report::ReportType;

/// Permission-checked schedule management. Every mutation is recorded on the
/// activity trail.
#[derive(Clone)]
pub struct Scheduler {
    store: ScheduleStore,
    activity: Arc<dyn ActivitySink>,
}

impl Scheduler {
    pub fn new(store: ScheduleStore, activity: Arc<dyn ActivitySink>) -> Self {
        Self { store, activity }
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn create(&self, ctx: &ActorContext, input: &ScheduleInput, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        ctx.require(Permission::ManageSchedules)?;
        let draft = input.validate()?;
        ctx.require(draft.report_type.required_permission())?;

        let schedule = self.store.create(&draft, &ctx.actor_id, now)?;
        info!(schedule_id = schedule.id, name = %schedule.name, next_run = %schedule.next_run, "schedule created");
        self.record(ctx, ActivityKind::ScheduleCreated, &schedule);
        Ok(schedule)
    }

    pub fn update(&self, ctx: &ActorContext, id: i64, input: &ScheduleInput, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        ctx.require(Permission::ManageSchedules)?;
        let draft = input.validate()?;
        ctx.require(draft.report_type.required_permission())?;

        let schedule = self.store.update(id, &draft, now)?;
        info!(schedule_id = id, next_run = %schedule.next_run, "schedule updated");
        self.record(ctx, ActivityKind::ScheduleUpdated, &schedule);
        Ok(schedule)
    }

    pub fn delete(&self, ctx: &ActorContext, id: i64) -> Result<()> {
        ctx.require(Permission::ManageSchedules)?;
        self.store.delete(id)?;
        info!(schedule_id = id, "schedule deleted");
        self.activity
            .record(ActivityEvent::new(ActivityKind::ScheduleDeleted, &ctx.actor_id).with_subject(id.to_string()));
        Ok(())
    }

    pub fn toggle(&self, ctx: &ActorContext, id: i64, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        ctx.require(Permission::ManageSchedules)?;
        let schedule = self.store.toggle_active(id, now)?;
        info!(schedule_id = id, active = schedule.is_active, "schedule toggled");
        self.record(ctx, ActivityKind::ScheduleToggled, &schedule);
        Ok(schedule)
    }

    pub fn list(&self, ctx: &ActorContext) -> Result<Vec<ScheduleDefinition>> {
        ctx.require(Permission::ManageSchedules)?;
        self.store.list()
    }

    pub fn get(&self, ctx: &ActorContext, id: i64) -> Result<ScheduleDefinition> {
        ctx.require(Permission::ManageSchedules)?;
        self.store.get(id)
    }

    pub fn executions(&self, ctx: &ActorContext, id: i64, limit: usize) -> Result<Vec<ExecutionRecord>> {
        ctx.require(Permission::ManageSchedules)?;
        // 404 for a missing schedule rather than an empty history
        self.store.get(id)?;
        self.store.executions(id, limit)
    }

    pub fn preview(&self, ctx: &ActorContext, hours: u64, now: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, String, ReportType)>> {
        ctx.require(Permission::ManageSchedules)?;
        self.store.preview(hours, now)
    }

    fn record(&self, ctx: &ActorContext, kind: ActivityKind, schedule: &ScheduleDefinition) {
        self.activity.record(
            ActivityEvent::new(kind, &ctx.actor_id)
                .with_subject(schedule.id.to_string())
                .with_detail(serde_json::json!({
                    "name": schedule.name,
                    "report_type": schedule.report_type,
                    "frequency": schedule.frequency,
                    "is_active": schedule.is_active,
                    "next_run": schedule.next_run,
                })),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemorySink;
    use crate::error::ReportError;
    use crate::storage::test_pool;
    use chrono::FixedOffset;

    fn scheduler() -> (tempfile::TempDir, Scheduler, Arc<MemorySink>) {
        let (dir, pool) = test_pool();
        let sink = Arc::new(MemorySink::default());
        let store = ScheduleStore::new(pool, FixedOffset::east_opt(0).unwrap());
        (dir, Scheduler::new(store, sink.clone()), sink)
    }

    fn input(report_type: &str) -> ScheduleInput {
        ScheduleInput {
            name: "Offerings".into(),
            report_type: report_type.into(),
            frequency: "weekly".into(),
            time_of_day: "18:00".into(),
            recipients: vec!["treasurer@example.org".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_management_requires_permission() {
        let (_dir, scheduler, _) = scheduler();
        let viewer = ActorContext::new("viewer", [Permission::ViewReports]);
        assert!(matches!(
            scheduler.create(&viewer, &input("visitor_list"), Utc::now()),
            Err(ReportError::Forbidden("schedules.manage"))
        ));
        assert!(matches!(scheduler.list(&viewer), Err(ReportError::Forbidden(_))));
    }

    #[test]
    fn test_financial_schedule_needs_financial_permission() {
        let (_dir, scheduler, _) = scheduler();
        let admin = ActorContext::new("admin", [Permission::ManageSchedules, Permission::ViewReports]);
        assert!(matches!(
            scheduler.create(&admin, &input("financial_summary"), Utc::now()),
            Err(ReportError::Forbidden("reports.financial"))
        ));
    }

    #[test]
    fn test_lifecycle_records_activity() {
        let (_dir, scheduler, sink) = scheduler();
        let admin = ActorContext::system();
        let now = Utc::now();

        let s = scheduler.create(&admin, &input("financial_summary"), now).unwrap();
        assert_eq!(s.created_by, "system:scheduler");
        scheduler.toggle(&admin, s.id, now).unwrap();
        scheduler.update(&admin, s.id, &input("visitor_list"), now).unwrap();
        scheduler.delete(&admin, s.id).unwrap();
        assert!(matches!(scheduler.executions(&admin, s.id, 10), Err(ReportError::ScheduleNotFound(_))));

        let kinds: Vec<_> = sink.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActivityKind::ScheduleCreated,
                ActivityKind::ScheduleToggled,
                ActivityKind::ScheduleUpdated,
                ActivityKind::ScheduleDeleted
            ]
        );
    }
}
