//! End-to-end report generation shared by ad-hoc requests and scheduled runs.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, info};

use super::query::plan;
use super::render::{render, Artifact, DocumentMeta};
use super::{materialize, ReportRequest};
use crate::activity::{ActivityEvent, ActivityKind, ActivitySink};
use crate::context::ActorContext;
use crate::error::Result;
use crate::storage::Pool;

/// Builds, materializes and renders reports. Cheap to clone.
#[derive(Clone)]
pub struct ReportService {
    pool: Pool,
    organization: String,
    offset: FixedOffset,
    activity: Arc<dyn ActivitySink>,
}

impl ReportService {
    pub fn new(
        pool: Pool,
        organization: impl Into<String>,
        offset: FixedOffset,
        activity: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            pool,
            organization: organization.into(),
            offset,
            activity,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Generate one report. Blocking: call from `spawn_blocking` in async code.
    /// Nothing is persisted; the only side effect is the activity event.
    pub fn generate(&self, ctx: &ActorContext, request: &ReportRequest, now: DateTime<Utc>) -> Result<Artifact> {
        ctx.require(request.report_type.required_permission())?;

        let filters = request.effective_filters();
        let plan = plan(request.report_type, &filters, now.with_timezone(&self.offset).date_naive());
        if !plan.ignored.is_empty() {
            debug!(report = %request.report_type, ignored = ?plan.ignored, "filters not used by report");
        }

        let dataset = materialize::execute(&self.pool, &plan)?;

        let meta = DocumentMeta {
            organization: self.organization.clone(),
            report_type: request.report_type,
            title: plan.title.clone(),
            generated_at: now.with_timezone(&self.offset),
            date_range: filters
                .date_range()
                .filter(|_| !plan.ignored.iter().any(|k| k == "date_range")),
        };
        let artifact = render(&dataset, request.format, &meta)?;

        info!(
            report = %request.report_type,
            format = %request.format,
            rows = artifact.row_count,
            actor = %ctx.actor_id,
            "report generated"
        );
        self.activity.record(
            ActivityEvent::new(ActivityKind::ReportGenerated, &ctx.actor_id)
                .with_subject(request.report_type.as_str())
                .with_detail(serde_json::json!({
                    "format": request.format,
                    "rows": artifact.row_count,
                    "filename": artifact.filename,
                })),
        );

        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemorySink;
    use crate::context::Permission;
    use crate::error::ReportError;
    use crate::report::{FilterSet, ReportFormat, ReportType};
    use crate::storage::test_pool;

    #[test]
    fn test_generate_records_activity() {
        let (_dir, pool) = test_pool();
        let sink = Arc::new(MemorySink::default());
        let service = ReportService::new(pool, "Grace Fellowship", FixedOffset::east_opt(0).unwrap(), sink.clone());

        let ctx = ActorContext::new("secretary", [Permission::ViewReports]);
        let request = ReportRequest {
            report_type: ReportType::VisitorList,
            filters: FilterSet::new(),
            format: ReportFormat::Csv,
            date_range: None,
        };
        let artifact = service.generate(&ctx, &request, Utc::now()).unwrap();
        assert_eq!(artifact.row_count, 0);
        assert!(String::from_utf8(artifact.bytes).unwrap().starts_with("Visit Date,Name"));

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, ActivityKind::ReportGenerated);
        assert_eq!(events[0].subject.as_deref(), Some("visitor_list"));
    }

    #[test]
    fn test_financial_report_needs_permission() {
        let (_dir, pool) = test_pool();
        let service = ReportService::new(
            pool,
            "Grace Fellowship",
            FixedOffset::east_opt(0).unwrap(),
            Arc::new(MemorySink::default()),
        );
        let ctx = ActorContext::new("usher", [Permission::ViewReports]);
        let request = ReportRequest {
            report_type: ReportType::FinancialSummary,
            filters: FilterSet::new(),
            format: ReportFormat::Document,
            date_range: None,
        };
        assert!(matches!(
            service.generate(&ctx, &request, Utc::now()),
            Err(ReportError::Forbidden(_))
        ));
    }
}
