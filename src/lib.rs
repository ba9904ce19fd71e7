//! Shepherd -- report generation and scheduled delivery for church
//! administration.
//!
//! This crate provides the report pipeline (filters, query plans,
//! materialization and rendering), recurring schedules with single-flight
//! execution, and the HTTP API that fronts them.

pub mod activity;
pub mod api;
pub mod config;
pub mod context;
pub mod error;
pub mod notify;
pub mod report;
pub mod scheduler;
pub mod storage;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::activity::{ActivitySink, JsonLinesSink, TracingSink};
use crate::config::ShepherdConfig;
use crate::notify::OutboxNotifier;
use crate::report::service::ReportService;
use crate::scheduler::{Runner, ScheduleStore, Scheduler};
use crate::storage::Pool;

/// Everything the server and CLI commands operate on, wired from config.
#[derive(Clone)]
pub struct Services {
    pub pool: Pool,
    pub reports: ReportService,
    pub scheduler: Scheduler,
    pub runner: Arc<Runner>,
    pub outbox: OutboxNotifier,
}

impl Services {
    pub fn open(config: &ShepherdConfig) -> Result<Self> {
        info!(db_path = %config.database.path, "Initializing database");
        let pool = storage::open_pool(&config.database.path)
            .with_context(|| format!("failed to open database {}", config.database.path))?;
        Self::with_pool(config, pool)
    }

    pub fn with_pool(config: &ShepherdConfig, pool: Pool) -> Result<Self> {
        let offset = config.organization.offset()?;
        let activity: Arc<dyn ActivitySink> = match &config.logging.activity_log_path {
            Some(path) => Arc::new(JsonLinesSink::open(path)?),
            None => Arc::new(TracingSink),
        };

        let reports = ReportService::new(pool.clone(), config.organization.name.clone(), offset, activity.clone());
        let store = ScheduleStore::new(pool.clone(), offset);
        let scheduler = Scheduler::new(store.clone(), activity.clone());
        let outbox = OutboxNotifier::new(pool.clone(), config.delivery.outbox_dir.clone());
        let runner = Arc::new(Runner::new(
            store,
            reports.clone(),
            Arc::new(outbox.clone()),
            activity,
            config.scheduler.max_concurrent_runs,
        ));

        Ok(Self {
            pool,
            reports,
            scheduler,
            runner,
            outbox,
        })
    }

    pub fn router(&self) -> axum::Router {
        api::router(api::state::AppState {
            reports: self.reports.clone(),
            scheduler: self.scheduler.clone(),
            runner: self.runner.clone(),
        })
    }
}

/// Start the shepherd daemon: API server plus the scheduler poll loop.
pub async fn serve(config: &ShepherdConfig) -> Result<()> {
    let services = Services::open(config)?;

    if config.scheduler.enabled {
        let runner = services.runner.clone();
        let poll = config.scheduler.poll_interval();
        tokio::spawn(async move {
            scheduler::engine::run_scheduler_loop(runner, poll).await;
        });
    } else {
        info!("Scheduler disabled by configuration");
    }

    let addr: std::net::SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", config.server.bind))?;
    let app = services.router();

    info!(%addr, "Shepherd listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run blocking storage or rendering work off the async runtime.
pub(crate) async fn blocking<T, F>(f: F) -> error::Result<T>
where
    F: FnOnce() -> error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| error::ReportError::Storage(format!("blocking task failed: {e}")))?
}
