use std::sync::Arc;

use crate::report::service::ReportService;
use crate::scheduler::{Runner, Scheduler};

#[derive(Clone)]
pub struct AppState {
    pub reports: ReportService,
    pub scheduler: Scheduler,
    pub runner: Arc<Runner>,
}
