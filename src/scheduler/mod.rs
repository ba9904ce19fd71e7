//! Recurring report schedules: definitions, trigger clock, persistence and
//! the runner that executes due schedules.

pub mod clock;
pub mod engine;
pub mod history;
pub mod manager;
pub mod model;
pub mod runner;
pub mod store;

pub use self::history::{ExecutionRecord, RunOutcome, RunStatus};
pub use self::manager::Scheduler;
pub use self::model::{Frequency, ScheduleConfiguration, ScheduleDefinition, ScheduleDraft, ScheduleInput};
pub use self::runner::{RunSummary, Runner};
pub use self::store::ScheduleStore;
