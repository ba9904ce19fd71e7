//! SQLite persistence for schedules and their execution history.

use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use tracing::debug;

use super::clock;
use super::history::{ExecutionRecord, RunOutcome, RunStatus};
use super::model::{Frequency, ScheduleConfiguration, ScheduleDefinition, ScheduleDraft};
use crate::error::{ReportError, Result};
use crate::report::ReportType;
use crate::storage::{format_instant, parse_instant, Pool};

const SCHEDULE_COLUMNS: &str = "id, name, report_type, configuration_json, frequency, time_of_day, \
     recipients_json, is_active, next_run, created_by, created_at, updated_at";

/// Longest window a dry-run preview may cover.
pub const MAX_PREVIEW_HOURS: u64 = 24 * 366;

const EXECUTION_COLUMNS: &str =
    "id, schedule_id, executed_at, duration_seconds, status, artifact_ref, error_detail";

/// Schedule and execution-record storage. Cheap to clone.
#[derive(Clone)]
pub struct ScheduleStore {
    pool: Pool,
    offset: FixedOffset,
}

impl ScheduleStore {
    /// `offset` is the organization's local UTC offset, used to place
    /// time-of-day triggers.
    pub fn new(pool: Pool, offset: FixedOffset) -> Self {
        Self { pool, offset }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Next trigger instant for a rule, evaluated in the organization's offset.
    pub fn next_run_for(&self, frequency: &Frequency, time_of_day: NaiveTime, now: DateTime<Utc>) -> DateTime<Utc> {
        clock::next_trigger_at(frequency, time_of_day, &now.with_timezone(&self.offset)).with_timezone(&Utc)
    }

    pub fn create(&self, draft: &ScheduleDraft, created_by: &str, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        let next_run = self.next_run_for(&draft.frequency, draft.time_of_day, now);
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO report_schedules (name, report_type, configuration_json, frequency, time_of_day,
                                           recipients_json, is_active, next_run, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                draft.name,
                draft.report_type.as_str(),
                draft.configuration.to_json()?,
                draft.frequency.as_str(),
                draft.time_of_day.format("%H:%M").to_string(),
                serde_json::to_string(&draft.recipients)?,
                draft.is_active.unwrap_or(true),
                format_instant(next_run),
                created_by,
                format_instant(now),
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(schedule_id = id, next_run = %next_run, "schedule created");
        drop(conn);
        self.get(id)
    }

    /// Overwrite every editable field and recompute `next_run`. An unset
    /// `is_active` keeps the stored flag.
    pub fn update(&self, id: i64, draft: &ScheduleDraft, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        let next_run = self.next_run_for(&draft.frequency, draft.time_of_day, now);
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE report_schedules
             SET name = ?2, report_type = ?3, configuration_json = ?4, frequency = ?5, time_of_day = ?6,
                 recipients_json = ?7, is_active = COALESCE(?8, is_active), next_run = ?9, updated_at = ?10
             WHERE id = ?1",
            params![
                id,
                draft.name,
                draft.report_type.as_str(),
                draft.configuration.to_json()?,
                draft.frequency.as_str(),
                draft.time_of_day.format("%H:%M").to_string(),
                serde_json::to_string(&draft.recipients)?,
                draft.is_active,
                format_instant(next_run),
                format_instant(now),
            ],
        )?;
        if changed == 0 {
            return Err(ReportError::ScheduleNotFound(id));
        }
        drop(conn);
        self.get(id)
    }

    /// Delete a schedule; its execution records go with it.
    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute("DELETE FROM report_schedules WHERE id = ?1", params![id])?;
        if changed == 0 {
            return Err(ReportError::ScheduleNotFound(id));
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<ScheduleDefinition> {
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM report_schedules WHERE id = ?1"),
            params![id],
            row_to_schedule,
        )
        .optional()?
        .ok_or(ReportError::ScheduleNotFound(id))
    }

    pub fn list(&self) -> Result<Vec<ScheduleDefinition>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM report_schedules ORDER BY name, id"
        ))?;
        let rows = stmt.query_map([], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Active schedules whose `next_run` has passed.
    pub fn due(&self, now: DateTime<Utc>) -> Result<Vec<ScheduleDefinition>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM report_schedules
             WHERE is_active = 1 AND next_run <= ?1
             ORDER BY next_run, id"
        ))?;
        let rows = stmt.query_map(params![format_instant(now)], row_to_schedule)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Flip `is_active` without touching other fields. Re-activating a
    /// schedule whose `next_run` already passed also rolls `next_run` forward.
    pub fn toggle_active(&self, id: i64, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        let current = self.get(id)?;
        self.set_active(id, !current.is_active, now)
    }

    pub fn set_active(&self, id: i64, active: bool, now: DateTime<Utc>) -> Result<ScheduleDefinition> {
        let mut conn = self.pool.get()?;
        // Read then write: take the write lock up front.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rule: Option<(String, String)> = tx
            .query_row(
                "SELECT frequency, time_of_day FROM report_schedules WHERE id = ?1",
                params![id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        let Some((frequency, time_of_day)) = rule else {
            return Err(ReportError::ScheduleNotFound(id));
        };

        tx.execute(
            "UPDATE report_schedules SET is_active = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, active, format_instant(now)],
        )?;

        if active {
            let time = super::model::parse_time_of_day(&time_of_day)?;
            let next = self.next_run_for(&Frequency::from_stored(&frequency), time, now);
            tx.execute(
                "UPDATE report_schedules SET next_run = ?2 WHERE id = ?1 AND next_run <= ?3",
                params![id, format_instant(next), format_instant(now)],
            )?;
        }

        tx.commit()?;
        drop(conn);
        self.get(id)
    }

    /// Atomically open a `running` execution record.
    ///
    /// Returns `None` when another run of the schedule is unresolved or, with
    /// `require_due`, when the schedule is no longer due (inactive or already
    /// rolled forward by a concurrent poller).
    pub fn claim(&self, schedule_id: i64, now: DateTime<Utc>, require_due: bool) -> Result<Option<ExecutionRecord>> {
        let conn = self.pool.get()?;
        let executed_at = format_instant(now);
        let inserted = conn.execute(
            "INSERT INTO schedule_executions (schedule_id, executed_at, status)
             SELECT s.id, ?2, 'running' FROM report_schedules s
             WHERE s.id = ?1
               AND (?3 = 0 OR (s.is_active = 1 AND s.next_run <= ?2))
               AND NOT EXISTS (SELECT 1 FROM schedule_executions e
                               WHERE e.schedule_id = s.id AND e.status = 'running')",
            params![schedule_id, executed_at, require_due],
        );

        let inserted = match inserted {
            Ok(n) => n,
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => 0,
            Err(e) => return Err(e.into()),
        };

        if inserted == 0 {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM report_schedules WHERE id = ?1)",
                params![schedule_id],
                |r| r.get(0),
            )?;
            if !exists {
                return Err(ReportError::ScheduleNotFound(schedule_id));
            }
            return Ok(None);
        }

        Ok(Some(ExecutionRecord {
            id: conn.last_insert_rowid(),
            schedule_id,
            executed_at: parse_instant(&executed_at)?,
            duration_seconds: 0.0,
            status: RunStatus::Running,
            artifact_ref: None,
            error_detail: None,
        }))
    }

    /// Move a `running` record to its terminal state. A record can be
    /// finalized once; later attempts fail.
    pub fn finalize(&self, execution_id: i64, outcome: &RunOutcome, duration_seconds: f64) -> Result<ExecutionRecord> {
        let conn = self.pool.get()?;
        finalize_on(&conn, execution_id, outcome, duration_seconds)
    }

    /// Finalize a scheduled run and roll its schedule forward in one
    /// transaction, so no other poller sees the schedule both unclaimed and
    /// still due.
    ///
    /// The next trigger comes from the rule stored now, not the one the run
    /// started with, counted from the later of `now` and the last edit. Returns
    /// the new `next_run`, or `None` when the schedule was deactivated meanwhile
    /// and kept its `next_run`.
    pub fn finish_scheduled(
        &self,
        execution_id: i64,
        schedule_id: i64,
        outcome: &RunOutcome,
        duration_seconds: f64,
        now: DateTime<Utc>,
    ) -> Result<(ExecutionRecord, Option<DateTime<Utc>>)> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let rule: Option<(String, String, Option<String>)> = tx
            .query_row(
                "SELECT frequency, time_of_day, updated_at FROM report_schedules
                 WHERE id = ?1 AND is_active = 1",
                params![schedule_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;

        let next_run = match rule {
            Some((frequency, time_of_day, updated_at)) => {
                let time = super::model::parse_time_of_day(&time_of_day)?;
                let edited = updated_at.as_deref().map(parse_instant).transpose()?;
                let from = edited.map_or(now, |e| e.max(now));
                let next = self.next_run_for(&Frequency::from_stored(&frequency), time, from);
                tx.execute(
                    "UPDATE report_schedules SET next_run = ?2 WHERE id = ?1",
                    params![schedule_id, format_instant(next)],
                )?;
                Some(next)
            }
            None => None,
        };

        let record = finalize_on(&tx, execution_id, outcome, duration_seconds)?;
        tx.commit()?;
        Ok((record, next_run))
    }

    /// Execution history, newest first.
    pub fn executions(&self, schedule_id: i64, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM schedule_executions
             WHERE schedule_id = ?1 ORDER BY executed_at DESC, id DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![schedule_id, limit as i64], row_to_execution)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every trigger of the active schedules within the next `hours`, at
    /// most [`MAX_PREVIEW_HOURS`]. This is strictly a dry-run preview, not the
    /// execution loop.
    pub fn preview(&self, hours: u64, now: DateTime<Utc>) -> Result<Vec<(DateTime<Utc>, String, ReportType)>> {
        let window = i64::try_from(hours)
            .ok()
            .filter(|_| hours <= MAX_PREVIEW_HOURS)
            .and_then(Duration::try_hours)
            .ok_or_else(|| ReportError::validation(format!("hours must be at most {MAX_PREVIEW_HOURS}, got {hours}")))?;
        let end = now
            .checked_add_signed(window)
            .ok_or_else(|| ReportError::validation(format!("preview window of {hours} hours is out of range")))?;
        let mut preview = Vec::new();

        for schedule in self.list()?.into_iter().filter(|s| s.is_active) {
            let mut next = schedule.next_run;
            while next <= end {
                if next > now {
                    preview.push((next, schedule.name.clone(), schedule.report_type));
                }
                next = self.next_run_for(&schedule.frequency, schedule.time_of_day, next.max(now));
            }
        }

        preview.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(preview)
    }
}

fn finalize_on(conn: &Connection, execution_id: i64, outcome: &RunOutcome, duration_seconds: f64) -> Result<ExecutionRecord> {
    let (artifact_ref, error_detail) = match outcome {
        RunOutcome::Delivered { artifact_ref } => (Some(artifact_ref.as_str()), None),
        RunOutcome::Failed { error } => (None, Some(error.as_str())),
    };
    let changed = conn.execute(
        "UPDATE schedule_executions
         SET status = ?2, duration_seconds = ?3, artifact_ref = ?4, error_detail = ?5
         WHERE id = ?1 AND status = 'running'",
        params![
            execution_id,
            outcome.status().as_str(),
            duration_seconds.max(0.0),
            artifact_ref,
            error_detail
        ],
    )?;
    if changed == 0 {
        return Err(ReportError::Storage(format!("execution {execution_id} is not running")));
    }
    conn.query_row(
        &format!("SELECT {EXECUTION_COLUMNS} FROM schedule_executions WHERE id = ?1"),
        params![execution_id],
        row_to_execution,
    )
    .map_err(Into::into)
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn row_to_schedule(row: &Row<'_>) -> rusqlite::Result<ScheduleDefinition> {
    let report_type: String = row.get(2)?;
    let configuration: String = row.get(3)?;
    let frequency: String = row.get(4)?;
    let time_of_day: String = row.get(5)?;
    let recipients: String = row.get(6)?;
    let created_at = parse_instant(&row.get::<_, String>(10)?)?;
    let updated_at = match row.get::<_, Option<String>>(11)? {
        Some(s) => parse_instant(&s)?,
        None => created_at,
    };

    Ok(ScheduleDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        report_type: report_type.parse().map_err(|e| conversion_error(2, e))?,
        configuration: ScheduleConfiguration::from_json(&configuration).map_err(|e| conversion_error(3, e))?,
        frequency: Frequency::from_stored(&frequency),
        time_of_day: super::model::parse_time_of_day(&time_of_day).map_err(|e| conversion_error(5, e))?,
        recipients: serde_json::from_str(&recipients).map_err(|e| conversion_error(6, e))?,
        is_active: row.get(7)?,
        next_run: parse_instant(&row.get::<_, String>(8)?)?,
        created_by: row.get(9)?,
        created_at,
        updated_at,
    })
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status: String = row.get(4)?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        executed_at: parse_instant(&row.get::<_, String>(2)?)?,
        duration_seconds: row.get(3)?,
        status: RunStatus::parse(&status).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, format!("unknown run status '{status}'").into())
        })?,
        artifact_ref: row.get(5)?,
        error_detail: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::model::ScheduleInput;
    use crate::storage::test_pool;
    use chrono::TimeZone;

    fn store() -> (tempfile::TempDir, ScheduleStore) {
        let (dir, pool) = test_pool();
        (dir, ScheduleStore::new(pool, FixedOffset::east_opt(0).unwrap()))
    }

    fn draft(frequency: &str) -> ScheduleDraft {
        ScheduleInput {
            name: "Weekly visitors".into(),
            report_type: "visitor_list".into(),
            frequency: frequency.into(),
            time_of_day: "09:00".into(),
            recipients: vec!["office@example.org".into(), "Office@example.org".into(), " ".into()],
            format: Some("csv".into()),
            ..Default::default()
        }
        .validate()
        .unwrap()
    }

    fn t(y: i32, mo: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_create_computes_next_run() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        assert_eq!(s.next_run, t(2024, 3, 1, 9));
        assert_eq!(s.recipients, vec!["office@example.org"]);
        assert_eq!(s.created_by, "admin");
        assert!(s.is_active);
    }

    #[test]
    fn test_update_and_missing_schedule() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let updated = store.update(s.id, &draft("monthly"), t(2024, 3, 15, 12)).unwrap();
        assert_eq!(updated.frequency, Frequency::Monthly);
        assert_eq!(updated.next_run, t(2024, 4, 1, 9));
        assert_eq!(updated.created_at, s.created_at);

        assert!(matches!(store.update(999, &draft("daily"), t(2024, 3, 1, 8)), Err(ReportError::ScheduleNotFound(999))));
        assert!(matches!(store.get(999), Err(ReportError::ScheduleNotFound(999))));
    }

    #[test]
    fn test_delete_cascades_to_executions() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let rec = store.claim(s.id, t(2024, 3, 1, 10), false).unwrap().unwrap();
        store
            .finalize(rec.id, &RunOutcome::Failed { error: "boom".into() }, 0.5)
            .unwrap();

        store.delete(s.id).unwrap();
        let conn = store.pool().get().unwrap();
        let left: i64 = conn
            .query_row("SELECT COUNT(*) FROM schedule_executions", [], |r| r.get(0))
            .unwrap();
        assert_eq!(left, 0);
        assert!(matches!(store.delete(s.id), Err(ReportError::ScheduleNotFound(_))));
    }

    #[test]
    fn test_claim_is_single_flight() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let now = t(2024, 3, 1, 10);

        let first = store.claim(s.id, now, true).unwrap();
        assert!(first.is_some());
        assert!(store.claim(s.id, now, true).unwrap().is_none());
        assert!(store.claim(s.id, now, false).unwrap().is_none());

        store
            .finalize(first.unwrap().id, &RunOutcome::Delivered { artifact_ref: "x".into() }, 1.0)
            .unwrap();
        assert!(store.claim(s.id, now, false).unwrap().is_some());
    }

    #[test]
    fn test_claim_requires_due_schedule() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        // next_run is 09:00; at 08:00 it is not due
        assert!(store.claim(s.id, t(2024, 3, 1, 8), true).unwrap().is_none());
        assert!(matches!(store.claim(42, t(2024, 3, 1, 8), true), Err(ReportError::ScheduleNotFound(42))));
    }

    #[test]
    fn test_finalize_only_once() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let rec = store.claim(s.id, t(2024, 3, 1, 10), true).unwrap().unwrap();
        let done = store
            .finalize(rec.id, &RunOutcome::Delivered { artifact_ref: "outbox/1.csv".into() }, 2.25)
            .unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.artifact_ref.as_deref(), Some("outbox/1.csv"));
        assert_eq!(done.duration_seconds, 2.25);

        assert!(store
            .finalize(rec.id, &RunOutcome::Failed { error: "late".into() }, 0.0)
            .is_err());
    }

    #[test]
    fn test_toggle_is_targeted_and_rolls_stale_next_run() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();

        let off = store.toggle_active(s.id, t(2024, 3, 1, 8)).unwrap();
        assert!(!off.is_active);
        assert_eq!(off.name, s.name);
        assert_eq!(off.next_run, s.next_run);

        // re-enabled days later: stale next_run moves into the future
        let on = store.toggle_active(s.id, t(2024, 3, 5, 12)).unwrap();
        assert!(on.is_active);
        assert_eq!(on.next_run, t(2024, 3, 6, 9));
    }

    #[test]
    fn test_finish_scheduled_skips_inactive() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let rec = store.claim(s.id, t(2024, 3, 1, 10), true).unwrap().unwrap();
        store.set_active(s.id, false, t(2024, 3, 1, 10)).unwrap();

        let (done, next_run) = store
            .finish_scheduled(rec.id, s.id, &RunOutcome::Delivered { artifact_ref: "x".into() }, 1.0, t(2024, 3, 1, 10))
            .unwrap();
        assert_eq!(next_run, None);
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(store.get(s.id).unwrap().next_run, t(2024, 3, 1, 9));
    }

    #[test]
    fn test_finish_scheduled_rolls_forward() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let rec = store.claim(s.id, t(2024, 3, 1, 10), true).unwrap().unwrap();
        let (_, next_run) = store
            .finish_scheduled(rec.id, s.id, &RunOutcome::Failed { error: "boom".into() }, 0.2, t(2024, 3, 1, 10))
            .unwrap();
        assert_eq!(next_run, Some(t(2024, 3, 2, 9)));
        assert_eq!(store.get(s.id).unwrap().next_run, t(2024, 3, 2, 9));
        assert!(store.due(t(2024, 3, 1, 11)).unwrap().is_empty());
    }

    #[test]
    fn test_finish_scheduled_uses_rule_edited_mid_run() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let rec = store.claim(s.id, t(2024, 3, 1, 10), true).unwrap().unwrap();

        // switched to monthly while the daily run is in flight
        let edited = store.update(s.id, &draft("monthly"), t(2024, 3, 1, 11)).unwrap();
        assert_eq!(edited.next_run, t(2024, 4, 1, 9));

        let (_, next_run) = store
            .finish_scheduled(rec.id, s.id, &RunOutcome::Delivered { artifact_ref: "x".into() }, 1.0, t(2024, 3, 1, 10))
            .unwrap();
        assert_eq!(next_run, Some(t(2024, 4, 1, 9)));
        assert_eq!(store.get(s.id).unwrap().next_run, t(2024, 4, 1, 9));
    }

    #[test]
    fn test_update_without_active_flag_keeps_pause() {
        let (_dir, store) = store();
        let s = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        store.toggle_active(s.id, t(2024, 3, 1, 8)).unwrap();

        let mut renamed = draft("daily");
        renamed.name = "Renamed".into();
        assert_eq!(renamed.is_active, None);
        let updated = store.update(s.id, &renamed, t(2024, 3, 1, 9)).unwrap();
        assert_eq!(updated.name, "Renamed");
        assert!(!updated.is_active);

        renamed.is_active = Some(true);
        assert!(store.update(s.id, &renamed, t(2024, 3, 1, 9)).unwrap().is_active);
    }

    #[test]
    fn test_due_and_history_order() {
        let (_dir, store) = store();
        let a = store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let mut later = draft("monthly");
        later.name = "Later".into();
        store.create(&later, "admin", t(2024, 3, 1, 8)).unwrap();

        let due = store.due(t(2024, 3, 1, 10)).unwrap();
        assert_eq!(due.iter().map(|s| s.id).collect::<Vec<_>>(), vec![a.id]);

        for hour in [10, 11] {
            let rec = store.claim(a.id, t(2024, 3, 1, hour), false).unwrap().unwrap();
            store
                .finalize(rec.id, &RunOutcome::Failed { error: format!("run {hour}") }, 0.1)
                .unwrap();
        }
        let history = store.executions(a.id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].executed_at, t(2024, 3, 1, 11));
        assert_eq!(history[0].error_detail.as_deref(), Some("run 11"));
    }

    #[test]
    fn test_preview_lists_upcoming_triggers() {
        let (_dir, store) = store();
        store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let preview = store.preview(72, t(2024, 3, 1, 8)).unwrap();
        let times: Vec<_> = preview.iter().map(|p| p.0).collect();
        assert_eq!(times, vec![t(2024, 3, 1, 9), t(2024, 3, 2, 9), t(2024, 3, 3, 9)]);
        assert_eq!(preview[0].2, ReportType::VisitorList);
    }

    #[test]
    fn test_preview_rejects_oversized_window() {
        let (_dir, store) = store();
        store.create(&draft("daily"), "admin", t(2024, 3, 1, 8)).unwrap();
        let now = t(2024, 3, 1, 8);

        for hours in [MAX_PREVIEW_HOURS + 1, 10_000_000_000_000, u64::MAX] {
            assert!(matches!(store.preview(hours, now), Err(ReportError::Validation(_))), "{hours}");
        }
        assert_eq!(store.preview(MAX_PREVIEW_HOURS, now).unwrap().len(), 366);
    }
}
