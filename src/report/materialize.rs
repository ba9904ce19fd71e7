//! Execute a query plan against storage.

use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::{QueryPlan, ReportDataset, Value};
use crate::error::{ReportError, Result};
use crate::storage::Pool;

/// Check out a connection and run the plan once.
pub fn execute(pool: &Pool, plan: &QueryPlan) -> Result<ReportDataset> {
    let conn = pool.get().map_err(ReportError::query)?;
    execute_on(&conn, plan)
}

/// Run the plan on an existing connection. Columns are read by position, so
/// the dataset follows the plan's label order regardless of result-set names.
pub fn execute_on(conn: &Connection, plan: &QueryPlan) -> Result<ReportDataset> {
    let mut stmt = conn.prepare(&plan.sql).map_err(ReportError::query)?;

    let width = plan.columns.len();
    if stmt.column_count() != width {
        return Err(ReportError::query(format!(
            "{} query projects {} columns, plan declares {}",
            plan.report_type,
            stmt.column_count(),
            width
        )));
    }

    let rows = stmt
        .query_map(params_from_iter(plan.params.iter()), |row| {
            (0..width)
                .map(|i| row.get_ref(i).map(Value::from))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })
        .map_err(ReportError::query)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(ReportError::query)?;

    debug!(report = %plan.report_type, rows = rows.len(), "materialized dataset");
    ReportDataset::new(plan.columns.clone(), rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::filter::FilterSet;
    use crate::report::query::plan;
    use crate::report::ReportType;
    use crate::storage::schema::migrate;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO departments (id, name) VALUES (1, 'Choir'), (2, 'Ushers');
             INSERT INTO members (id, first_name, last_name, gender, date_of_birth, phone, email, membership_status, join_date)
             VALUES (1, 'Ada', 'Okafor', 'female', '1990-03-14', '555-0101', 'ada@example.org', 'active', '2024-01-05'),
                    (2, 'Ben', 'Mensah', 'male', '1985-07-02', '555-0102', NULL, 'active', '2023-11-20');
             INSERT INTO member_departments (member_id, department_id) VALUES (1, 2), (1, 1), (2, 2);",
        )
        .unwrap();
        conn
    }

    fn as_of() -> chrono::NaiveDate {
        chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_member_directory_joins_departments() {
        let conn = conn();
        let ds = execute_on(&conn, &plan(ReportType::MemberDirectory, &FilterSet::new(), as_of())).unwrap();
        assert_eq!(ds.columns()[0], "Name");
        assert_eq!(ds.len(), 2);
        // ordered by last name: Mensah, Okafor
        assert_eq!(ds.rows()[0][0], Value::from("Ben Mensah"));
        assert_eq!(ds.rows()[0][3], Value::Null);
        assert_eq!(ds.rows()[1][6], Value::from("Choir, Ushers"));
    }

    #[test]
    fn test_column_count_mismatch_is_query_error() {
        let conn = conn();
        let mut p = plan(ReportType::MemberDirectory, &FilterSet::new(), as_of());
        p.columns.pop();
        assert!(matches!(execute_on(&conn, &p), Err(ReportError::QueryExecution { .. })));
    }

    #[test]
    fn test_malformed_sql_is_query_error() {
        let conn = conn();
        let mut p = plan(ReportType::VisitorList, &FilterSet::new(), as_of());
        p.sql = "SELEC nothing".into();
        let err = execute_on(&conn, &p).unwrap_err();
        assert!(matches!(err, ReportError::QueryExecution { .. }));
    }
}
