//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Administration data the reports project.
        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            gender TEXT,
            date_of_birth TEXT,
            phone TEXT,
            email TEXT,
            address TEXT,
            membership_status TEXT NOT NULL DEFAULT 'active',
            join_date TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS departments (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            description TEXT
        );

        CREATE TABLE IF NOT EXISTS member_departments (
            member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
            department_id INTEGER NOT NULL REFERENCES departments(id) ON DELETE CASCADE,
            PRIMARY KEY (member_id, department_id)
        );

        CREATE TABLE IF NOT EXISTS attendance (
            id INTEGER PRIMARY KEY,
            member_id INTEGER REFERENCES members(id) ON DELETE SET NULL,
            service_date TEXT NOT NULL,
            service_type TEXT NOT NULL DEFAULT 'sunday_service'
        );

        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY,
            transaction_date TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('income', 'expense')),
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            description TEXT,
            member_id INTEGER REFERENCES members(id) ON DELETE SET NULL
        );

        CREATE TABLE IF NOT EXISTS visitors (
            id INTEGER PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT,
            email TEXT,
            visit_date TEXT NOT NULL,
            invited_by TEXT,
            follow_up_status TEXT NOT NULL DEFAULT 'pending'
        );

        CREATE TABLE IF NOT EXISTS equipment (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            category TEXT NOT NULL,
            serial_number TEXT,
            condition TEXT,
            location TEXT,
            purchase_date TEXT,
            purchase_value REAL,
            status TEXT NOT NULL DEFAULT 'in_use'
        );

        -- Scheduling.
        CREATE TABLE IF NOT EXISTS report_schedules (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            report_type TEXT NOT NULL,
            configuration_json TEXT NOT NULL,
            frequency TEXT NOT NULL,
            time_of_day TEXT NOT NULL,
            recipients_json TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            next_run TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schedule_executions (
            id INTEGER PRIMARY KEY,
            schedule_id INTEGER NOT NULL REFERENCES report_schedules(id) ON DELETE CASCADE,
            executed_at TEXT NOT NULL,
            duration_seconds REAL NOT NULL DEFAULT 0,
            status TEXT NOT NULL CHECK (status IN ('running', 'success', 'failed')),
            artifact_ref TEXT,
            error_detail TEXT
        );

        CREATE TABLE IF NOT EXISTS delivery_outbox (
            id INTEGER PRIMARY KEY,
            schedule_id INTEGER REFERENCES report_schedules(id) ON DELETE SET NULL,
            recipients_json TEXT NOT NULL,
            subject TEXT NOT NULL,
            artifact_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            content_type TEXT NOT NULL,
            dispatched INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_members_name ON members(last_name, first_name);
        CREATE INDEX IF NOT EXISTS idx_attendance_member_date ON attendance(member_id, service_date);
        CREATE INDEX IF NOT EXISTS idx_transactions_date ON transactions(transaction_date);
        CREATE INDEX IF NOT EXISTS idx_visitors_date ON visitors(visit_date);
        CREATE INDEX IF NOT EXISTS idx_schedules_due ON report_schedules(is_active, next_run);
        CREATE INDEX IF NOT EXISTS idx_executions_schedule ON schedule_executions(schedule_id, executed_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_pending ON delivery_outbox(dispatched, id);

        -- At most one unresolved run per schedule.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_executions_single_flight
            ON schedule_executions(schedule_id) WHERE status = 'running';",
    )?;

    // Migration: Add 'updated_at' to report_schedules if missing
    let has_updated_at: i32 = conn
        .query_row(
            "SELECT count(*) FROM pragma_table_info('report_schedules') WHERE name='updated_at'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if has_updated_at == 0 {
        conn.execute("ALTER TABLE report_schedules ADD COLUMN updated_at TEXT", [])?;
        conn.execute("UPDATE report_schedules SET updated_at = created_at", [])?;
    }

    conn.execute("INSERT OR IGNORE INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}
