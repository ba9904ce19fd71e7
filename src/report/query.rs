//! Query plans for each report type.
//!
//! Every report type has one [`ReportSpec`] entry describing its projection,
//! joins, grouping, ordering and which columns each filter kind binds to. The
//! builder walks the caller's filters and emits one predicate per honoured
//! filter, joined with AND. Filters a report does not bind are listed on the
//! plan as ignored. Age and inactivity are measured against the caller's
//! reference date, bound as a parameter.

use chrono::NaiveDate;
use serde::Serialize;

use super::filter::{Filter, FilterKind, FilterSet};
use super::{ReportType, Value};
use crate::error::Result;

const DEFAULT_INACTIVE_DAYS: u32 = 90;

const MEMBER_NAME: &str = "m.first_name || ' ' || m.last_name";
const VISITOR_NAME: &str = "v.first_name || ' ' || v.last_name";

const MEMBER_DEPARTMENTS: &str = "(SELECT group_concat(dn.name, ', ') FROM \
     (SELECT d.name AS name FROM member_departments md \
      JOIN departments d ON d.id = md.department_id \
      WHERE md.member_id = m.id ORDER BY d.name) dn)";

/// Parameterized SQL plus the ordered column labels it projects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    pub report_type: ReportType,
    pub title: String,
    pub sql: String,
    pub params: Vec<Value>,
    pub columns: Vec<String>,
    /// Filter keys the report type does not use.
    pub ignored: Vec<String>,
}

struct Predicate {
    clause: String,
    params: Vec<Value>,
}

/// Static description of one report type.
struct ReportSpec {
    title: &'static str,
    columns: &'static [&'static str],
    projection: &'static [&'static str],
    from: &'static str,
    base_where: &'static [&'static str],
    group_by: Option<&'static str>,
    order_by: &'static str,
    search_columns: &'static [&'static str],
    status_column: Option<&'static str>,
    gender_column: Option<&'static str>,
    /// Member id column restricted by a department filter.
    department_scope: Option<&'static str>,
    birth_column: Option<&'static str>,
    category_column: Option<&'static str>,
    date_column: Option<&'static str>,
    /// Member id column checked against recent attendance.
    inactivity_scope: Option<&'static str>,
    /// The projection holds one `?` for the reference date.
    projection_binds_as_of: bool,
}

const NO_BINDINGS: ReportSpec = ReportSpec {
    title: "",
    columns: &[],
    projection: &[],
    from: "",
    base_where: &[],
    group_by: None,
    order_by: "",
    search_columns: &[],
    status_column: None,
    gender_column: None,
    department_scope: None,
    birth_column: None,
    category_column: None,
    date_column: None,
    inactivity_scope: None,
    projection_binds_as_of: false,
};

const MEMBER_DIRECTORY: ReportSpec = ReportSpec {
    title: "Member Directory",
    columns: &["Name", "Gender", "Phone", "Email", "Status", "Join Date", "Departments"],
    projection: &[
        MEMBER_NAME,
        "m.gender",
        "m.phone",
        "m.email",
        "m.membership_status",
        "m.join_date",
        MEMBER_DEPARTMENTS,
    ],
    from: "members m",
    order_by: "m.last_name, m.first_name, m.id",
    search_columns: &[MEMBER_NAME, "m.phone", "m.email"],
    status_column: Some("m.membership_status"),
    gender_column: Some("m.gender"),
    department_scope: Some("m.id"),
    ..NO_BINDINGS
};

const NEW_MEMBERS: ReportSpec = ReportSpec {
    title: "New Members",
    columns: &["Name", "Gender", "Phone", "Email", "Join Date", "Departments"],
    projection: &[
        MEMBER_NAME,
        "m.gender",
        "m.phone",
        "m.email",
        "m.join_date",
        MEMBER_DEPARTMENTS,
    ],
    from: "members m",
    order_by: "m.join_date, m.last_name, m.first_name, m.id",
    search_columns: &[MEMBER_NAME, "m.phone", "m.email"],
    status_column: Some("m.membership_status"),
    gender_column: Some("m.gender"),
    department_scope: Some("m.id"),
    date_column: Some("m.join_date"),
    ..NO_BINDINGS
};

const BIRTHDAYS: ReportSpec = ReportSpec {
    title: "Birthdays",
    columns: &["Name", "Date of Birth", "Day", "Phone", "Email", "Status"],
    projection: &[
        MEMBER_NAME,
        "m.date_of_birth",
        "CAST(strftime('%d', m.date_of_birth) AS INTEGER)",
        "m.phone",
        "m.email",
        "m.membership_status",
    ],
    from: "members m",
    base_where: &["m.date_of_birth IS NOT NULL"],
    order_by: "strftime('%m', m.date_of_birth), strftime('%d', m.date_of_birth), m.last_name, m.id",
    search_columns: &[MEMBER_NAME, "m.phone", "m.email"],
    status_column: Some("m.membership_status"),
    gender_column: Some("m.gender"),
    department_scope: Some("m.id"),
    birth_column: Some("m.date_of_birth"),
    ..NO_BINDINGS
};

// Aggregates per department; no filter binds.
const DEPARTMENT_ANALYSIS: ReportSpec = ReportSpec {
    title: "Department Analysis",
    columns: &["Department", "Total Members", "Male", "Female", "Average Age"],
    projection: &[
        "d.name",
        "COUNT(m.id)",
        "COALESCE(SUM(CASE WHEN LOWER(m.gender) = 'male' THEN 1 ELSE 0 END), 0)",
        "COALESCE(SUM(CASE WHEN LOWER(m.gender) = 'female' THEN 1 ELSE 0 END), 0)",
        "ROUND(AVG((julianday(?) - julianday(m.date_of_birth)) / 365.25), 1)",
    ],
    from: "departments d \
           LEFT JOIN member_departments md ON md.department_id = d.id \
           LEFT JOIN members m ON m.id = md.member_id",
    group_by: Some("d.id"),
    order_by: "d.name, d.id",
    projection_binds_as_of: true,
    ..NO_BINDINGS
};

const INACTIVE_MEMBERS: ReportSpec = ReportSpec {
    title: "Inactive Members",
    columns: &["Name", "Phone", "Email", "Status", "Last Attended"],
    projection: &[
        MEMBER_NAME,
        "m.phone",
        "m.email",
        "m.membership_status",
        "(SELECT MAX(a.service_date) FROM attendance a WHERE a.member_id = m.id)",
    ],
    from: "members m",
    order_by: "m.last_name, m.first_name, m.id",
    search_columns: &[MEMBER_NAME, "m.phone", "m.email"],
    gender_column: Some("m.gender"),
    department_scope: Some("m.id"),
    inactivity_scope: Some("m.id"),
    ..NO_BINDINGS
};

const ATTENDANCE_SUMMARY: ReportSpec = ReportSpec {
    title: "Attendance Summary",
    columns: &["Service Date", "Service Type", "Attendees", "Male", "Female"],
    projection: &[
        "a.service_date",
        "a.service_type",
        "COUNT(*)",
        "SUM(CASE WHEN LOWER(m.gender) = 'male' THEN 1 ELSE 0 END)",
        "SUM(CASE WHEN LOWER(m.gender) = 'female' THEN 1 ELSE 0 END)",
    ],
    from: "attendance a LEFT JOIN members m ON m.id = a.member_id",
    group_by: Some("a.service_date, a.service_type"),
    order_by: "a.service_date, a.service_type",
    department_scope: Some("a.member_id"),
    category_column: Some("a.service_type"),
    date_column: Some("a.service_date"),
    ..NO_BINDINGS
};

const FINANCIAL_SUMMARY: ReportSpec = ReportSpec {
    title: "Financial Summary",
    columns: &["Type", "Category", "Transactions", "Total Amount"],
    projection: &["t.kind", "t.category", "COUNT(*)", "ROUND(SUM(t.amount), 2)"],
    from: "transactions t",
    group_by: Some("t.kind, t.category"),
    order_by: "t.kind, t.category",
    category_column: Some("t.category"),
    date_column: Some("t.transaction_date"),
    ..NO_BINDINGS
};

const VISITOR_LIST: ReportSpec = ReportSpec {
    title: "Visitor List",
    columns: &["Visit Date", "Name", "Phone", "Email", "Invited By", "Follow-up Status"],
    projection: &[
        "v.visit_date",
        VISITOR_NAME,
        "v.phone",
        "v.email",
        "v.invited_by",
        "v.follow_up_status",
    ],
    from: "visitors v",
    order_by: "v.visit_date, v.last_name, v.first_name, v.id",
    search_columns: &[VISITOR_NAME, "v.phone", "v.email"],
    status_column: Some("v.follow_up_status"),
    date_column: Some("v.visit_date"),
    ..NO_BINDINGS
};

const EQUIPMENT_INVENTORY: ReportSpec = ReportSpec {
    title: "Equipment Inventory",
    columns: &[
        "Name",
        "Category",
        "Serial Number",
        "Condition",
        "Location",
        "Purchase Date",
        "Value",
        "Status",
    ],
    projection: &[
        "e.name",
        "e.category",
        "e.serial_number",
        "e.condition",
        "e.location",
        "e.purchase_date",
        "e.purchase_value",
        "e.status",
    ],
    from: "equipment e",
    order_by: "e.category, e.name, e.id",
    search_columns: &["e.name", "e.serial_number", "e.location"],
    status_column: Some("e.status"),
    category_column: Some("e.category"),
    date_column: Some("e.purchase_date"),
    ..NO_BINDINGS
};

fn spec_for(report_type: ReportType) -> &'static ReportSpec {
    match report_type {
        ReportType::MemberDirectory => &MEMBER_DIRECTORY,
        ReportType::NewMembers => &NEW_MEMBERS,
        ReportType::Birthdays => &BIRTHDAYS,
        ReportType::DepartmentAnalysis => &DEPARTMENT_ANALYSIS,
        ReportType::InactiveMembers => &INACTIVE_MEMBERS,
        ReportType::AttendanceSummary => &ATTENDANCE_SUMMARY,
        ReportType::FinancialSummary => &FINANCIAL_SUMMARY,
        ReportType::VisitorList => &VISITOR_LIST,
        ReportType::EquipmentInventory => &EQUIPMENT_INVENTORY,
    }
}

/// Human-readable title of a report type.
pub fn report_title(report_type: ReportType) -> &'static str {
    spec_for(report_type).title
}

/// Column labels a report type projects, in order.
pub fn report_columns(report_type: ReportType) -> &'static [&'static str] {
    spec_for(report_type).columns
}

/// Parse a report type identifier and build its plan as of `as_of`.
pub fn build_plan(report_type: &str, filters: &FilterSet, as_of: NaiveDate) -> Result<QueryPlan> {
    let report_type = report_type.parse::<ReportType>()?;
    Ok(plan(report_type, filters, as_of))
}

/// Build the plan for a known report type as of `as_of`.
pub fn plan(report_type: ReportType, filters: &FilterSet, as_of: NaiveDate) -> QueryPlan {
    let spec = spec_for(report_type);
    let as_of = Value::Text(as_of.format("%Y-%m-%d").to_string());
    let mut clauses: Vec<String> = spec.base_where.iter().map(|c| c.to_string()).collect();
    let mut params = Vec::new();
    if spec.projection_binds_as_of {
        params.push(as_of.clone());
    }
    let mut ignored: Vec<String> = filters.ignored().iter().map(|(k, _)| k.clone()).collect();

    for filter in filters.iter() {
        if filter.kind() == FilterKind::InactiveDays && spec.inactivity_scope.is_some() {
            continue;
        }
        match predicate(spec, filter) {
            Some(p) => {
                clauses.push(p.clause);
                params.extend(p.params);
            }
            None => ignored.push(filter.key().to_string()),
        }
    }

    if let Some(scope) = spec.inactivity_scope {
        let days = filters
            .iter()
            .find_map(|f| match f {
                Filter::InactiveDays(d) => Some(*d),
                _ => None,
            })
            .unwrap_or(DEFAULT_INACTIVE_DAYS);
        clauses.push(format!(
            "(LOWER(m.membership_status) = 'inactive' OR NOT EXISTS \
             (SELECT 1 FROM attendance ra WHERE ra.member_id = {scope} \
              AND ra.service_date >= date(?, ?)))"
        ));
        params.push(as_of);
        params.push(Value::Text(format!("-{days} days")));
    }

    let mut sql = format!("SELECT {} FROM {}", spec.projection.join(", "), spec.from);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    if let Some(group_by) = spec.group_by {
        sql.push_str(" GROUP BY ");
        sql.push_str(group_by);
    }
    sql.push_str(" ORDER BY ");
    sql.push_str(spec.order_by);

    QueryPlan {
        report_type,
        title: spec.title.to_string(),
        sql,
        params,
        columns: spec.columns.iter().map(|c| c.to_string()).collect(),
        ignored,
    }
}

fn predicate(spec: &ReportSpec, filter: &Filter) -> Option<Predicate> {
    match filter {
        Filter::Search(text) => {
            if spec.search_columns.is_empty() {
                return None;
            }
            let pattern = format!("%{}%", escape_like(&text.to_lowercase()));
            let ors: Vec<String> = spec
                .search_columns
                .iter()
                .map(|c| format!("LOWER({c}) LIKE ? ESCAPE '\\'"))
                .collect();
            Some(Predicate {
                clause: format!("({})", ors.join(" OR ")),
                params: vec![Value::Text(pattern); spec.search_columns.len()],
            })
        }
        Filter::Status(status) => spec.status_column.map(|c| Predicate {
            clause: format!("LOWER({c}) = ?"),
            params: vec![Value::Text(status.to_lowercase())],
        }),
        Filter::Gender(gender) => spec.gender_column.map(|c| Predicate {
            clause: format!("LOWER({c}) = ?"),
            params: vec![Value::Text(gender.to_lowercase())],
        }),
        Filter::Department(id) => spec.department_scope.map(|c| Predicate {
            clause: format!(
                "{c} IN (SELECT fd.member_id FROM member_departments fd WHERE fd.department_id = ?)"
            ),
            params: vec![Value::Integer(*id)],
        }),
        Filter::BirthMonth(month) => spec.birth_column.map(|c| Predicate {
            clause: format!("CAST(strftime('%m', {c}) AS INTEGER) = ?"),
            params: vec![Value::Integer(i64::from(*month))],
        }),
        Filter::Category(category) => spec.category_column.map(|c| Predicate {
            clause: format!("LOWER({c}) = LOWER(?)"),
            params: vec![Value::Text(category.clone())],
        }),
        Filter::DateRange(range) => spec.date_column.map(|c| Predicate {
            clause: format!("date({c}) BETWEEN ? AND ?"),
            params: vec![
                Value::Text(range.start.format("%Y-%m-%d").to_string()),
                Value::Text(range.end.format("%Y-%m-%d").to_string()),
            ],
        }),
        Filter::InactiveDays(_) => None,
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReportError;

    fn filters(pairs: &[(&str, &str)]) -> FilterSet {
        FilterSet::from_pairs(pairs.iter().copied()).unwrap()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    #[test]
    fn test_every_type_has_matching_columns() {
        for t in ReportType::ALL {
            let spec = spec_for(t);
            assert_eq!(spec.columns.len(), spec.projection.len(), "{t}");
            assert!(!spec.title.is_empty());
        }
    }

    #[test]
    fn test_plan_is_deterministic() {
        let f = filters(&[("search", "ann"), ("gender", "female"), ("department", "2")]);
        for t in ReportType::ALL {
            assert_eq!(plan(t, &f, as_of()), plan(t, &f, as_of()));
        }
    }

    #[test]
    fn test_unknown_report_type() {
        let err = build_plan("payroll", &FilterSet::new(), as_of()).unwrap_err();
        assert!(matches!(err, ReportError::UnknownReportType(t) if t == "payroll"));
    }

    #[test]
    fn test_filters_are_conjunctive() {
        let p = plan(
            ReportType::MemberDirectory,
            &filters(&[("status", "active"), ("gender", "male")]),
            as_of(),
        );
        assert!(p.sql.contains("WHERE LOWER(m.membership_status) = ? AND LOWER(m.gender) = ?"));
        assert_eq!(p.params, vec![Value::from("active"), Value::from("male")]);
        assert!(p.ignored.is_empty());
    }

    #[test]
    fn test_search_ors_searchable_columns() {
        let p = plan(ReportType::VisitorList, &filters(&[("q", "50%_off")]), as_of());
        assert_eq!(p.sql.matches("LIKE ? ESCAPE").count(), 3);
        assert!(p.sql.contains(" OR "));
        assert_eq!(p.params, vec![Value::from("%50\\%\\_off%"); 3]);
    }

    #[test]
    fn test_birthdays_filter_by_month_only() {
        let p = plan(ReportType::Birthdays, &filters(&[("month", "3")]), as_of());
        assert!(p.sql.contains("CAST(strftime('%m', m.date_of_birth) AS INTEGER) = ?"));
        assert_eq!(p.params, vec![Value::Integer(3)]);
    }

    #[test]
    fn test_department_analysis_ignores_filters() {
        let f = filters(&[("search", "x"), ("gender", "male"), ("start", "2024-01-01"), ("end", "2024-01-31")]);
        let p = plan(ReportType::DepartmentAnalysis, &f, as_of());
        assert!(!p.sql.contains("WHERE"));
        assert!(p.sql.contains("julianday(?)"));
        assert_eq!(p.params, vec![Value::from("2024-03-15")]);
        assert_eq!(p.ignored, vec!["search", "gender", "date_range"]);
        assert!(p.sql.contains("GROUP BY d.id"));
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let p = plan(
            ReportType::FinancialSummary,
            &filters(&[("start", "2024-03-01"), ("end", "2024-03-31")]),
            as_of(),
        );
        assert!(p.sql.contains("date(t.transaction_date) BETWEEN ? AND ?"));
        assert_eq!(p.params, vec![Value::from("2024-03-01"), Value::from("2024-03-31")]);
    }

    #[test]
    fn test_inactive_members_default_window() {
        let p = plan(ReportType::InactiveMembers, &FilterSet::new(), as_of());
        assert_eq!(p.params, vec![Value::from("2024-03-15"), Value::from("-90 days")]);
        assert!(!p.sql.contains("'now'"));

        let p = plan(ReportType::InactiveMembers, &filters(&[("inactive_days", "30")]), as_of());
        assert_eq!(p.params, vec![Value::from("2024-03-15"), Value::from("-30 days")]);
        assert!(p.ignored.is_empty());
    }

    #[test]
    fn test_unknown_keys_reported_as_ignored() {
        let p = plan(ReportType::EquipmentInventory, &filters(&[("colour", "red"), ("gender", "male")]), as_of());
        assert_eq!(p.ignored, vec!["colour", "gender"]);
    }
}
