//! Report pipeline against a seeded on-disk database.

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDate, TimeZone, Utc};
use shepherd::activity::MemorySink;
use shepherd::context::{ActorContext, Permission};
use shepherd::report::service::ReportService;
use shepherd::report::{materialize, query, DateRange, FilterSet, ReportFormat, ReportRequest, ReportType, Value};
use shepherd::storage::{open_pool, Pool};

fn seeded_pool(dir: &tempfile::TempDir) -> Pool {
    let pool = open_pool(dir.path().join("church.db").to_str().unwrap()).unwrap();
    pool.get()
        .unwrap()
        .execute_batch(
            "INSERT INTO departments (id, name) VALUES (1, 'Choir'), (2, 'Youth'), (3, 'Empty');
             INSERT INTO members (id, first_name, last_name, gender, date_of_birth, phone, email, membership_status, join_date)
             VALUES (1, 'Ada', 'Okafor', 'female', '1990-03-14', '555-0101', 'ada@example.org', 'active', '2024-01-05'),
                    (2, 'Ben', 'Mensah', 'male', '1985-07-02', '555-0102', NULL, 'active', '2023-11-20'),
                    (3, 'Chi', 'Eze', 'female', '2001-03-30', NULL, 'chi@example.org', 'inactive', '2022-06-01'),
                    (4, 'Dan', 'Bello', NULL, '1979-03-01', NULL, NULL, 'active', '2024-03-10'),
                    (5, 'Efe', 'Ade', 'male', '1995-12-25', NULL, NULL, 'active', NULL);
             INSERT INTO member_departments (member_id, department_id)
             VALUES (1, 1), (2, 1), (4, 1), (3, 2), (5, 2);
             INSERT INTO visitors (first_name, last_name, phone, email, visit_date, invited_by)
             VALUES ('Gus', 'Hart', '555-0199', NULL, '2024-03-03', 'Ada Okafor'),
                    ('Ivy', 'Lane', NULL, 'ivy@example.org', '2024-04-07', NULL);
             INSERT INTO transactions (transaction_date, kind, category, amount)
             VALUES ('2024-03-03', 'income', 'Tithe', 120.5),
                    ('2024-03-10', 'income', 'Tithe', 80.0),
                    ('2024-03-12', 'expense', 'Utilities', 45.25),
                    ('2024-04-01', 'income', 'Offering', 10.0);",
        )
        .unwrap();
    pool
}

fn service(pool: Pool) -> ReportService {
    ReportService::new(pool, "Grace Fellowship", FixedOffset::east_opt(0).unwrap(), Arc::new(MemorySink::default()))
}

fn mid_march() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
}

fn int(v: &Value) -> i64 {
    match v {
        Value::Integer(i) => *i,
        other => panic!("expected integer, got {other:?}"),
    }
}

#[test]
fn test_birthdays_for_march_only() {
    let dir = tempfile::tempdir().unwrap();
    let pool = seeded_pool(&dir);
    let filters = FilterSet::from_pairs([("month", "3")]).unwrap();
    let plan = query::plan(ReportType::Birthdays, &filters, mid_march());
    let dataset = materialize::execute(&pool, &plan).unwrap();

    let births: Vec<String> = dataset.rows().iter().map(|r| r[1].to_string()).collect();
    assert_eq!(births, vec!["1979-03-01", "1990-03-14", "2001-03-30"]);
    assert!(births.iter().all(|d| &d[5..7] == "03"));
}

#[test]
fn test_department_analysis_gender_counts_bounded() {
    let dir = tempfile::tempdir().unwrap();
    let pool = seeded_pool(&dir);
    let plan = query::plan(ReportType::DepartmentAnalysis, &FilterSet::new(), mid_march());
    let dataset = materialize::execute(&pool, &plan).unwrap();

    assert_eq!(dataset.len(), 3);
    for row in dataset.rows() {
        let (total, male, female) = (int(&row[1]), int(&row[2]), int(&row[3]));
        assert!(male + female <= total, "{row:?}");
    }
    // Choir: Ada (f), Ben (m), Dan (no gender recorded)
    let choir = &dataset.rows()[0];
    assert_eq!(choir[0].to_string(), "Choir");
    assert_eq!((int(&choir[1]), int(&choir[2]), int(&choir[3])), (3, 1, 1));
    let empty = &dataset.rows()[1];
    assert_eq!(empty[0].to_string(), "Empty");
    assert_eq!(int(&empty[1]), 0);
}

#[test]
fn test_visitor_list_respects_date_range() {
    let dir = tempfile::tempdir().unwrap();
    let reports = service(seeded_pool(&dir));
    let actor = ActorContext::new("secretary", [Permission::ViewReports]);
    let march = DateRange::month_of(chrono::NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
    let request = ReportRequest {
        report_type: ReportType::VisitorList,
        filters: FilterSet::new(),
        format: ReportFormat::Csv,
        date_range: Some(march),
    };
    let artifact = reports
        .generate(&actor, &request, Utc.with_ymd_and_hms(2024, 3, 20, 10, 0, 0).unwrap())
        .unwrap();

    assert_eq!(artifact.row_count, 1);
    assert_eq!(artifact.filename, "visitor_list_20240320_100000.csv");
    let text = String::from_utf8(artifact.bytes).unwrap();
    assert!(text.contains("Gus Hart"));
    assert!(!text.contains("Ivy Lane"));
}

#[test]
fn test_financial_document_shows_period() {
    let dir = tempfile::tempdir().unwrap();
    let reports = service(seeded_pool(&dir));
    let treasurer = ActorContext::new("treasurer", [Permission::ViewReports, Permission::ViewFinancial]);
    let request = ReportRequest {
        report_type: ReportType::FinancialSummary,
        filters: FilterSet::from_pairs([("start", "2024-03-01"), ("end", "2024-03-31")]).unwrap(),
        format: ReportFormat::Document,
        date_range: None,
    };
    let artifact = reports.generate(&treasurer, &request, Utc::now()).unwrap();

    assert_eq!(artifact.content_type, "text/html; charset=utf-8");
    assert_eq!(artifact.row_count, 2);
    let html = String::from_utf8(artifact.bytes).unwrap();
    assert!(html.contains("Grace Fellowship"));
    assert!(html.contains("Financial Summary"));
    assert!(html.contains("2024-03-01 to 2024-03-31"));
    assert!(!html.contains("Offering"));
}

#[test]
fn test_search_filter_is_parameterized() {
    let dir = tempfile::tempdir().unwrap();
    let pool = seeded_pool(&dir);
    let filters = FilterSet::from_pairs([("search", "' OR 1=1 --")]).unwrap();
    let plan = query::plan(ReportType::MemberDirectory, &filters, mid_march());
    assert!(!plan.sql.contains("1=1"));
    assert!(materialize::execute(&pool, &plan).unwrap().is_empty());
}

#[test]
fn test_inactivity_window_counts_back_from_reference_date() {
    let dir = tempfile::tempdir().unwrap();
    let pool = seeded_pool(&dir);
    pool.get()
        .unwrap()
        .execute_batch("INSERT INTO attendance (member_id, service_date) VALUES (1, '2024-03-10');")
        .unwrap();
    let filters = FilterSet::from_pairs([("inactive_days", "30")]).unwrap();
    let names = |as_of: NaiveDate| -> Vec<String> {
        let plan = query::plan(ReportType::InactiveMembers, &filters, as_of);
        let dataset = materialize::execute(&pool, &plan).unwrap();
        dataset.rows().iter().map(|r| r[0].to_string()).collect()
    };

    // Ada attended five days before mid-March
    let march = names(mid_march());
    assert_eq!(march.len(), 4);
    assert!(!march.contains(&"Ada Okafor".to_string()));
    assert!(march.contains(&"Chi Eze".to_string()));

    let june = names(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());
    assert_eq!(june.len(), 5);
    assert!(june.contains(&"Ada Okafor".to_string()));
}
