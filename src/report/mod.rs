//! Report pipeline: query plans, dataset materialization, and rendering.

pub mod filter;
pub mod materialize;
pub mod query;
pub mod render;
pub mod service;

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::context::Permission;
use crate::error::ReportError;

pub use self::filter::{Filter, FilterSet};
pub use self::query::{build_plan, QueryPlan};
pub use self::render::{Artifact, DocumentMeta};

/// The closed set of reports this module can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    MemberDirectory,
    NewMembers,
    Birthdays,
    DepartmentAnalysis,
    InactiveMembers,
    AttendanceSummary,
    FinancialSummary,
    VisitorList,
    EquipmentInventory,
}

impl ReportType {
    pub const ALL: [ReportType; 9] = [
        ReportType::MemberDirectory,
        ReportType::NewMembers,
        ReportType::Birthdays,
        ReportType::DepartmentAnalysis,
        ReportType::InactiveMembers,
        ReportType::AttendanceSummary,
        ReportType::FinancialSummary,
        ReportType::VisitorList,
        ReportType::EquipmentInventory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::MemberDirectory => "member_directory",
            ReportType::NewMembers => "new_members",
            ReportType::Birthdays => "birthdays",
            ReportType::DepartmentAnalysis => "department_analysis",
            ReportType::InactiveMembers => "inactive_members",
            ReportType::AttendanceSummary => "attendance_summary",
            ReportType::FinancialSummary => "financial_summary",
            ReportType::VisitorList => "visitor_list",
            ReportType::EquipmentInventory => "equipment_inventory",
        }
    }

    pub fn required_permission(&self) -> Permission {
        match self {
            ReportType::FinancialSummary => Permission::ViewFinancial,
            _ => Permission::ViewReports,
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        ReportType::ALL
            .into_iter()
            .find(|t| t.as_str() == key)
            .ok_or_else(|| ReportError::UnknownReportType(s.to_string()))
    }
}

/// Output formats. `Csv` is the default "tabular" format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Csv,
    Tsv,
    Spreadsheet,
    Document,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Tsv => "tsv",
            ReportFormat::Spreadsheet => "spreadsheet",
            ReportFormat::Document => "document",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "text/csv; charset=utf-8",
            ReportFormat::Tsv => "text/tab-separated-values; charset=utf-8",
            ReportFormat::Spreadsheet => "application/vnd.ms-excel",
            ReportFormat::Document => "text/html; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Csv => "csv",
            ReportFormat::Tsv => "tsv",
            ReportFormat::Spreadsheet => "xls",
            ReportFormat::Document => "html",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = ReportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" | "tabular" => Ok(ReportFormat::Csv),
            "tsv" | "tab" => Ok(ReportFormat::Tsv),
            "spreadsheet" | "excel" | "xls" => Ok(ReportFormat::Spreadsheet),
            "document" | "pdf" | "html" => Ok(ReportFormat::Document),
            _ => Err(ReportError::UnknownFormat(s.to_string())),
        }
    }
}

/// Inclusive calendar date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ReportError> {
        if end < start {
            return Err(ReportError::validation(format!(
                "date range end {end} is before start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// First through last day of the month containing `day`.
    pub fn month_of(day: NaiveDate) -> Self {
        let start = day.with_day(1).unwrap_or(day);
        let next_month = start
            .checked_add_months(chrono::Months::new(1))
            .unwrap_or(start);
        let end = next_month.pred_opt().unwrap_or(start);
        Self { start, end }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start.format("%Y-%m-%d"), self.end.format("%Y-%m-%d"))
    }
}

/// A single cell (or query parameter) value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Real(r) => write!(f, "{r}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(v: ValueRef<'_>) -> Self {
        match v {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(rusqlite::types::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::from(s.as_str()),
        })
    }
}

/// Materialized report rows. Every row has `columns.len()` values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportDataset {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl ReportDataset {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self, ReportError> {
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(ReportError::query(format!(
                "row {i} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows with every cell formatted as display text.
    pub fn text_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|r| r.iter().map(|v| v.to_string()).collect())
            .collect()
    }
}

/// One ad-hoc or scheduled report invocation.
#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub report_type: ReportType,
    pub filters: FilterSet,
    pub format: ReportFormat,
    pub date_range: Option<DateRange>,
}

impl ReportRequest {
    /// The filter set with the request's date range applied.
    pub fn effective_filters(&self) -> FilterSet {
        let mut filters = self.filters.clone();
        if let Some(range) = self.date_range {
            filters.set_date_range(range);
        }
        filters
    }
}
