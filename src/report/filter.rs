//! Typed report filters.
//!
//! Callers hand in loose key/value pairs (query strings, CLI `--filter`
//! flags, stored schedule configuration). They are parsed once into a
//! [`FilterSet`] of known [`Filter`] variants; keys nobody understands are
//! kept aside in `ignored` so they can be reported instead of silently lost.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::DateRange;
use crate::error::{ReportError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Filter {
    /// Case-insensitive partial match over the report's searchable columns.
    Search(String),
    Status(String),
    Gender(String),
    Department(i64),
    /// Calendar month 1-12, year-agnostic.
    BirthMonth(u32),
    /// Finance category, equipment category or service type.
    Category(String),
    InactiveDays(u32),
    DateRange(DateRange),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Search,
    Status,
    Gender,
    Department,
    BirthMonth,
    Category,
    InactiveDays,
    DateRange,
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Search(_) => FilterKind::Search,
            Filter::Status(_) => FilterKind::Status,
            Filter::Gender(_) => FilterKind::Gender,
            Filter::Department(_) => FilterKind::Department,
            Filter::BirthMonth(_) => FilterKind::BirthMonth,
            Filter::Category(_) => FilterKind::Category,
            Filter::InactiveDays(_) => FilterKind::InactiveDays,
            Filter::DateRange(_) => FilterKind::DateRange,
        }
    }

    /// The query-string key this filter is written back as.
    pub fn key(&self) -> &'static str {
        match self {
            Filter::Search(_) => "search",
            Filter::Status(_) => "status",
            Filter::Gender(_) => "gender",
            Filter::Department(_) => "department",
            Filter::BirthMonth(_) => "month",
            Filter::Category(_) => "category",
            Filter::InactiveDays(_) => "inactive_days",
            Filter::DateRange(_) => "date_range",
        }
    }
}

/// Ordered, one-per-kind collection of filters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(default)]
    filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    ignored: Vec<(String, String)>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse loose pairs. Blank values are skipped, unknown keys are recorded
    /// as ignored, malformed values for known keys are a validation error.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = FilterSet::new();
        let mut start: Option<NaiveDate> = None;
        let mut end: Option<NaiveDate> = None;

        for (key, value) in pairs {
            let key = key.as_ref().trim();
            let value = value.as_ref().trim();
            if value.is_empty() {
                continue;
            }
            match key.to_ascii_lowercase().as_str() {
                "search" | "q" => set.insert(Filter::Search(value.to_string())),
                "status" => set.insert(Filter::Status(value.to_ascii_lowercase())),
                "gender" => set.insert(Filter::Gender(value.to_ascii_lowercase())),
                "department" | "department_id" => {
                    let id = value
                        .parse::<i64>()
                        .map_err(|_| ReportError::validation(format!("department must be an id, got '{value}'")))?;
                    set.insert(Filter::Department(id));
                }
                "month" | "birth_month" => {
                    let month = value
                        .parse::<u32>()
                        .ok()
                        .filter(|m| (1..=12).contains(m))
                        .ok_or_else(|| ReportError::validation(format!("month must be 1-12, got '{value}'")))?;
                    set.insert(Filter::BirthMonth(month));
                }
                "category" | "service_type" => set.insert(Filter::Category(value.to_string())),
                "inactive_days" => {
                    let days = value
                        .parse::<u32>()
                        .map_err(|_| ReportError::validation(format!("inactive_days must be a number, got '{value}'")))?;
                    set.insert(Filter::InactiveDays(days));
                }
                "start" | "start_date" => start = Some(parse_date(key, value)?),
                "end" | "end_date" => end = Some(parse_date(key, value)?),
                _ => set.ignored.push((key.to_string(), value.to_string())),
            }
        }

        match (start, end) {
            (Some(s), Some(e)) => set.insert(Filter::DateRange(DateRange::new(s, e)?)),
            (None, None) => {}
            _ => return Err(ReportError::validation("date range needs both start and end")),
        }

        Ok(set)
    }

    /// Add a filter, replacing any existing filter of the same kind in place.
    pub fn insert(&mut self, filter: Filter) {
        match self.filters.iter_mut().find(|f| f.kind() == filter.kind()) {
            Some(existing) => *existing = filter,
            None => self.filters.push(filter),
        }
    }

    pub fn set_date_range(&mut self, range: DateRange) {
        self.insert(Filter::DateRange(range));
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.filters.iter().find_map(|f| match f {
            Filter::DateRange(r) => Some(*r),
            _ => None,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Filter> {
        self.filters.iter()
    }

    pub fn ignored(&self) -> &[(String, String)] {
        &self.ignored
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

fn parse_date(key: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| ReportError::validation(format!("{key} must be YYYY-MM-DD, got '{value}'")))
}
