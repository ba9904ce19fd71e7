//! Persisted schedule definitions and the input shape used to create them.

use std::fmt;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ReportError, Result};
use crate::report::{DateRange, FilterSet, ReportFormat, ReportRequest, ReportType};

/// Current layout of `report_schedules.configuration_json`.
pub const CONFIG_VERSION: u32 = 1;

/// Recurrence frequency.
///
/// `Unrecognized` only arises from rows written by something other than this
/// crate; new schedules are validated against the four known values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Unrecognized(String),
}

impl Frequency {
    pub fn as_str(&self) -> &str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Unrecognized(s) => s,
        }
    }

    /// Lenient decoding for stored values.
    pub fn from_stored(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Frequency::Daily,
            "weekly" => Frequency::Weekly,
            "monthly" => Frequency::Monthly,
            "quarterly" => Frequency::Quarterly,
            _ => Frequency::Unrecognized(s.to_string()),
        }
    }

    /// Strict parsing for new input.
    pub fn parse(s: &str) -> Result<Self> {
        match Self::from_stored(s) {
            Frequency::Unrecognized(_) => Err(ReportError::validation(format!(
                "frequency must be one of daily, weekly, monthly, quarterly; got '{s}'"
            ))),
            f => Ok(f),
        }
    }

    /// The most recent complete period before `today`: yesterday for daily,
    /// the seven days before `today` for weekly, the previous calendar month
    /// for monthly (and unrecognized), the previous three calendar months for
    /// quarterly.
    pub fn completed_period(&self, today: NaiveDate) -> DateRange {
        let yesterday = today.checked_sub_days(Days::new(1)).unwrap_or(today);
        let month_start = today.with_day(1).unwrap_or(today);
        let months_back = |n: u32| month_start.checked_sub_months(Months::new(n)).unwrap_or(month_start);
        let last_month_end = month_start.pred_opt().unwrap_or(month_start);
        match self {
            Frequency::Daily => DateRange {
                start: yesterday,
                end: yesterday,
            },
            Frequency::Weekly => DateRange {
                start: today.checked_sub_days(Days::new(7)).unwrap_or(today),
                end: yesterday,
            },
            Frequency::Quarterly => DateRange {
                start: months_back(3),
                end: last_month_end,
            },
            Frequency::Monthly | Frequency::Unrecognized(_) => DateRange {
                start: months_back(1),
                end: last_month_end,
            },
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Frequency {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Frequency {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Frequency::from_stored(&s))
    }
}

/// Stored report configuration for a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfiguration {
    pub version: u32,
    pub filters: FilterSet,
    pub format: ReportFormat,
    #[serde(default)]
    pub include_charts: bool,
}

impl Default for ScheduleConfiguration {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            filters: FilterSet::default(),
            format: ReportFormat::default(),
            include_charts: false,
        }
    }
}

impl ScheduleConfiguration {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored blob, upgrading older layouts.
    ///
    /// Unversioned blobs carry `filters` as a flat object of scalars and
    /// `format` as a free-form name.
    pub fn from_json(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        match value.get("version").and_then(|v| v.as_u64()) {
            Some(v) if v == u64::from(CONFIG_VERSION) => Ok(serde_json::from_value(value)?),
            Some(v) => Err(ReportError::Storage(format!(
                "unsupported schedule configuration version {v}"
            ))),
            None => Self::from_legacy(&value),
        }
    }

    fn from_legacy(value: &serde_json::Value) -> Result<Self> {
        let filters = match value.get("filters") {
            Some(serde_json::Value::Object(map)) => FilterSet::from_pairs(map.iter().filter_map(|(k, v)| scalar_text(v).map(|t| (k.clone(), t))))?,
            _ => FilterSet::default(),
        };
        let format = match value.get("format").and_then(|f| f.as_str()) {
            Some(name) => name.parse()?,
            None => ReportFormat::default(),
        };
        let include_charts = value
            .get("include_charts")
            .and_then(|b| b.as_bool())
            .unwrap_or(false);
        Ok(Self {
            version: CONFIG_VERSION,
            filters,
            format,
            include_charts,
        })
    }
}

fn scalar_text(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A persisted schedule.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleDefinition {
    pub id: i64,
    pub name: String,
    pub report_type: ReportType,
    pub configuration: ScheduleConfiguration,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    pub recipients: Vec<String>,
    pub is_active: bool,
    pub next_run: DateTime<Utc>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduleDefinition {
    /// The report this schedule produces when run on `today`. Without a stored
    /// date range the report covers the period that ended before `today`
    /// (see [`Frequency::completed_period`]), so a monthly run on the 1st
    /// reports the month just finished.
    pub fn report_request(&self, today: NaiveDate) -> ReportRequest {
        let filters = self.configuration.filters.clone();
        let date_range = match filters.date_range() {
            Some(_) => None,
            None => Some(self.frequency.completed_period(today)),
        };
        ReportRequest {
            report_type: self.report_type,
            filters,
            format: self.configuration.format,
            date_range,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.next_run <= now
    }
}

/// Loose schedule fields as submitted over HTTP or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub report_type: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub time_of_day: String,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub filters: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub include_charts: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Validated schedule fields, ready to persist.
#[derive(Debug, Clone)]
pub struct ScheduleDraft {
    pub name: String,
    pub report_type: ReportType,
    pub configuration: ScheduleConfiguration,
    pub frequency: Frequency,
    pub time_of_day: NaiveTime,
    pub recipients: Vec<String>,
    /// `None` keeps the stored flag on update; create treats it as active.
    pub is_active: Option<bool>,
}

impl ScheduleInput {
    pub fn validate(&self) -> Result<ScheduleDraft> {
        let mut missing = Vec::new();
        let name = self.name.trim();
        if name.is_empty() {
            missing.push("name");
        }
        if self.report_type.trim().is_empty() {
            missing.push("report type");
        }
        if self.frequency.trim().is_empty() {
            missing.push("frequency");
        }
        if self.time_of_day.trim().is_empty() {
            missing.push("time");
        }
        let recipients = normalize_recipients(&self.recipients);
        if recipients.is_empty() {
            missing.push("at least one recipient");
        }
        if !missing.is_empty() {
            return Err(ReportError::validation(format!("missing {}", missing.join(", "))));
        }

        if let Some(bad) = recipients.iter().find(|r| !looks_like_email(r)) {
            return Err(ReportError::validation(format!("'{bad}' is not an email address")));
        }

        let report_type: ReportType = self.report_type.parse()?;
        let frequency = Frequency::parse(&self.frequency)?;
        let time_of_day = parse_time_of_day(&self.time_of_day)?;
        let format = match self.format.as_deref().map(str::trim) {
            Some(f) if !f.is_empty() => f.parse()?,
            _ => ReportFormat::default(),
        };
        let filters = FilterSet::from_pairs(
            self.filters
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|t| (k.clone(), t))),
        )?;

        Ok(ScheduleDraft {
            name: name.to_string(),
            report_type,
            configuration: ScheduleConfiguration {
                version: CONFIG_VERSION,
                filters,
                format,
                include_charts: self.include_charts,
            },
            frequency,
            time_of_day,
            recipients,
            is_active: self.is_active,
        })
    }
}

/// Split, trim, drop blanks and deduplicate (case-insensitively, first
/// spelling wins) a list of recipient entries.
pub fn normalize_recipients<S: AsRef<str>>(entries: &[S]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    entries
        .iter()
        .flat_map(|e| e.as_ref().split([',', ';', '\n']))
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .filter(|r| seen.insert(r.to_ascii_lowercase()))
        .map(String::from)
        .collect()
}

fn looks_like_email(s: &str) -> bool {
    match s.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !s.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|_| ReportError::validation(format!("time must be HH:MM, got '{s}'")))
}
