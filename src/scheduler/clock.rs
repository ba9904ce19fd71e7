//! Next-trigger computation for schedule frequencies.
//!
//! Rules are evaluated on local wall-clock time; [`next_trigger_at`] maps the
//! result back to an absolute instant in the caller's timezone.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone};

use super::model::Frequency;

/// Next local trigger strictly after `now`.
///
/// Unrecognized frequencies fall back to `now + 1 day`.
pub fn next_trigger(frequency: &Frequency, time_of_day: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date();
    match frequency {
        Frequency::Daily => {
            let candidate = today.and_time(time_of_day);
            if candidate > now {
                candidate
            } else {
                (today + Duration::days(1)).and_time(time_of_day)
            }
        }
        Frequency::Weekly => {
            let days_until_monday = (7 - today.weekday().num_days_from_monday()) % 7;
            let candidate = (today + Duration::days(i64::from(days_until_monday))).and_time(time_of_day);
            if candidate > now {
                candidate
            } else {
                candidate + Duration::days(7)
            }
        }
        Frequency::Monthly => first_of_next_month(today).and_time(time_of_day),
        Frequency::Quarterly => today
            .checked_add_months(Months::new(3))
            .unwrap_or(today + Duration::days(91))
            .and_time(time_of_day),
        Frequency::Unrecognized(_) => now + Duration::days(1),
    }
}

/// Timezone-aware form of [`next_trigger`].
pub fn next_trigger_at<Tz: TimeZone>(frequency: &Frequency, time_of_day: NaiveTime, now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let local = next_trigger(frequency, time_of_day, now.naive_local());
    tz.from_local_datetime(&local)
        .earliest()
        // Wall-clock time skipped by a DST change: take the first valid hour after it.
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&local))
}

fn first_of_next_month(day: NaiveDate) -> NaiveDate {
    let (y, m) = if day.month() == 12 {
        (day.year() + 1, 1)
    } else {
        (day.year(), day.month() + 1)
    };
    NaiveDate::from_ymd_opt(y, m, 1).unwrap_or(day)
}
