use crate::pattern::Timeframe;
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open `[start, end)` interval; `end == None` means open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && self.end.map(|e| t < e).unwrap_or(true)
    }
}

fn midnight(d: NaiveDate) -> DateTime<Utc> {
    d.and_time(NaiveTime::MIN).and_utc()
}

/// Resolve a timeframe bucket against the evaluation instant.
pub fn resolve(tf: Timeframe, now: DateTime<Utc>) -> TimeRange {
    let today = now.date_naive();
    let week_start = today - Days::new(today.weekday().num_days_from_sunday() as u64);
    let month_start = today - Days::new(today.day0() as u64);
    match tf {
        Timeframe::LastHour => TimeRange { start: now - Duration::hours(1), end: None },
        Timeframe::Today => TimeRange { start: midnight(today), end: None },
        Timeframe::Yesterday => TimeRange {
            start: midnight(today - Days::new(1)),
            end: Some(midnight(today)),
        },
        Timeframe::ThisWeek => TimeRange { start: midnight(week_start), end: None },
        Timeframe::LastWeek => TimeRange {
            start: midnight(week_start - Days::new(7)),
            end: Some(midnight(week_start)),
        },
        Timeframe::ThisMonth => TimeRange { start: midnight(month_start), end: None },
        Timeframe::LastMonth => TimeRange {
            start: midnight(month_start - Months::new(1)),
            end: Some(midnight(month_start)),
        },
        Timeframe::ThisYear => TimeRange {
            start: midnight(today - Days::new(today.ordinal0() as u64)),
            end: None,
        },
    }
}

/// Instant before which a record counts as older than `days`.
/// Clamps to the earliest representable instant for day counts past the calendar range.
pub fn cutoff(days: u32, now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(days as i64)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Whole days elapsed between `since` and `now`, floored at zero.
pub fn age_days(since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - since).num_days().max(0)
}
