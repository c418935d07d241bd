//! Granularity arithmetic and date-range normalization.
//!
//! All normalization happens in UTC. A bare `YYYY-MM-DD` covers the whole
//! day (`00:00:00` through `23:59:59.999`); relative keywords (`last 7
//! days`, `this month`, …) resolve against a caller-supplied "now" so the
//! pipeline stays deterministic under test.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::query::DateRangeInput;

/// Time unit a time dimension is truncated to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Year => "year",
            Granularity::Quarter => "quarter",
            Granularity::Month => "month",
            Granularity::Week => "week",
            Granularity::Day => "day",
            Granularity::Hour => "hour",
            Granularity::Minute => "minute",
            Granularity::Second => "second",
        }
    }

    /// Truncate a datetime down to this granularity's boundary.
    pub fn start_of(&self, dt: DateTime<Utc>) -> DateTime<Utc> {
        let date = dt.date_naive();
        let naive = match self {
            Granularity::Year => first_of(date.year(), 1).and_hms_opt(0, 0, 0),
            Granularity::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                first_of(date.year(), month).and_hms_opt(0, 0, 0)
            }
            Granularity::Month => first_of(date.year(), date.month()).and_hms_opt(0, 0, 0),
            Granularity::Week => {
                let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
                monday.and_hms_opt(0, 0, 0)
            }
            Granularity::Day => date.and_hms_opt(0, 0, 0),
            Granularity::Hour => date.and_hms_opt(dt.hour(), 0, 0),
            Granularity::Minute => date.and_hms_opt(dt.hour(), dt.minute(), 0),
            Granularity::Second => date.and_hms_opt(dt.hour(), dt.minute(), dt.second()),
        };
        Utc.from_utc_datetime(&naive.expect("truncated datetime is always valid"))
    }

    /// Shift a boundary datetime by `n` of this granularity's units.
    pub fn add(&self, dt: DateTime<Utc>, n: i64) -> DateTime<Utc> {
        match self {
            Granularity::Year => shift_months(dt, n * 12),
            Granularity::Quarter => shift_months(dt, n * 3),
            Granularity::Month => shift_months(dt, n),
            Granularity::Week => dt + Duration::weeks(n),
            Granularity::Day => dt + Duration::days(n),
            Granularity::Hour => dt + Duration::hours(n),
            Granularity::Minute => dt + Duration::minutes(n),
            Granularity::Second => dt + Duration::seconds(n),
        }
    }

    /// Whole units between `start` and `value` (the comparison-alignment
    /// day index: period start maps to 0).
    pub fn distance(&self, start: DateTime<Utc>, value: DateTime<Utc>) -> i64 {
        match self {
            Granularity::Year => (value.year() - start.year()) as i64,
            Granularity::Quarter => month_span(start, value) / 3,
            Granularity::Month => month_span(start, value),
            Granularity::Week => (value - start).num_weeks(),
            Granularity::Day => (value - start).num_days(),
            Granularity::Hour => (value - start).num_hours(),
            Granularity::Minute => (value - start).num_minutes(),
            Granularity::Second => (value - start).num_seconds(),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn first_of(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).expect("month boundary is always valid")
}

fn month_span(start: DateTime<Utc>, value: DateTime<Utc>) -> i64 {
    (value.year() as i64 * 12 + value.month0() as i64)
        - (start.year() as i64 * 12 + start.month0() as i64)
}

fn shift_months(dt: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    let months = dt.year() as i64 * 12 + dt.month0() as i64 + n;
    let year = months.div_euclid(12) as i32;
    let month = months.rem_euclid(12) as u32 + 1;
    // Clamp the day for short months (only reachable with mid-month input)
    let day = dt.day();
    let date = NaiveDate::from_ymd_opt(year, month, day)
        .or_else(|| NaiveDate::from_ymd_opt(year, month + 1, 1).map(|d| d - Duration::days(1)))
        .or_else(|| NaiveDate::from_ymd_opt(year + 1, 1, 1).map(|d| d - Duration::days(1)))
        .expect("shifted month boundary is always valid");
    Utc.from_utc_datetime(&date.and_time(dt.time()))
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse a date or datetime string into a UTC datetime.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.fff]`, `YYYY-MM-DDTHH:MM:SS[.fff]`,
/// and bare `YYYY-MM-DD` (midnight).
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    parse_date_only(s).map(day_start)
}

/// Parse a bare `YYYY-MM-DD` string.
pub fn parse_date_only(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Midnight UTC of the given day.
pub fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid"))
}

/// `23:59:59.999` UTC of the given day.
pub fn day_end(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(
        &date
            .and_hms_milli_opt(23, 59, 59, 999)
            .expect("end of day is valid"),
    )
}

// =============================================================================
// Range normalization
// =============================================================================

static LAST_N_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^last\s+(\d+)\s+(day|week|month|quarter|year)s?$").expect("static regex")
});

static THIS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^this\s+(day|week|month|quarter|year)$").expect("static regex"));

fn unit_from_keyword(word: &str) -> Granularity {
    match word.to_ascii_lowercase().as_str() {
        "day" => Granularity::Day,
        "week" => Granularity::Week,
        "month" => Granularity::Month,
        "quarter" => Granularity::Quarter,
        _ => Granularity::Year,
    }
}

/// Resolve a single date-range bound used by `beforeDate`/`afterDate` and
/// bare-date ranges: a date-only value expands to its full day.
fn bound_of(s: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    if let Some(date) = parse_date_only(s) {
        return Some((day_start(date), day_end(date)));
    }
    parse_datetime(s).map(|dt| (dt, dt))
}

/// Normalize a wire date range to concrete `[start, end]` UTC bounds.
///
/// Returns `None` when the input is unparseable; callers decide whether
/// that skips a filter or fails the query.
pub fn normalize_range(
    input: &DateRangeInput,
    now: DateTime<Utc>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match input {
        DateRangeInput::Expression(s) => {
            let s = s.trim();
            if let Some(caps) = LAST_N_RE.captures(s) {
                let n: i64 = caps[1].parse().ok()?;
                let unit = unit_from_keyword(&caps[2]);
                let current_start = unit.start_of(now);
                let start = unit.add(current_start, -n);
                return Some((start, current_start - Duration::milliseconds(1)));
            }
            if let Some(caps) = THIS_RE.captures(s) {
                let unit = unit_from_keyword(&caps[1]);
                let start = unit.start_of(now);
                let end = unit.add(start, 1) - Duration::milliseconds(1);
                return Some((start, end));
            }
            bound_of(s)
        }
        DateRangeInput::Range(parts) => {
            if parts.len() != 2 {
                return None;
            }
            let (start, _) = bound_of(&parts[0])?;
            let (_, end) = bound_of(&parts[1])?;
            Some((start, end))
        }
    }
}
