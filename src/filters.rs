//! Filter normalization.
//!
//! Turns the loose date modes of [`QueryParams`] into an absolute, inclusive
//! range of business-calendar days and converts that range into UTC bounds
//! for the store. All calendar arithmetic happens in the fixed business
//! timezone (UTC-3).

use crate::clock::Clock;
use crate::error::{AnalyticsError, Result};
use crate::models::{AppliedFilters, QueryParams};
use crate::store::OrderFilter;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Seconds west of UTC of the business timezone.
pub const BUSINESS_UTC_OFFSET_WEST: i32 = 3 * 3600;

/// Upper bound accepted for `period_days`.
pub const MAX_PERIOD_DAYS: u32 = 3650;

/// The fixed business timezone.
pub fn business_tz() -> FixedOffset {
    FixedOffset::west_opt(BUSINESS_UTC_OFFSET_WEST).expect("UTC-3 is a valid offset")
}

/// Wall-clock time in the business timezone.
pub fn to_business_local(at: DateTime<Utc>) -> NaiveDateTime {
    at.with_timezone(&business_tz()).naive_local()
}

/// Today's date in the business timezone.
pub fn business_today(clock: &dyn Clock) -> NaiveDate {
    to_business_local(clock.now()).date()
}

/// UTC instant of business-local midnight at the start of `day`.
pub fn business_midnight_utc(day: NaiveDate) -> DateTime<Utc> {
    business_tz()
        .from_local_datetime(&day.and_time(chrono::NaiveTime::MIN))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .expect("fixed offsets have no ambiguous local times")
}

/// Number of days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(31)
}

/// First day of the month containing `day`.
pub fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

/// `YYYY-MM` key of a calendar month.
pub fn month_key(year: i32, month: u32) -> String {
    format!("{:04}-{:02}", year, month)
}

/// Parse a `YYYY-MM` key.
pub fn parse_month_key(key: &str) -> Option<(i32, u32)> {
    let (year, month) = key.split_once('-')?;
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// The calendar month after `(year, month)`.
pub fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// The calendar month before `(year, month)`.
pub fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Every month key from `first` to `last`, both included.
pub fn month_keys_between(first: &str, last: &str) -> Vec<String> {
    let (Some(mut cursor), Some(end)) = (parse_month_key(first), parse_month_key(last)) else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    while cursor <= end {
        keys.push(month_key(cursor.0, cursor.1));
        cursor = next_month(cursor.0, cursor.1);
    }
    keys
}

/// Full-month range of `(year, month)`.
pub fn month_range(year: i32, month: u32) -> Option<DateRange> {
    let start = NaiveDate::from_ymd_opt(year, month, 1)?;
    let end = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
    Some(DateRange { start, end })
}

/// Inclusive range of business-calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(AnalyticsError::validation(
                "start_date",
                format!("start_date {} is after end_date {}", start, end),
            ));
        }
        Ok(Self { start, end })
    }

    /// Length in days, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// `[start 00:00, (end + 1) 00:00)` in UTC.
    pub fn utc_bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            business_midnight_utc(self.start),
            business_midnight_utc(self.end + Duration::days(1)),
        )
    }

    /// The range of equal length that ends the day before this one starts.
    pub fn previous_period(&self) -> DateRange {
        let len = self.days();
        let end = self.start - Duration::days(1);
        DateRange {
            start: end - Duration::days(len - 1),
            end,
        }
    }
}

/// Parameters after validation: filters plus an absolute date range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedFilter {
    pub status: Option<String>,
    pub marketplace: Option<String>,
    /// `None` means all time.
    pub range: Option<DateRange>,
}

impl NormalizedFilter {
    /// Same status/marketplace filters over another range.
    pub fn with_range(&self, range: Option<DateRange>) -> Self {
        Self {
            range,
            ..self.clone()
        }
    }

    /// Same filters without the status restriction.
    pub fn without_status(&self) -> Self {
        Self {
            status: None,
            ..self.clone()
        }
    }

    /// Store-level filter with UTC bounds.
    pub fn to_order_filter(&self) -> OrderFilter {
        let (from, until) = match self.range {
            Some(range) => {
                let (from, until) = range.utc_bounds();
                (Some(from), Some(until))
            }
            None => (None, None),
        };

        OrderFilter {
            status: self.status.clone(),
            marketplace: self.marketplace.clone(),
            from,
            until,
        }
    }

    /// Echo of what is being applied.
    pub fn applied(&self) -> AppliedFilters {
        AppliedFilters {
            status: self.status.clone(),
            marketplace: self.marketplace.clone(),
            start_date: self.range.map(|r| r.start.to_string()),
            end_date: self.range.map(|r| r.end.to_string()),
            all_time: self.range.is_none(),
        }
    }
}

/// Validate parameters and resolve the date mode against `clock`.
pub fn normalize(params: &QueryParams, clock: &dyn Clock) -> Result<NormalizedFilter> {
    let today = business_today(clock);

    let explicit_range = params.start_date.is_some() || params.end_date.is_some();
    let mut modes = Vec::new();
    if params.all_time == Some(true) {
        modes.push("all_time");
    }
    if explicit_range {
        modes.push("start_date/end_date");
    }
    if params.period_days.is_some() {
        modes.push("period_days");
    }
    if params.current_month == Some(true) {
        modes.push("current_month");
    }
    if modes.len() > 1 {
        return Err(AnalyticsError::validation(
            "date_mode",
            format!("only one date mode may be used, got {}", modes.join(", ")),
        ));
    }

    let range = if explicit_range {
        let start = params
            .start_date
            .as_deref()
            .ok_or_else(|| AnalyticsError::validation("start_date", "required with end_date"))?;
        let end = params
            .end_date
            .as_deref()
            .ok_or_else(|| AnalyticsError::validation("end_date", "required with start_date"))?;
        Some(DateRange::new(
            parse_date("start_date", start)?,
            parse_date("end_date", end)?,
        )?)
    } else if let Some(days) = params.period_days {
        if days == 0 || days > MAX_PERIOD_DAYS {
            return Err(AnalyticsError::validation(
                "period_days",
                format!("must be between 1 and {}", MAX_PERIOD_DAYS),
            ));
        }
        Some(DateRange {
            start: today - Duration::days(i64::from(days) - 1),
            end: today,
        })
    } else if params.current_month == Some(true) {
        Some(DateRange {
            start: month_start(today),
            end: today,
        })
    } else {
        None
    };

    Ok(NormalizedFilter {
        status: params.status_filter().map(str::to_string),
        marketplace: params.marketplace_filter().map(str::to_string),
        range,
    })
}

/// Parse a strict `YYYY-MM-DD` date.
///
/// A day past the end of its month is clamped to the month's last day;
/// any other malformed input is a validation error.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    let invalid = || {
        AnalyticsError::validation(field, format!("`{}` is not a YYYY-MM-DD date", value))
    };

    let value = value.trim();
    let parts: Vec<&str> = value.split('-').collect();
    if parts.len() != 3
        || parts[0].len() != 4
        || parts[1].len() != 2
        || parts[2].len() != 2
        || !parts.iter().all(|p| p.bytes().all(|b| b.is_ascii_digit()))
    {
        return Err(invalid());
    }

    let year: i32 = parts[0].parse().map_err(|_| invalid())?;
    let month: u32 = parts[1].parse().map_err(|_| invalid())?;
    let day: u32 = parts[2].parse().map_err(|_| invalid())?;

    if !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return Err(invalid());
    }

    let day = day.min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> FixedClock {
        FixedClock::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap())
    }

    #[test]
    fn test_invalid_day_is_clamped() {
        let date = parse_date("end_date", "2026-02-30").unwrap();
        assert_eq!(date.to_string(), "2026-02-28");

        let leap = parse_date("end_date", "2024-02-31").unwrap();
        assert_eq!(leap.to_string(), "2024-02-29");
    }

    #[test]
    fn test_malformed_date_fails_closed() {
        for bad in ["2026/02/01", "26-02-01", "2026-2-1", "yesterday", "2026-13-01", "2026-01-00"] {
            let err = parse_date("start_date", bad).unwrap_err();
            assert_eq!(err.kind(), "validation_error", "{bad}");
        }
    }

    #[test]
    fn test_no_date_mode_is_all_time() {
        let clock = clock_at(2026, 3, 15, 12);
        let filter = normalize(&QueryParams::default(), &clock).unwrap();
        assert_eq!(filter.range, None);
        assert!(filter.applied().all_time);
    }

    #[test]
    fn test_multiple_date_modes_rejected() {
        let clock = clock_at(2026, 3, 15, 12);
        let params = QueryParams {
            period_days: Some(7),
            current_month: Some(true),
            ..Default::default()
        };
        let err = normalize(&params, &clock).unwrap_err();
        assert!(err.to_string().contains("date_mode"));
    }

    #[test]
    fn test_period_days_uses_business_today() {
        // 01:00 UTC on the 15th is still the 14th in UTC-3.
        let clock = clock_at(2026, 3, 15, 1);
        let params = QueryParams {
            period_days: Some(7),
            ..Default::default()
        };
        let range = normalize(&params, &clock).unwrap().range.unwrap();
        assert_eq!(range.end.to_string(), "2026-03-14");
        assert_eq!(range.start.to_string(), "2026-03-08");
        assert_eq!(range.days(), 7);
    }

    #[test]
    fn test_current_month() {
        let clock = clock_at(2026, 3, 15, 12);
        let params = QueryParams {
            current_month: Some(true),
            ..Default::default()
        };
        let range = normalize(&params, &clock).unwrap().range.unwrap();
        assert_eq!(range.start.to_string(), "2026-03-01");
        assert_eq!(range.end.to_string(), "2026-03-15");
    }

    #[test]
    fn test_half_open_range_rejected() {
        let clock = clock_at(2026, 3, 15, 12);
        let params = QueryParams {
            start_date: Some("2026-01-01".to_string()),
            ..Default::default()
        };
        let err = normalize(&params, &clock).unwrap_err();
        assert!(err.to_string().contains("end_date"));
    }

    #[test]
    fn test_utc_bounds_are_shifted() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
        )
        .unwrap();
        let (from, until) = range.utc_bounds();
        assert_eq!(from, Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap());
        assert_eq!(until, Utc.with_ymd_and_hms(2026, 2, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn test_previous_period_is_adjacent_and_equal_length() {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
        )
        .unwrap();
        let previous = range.previous_period();
        assert_eq!(previous.end.to_string(), "2026-02-28");
        assert_eq!(previous.start.to_string(), "2026-02-19");
        assert_eq!(previous.days(), range.days());
    }

    #[test]
    fn test_month_keys_between_spans_years() {
        let keys = month_keys_between("2025-11", "2026-02");
        assert_eq!(keys, vec!["2025-11", "2025-12", "2026-01", "2026-02"]);
        assert!(month_keys_between("2026-02", "2025-11").is_empty());
        assert_eq!(parse_month_key("2026-13"), None);
        assert_eq!(previous_month(2026, 1), (2025, 12));
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2026, 12), 31);
        assert_eq!(days_in_month(2026, 4), 30);
    }
}
