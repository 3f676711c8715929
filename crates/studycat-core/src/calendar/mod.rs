//! Local calendar arithmetic.
//!
//! Session logs are bucketed by the local calendar of the machine that
//! finalized them. [`Zone`] is either the system local zone or a fixed UTC
//! offset (the latter keeps tests and scripted replays deterministic).

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Calendar labels derived from a session's end time.
///
/// Computed once at finalize time and never recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CalendarKeys {
    pub tz: String,
    pub end_local_date: String,
    pub end_local_ym: String,
    pub iso_year: i32,
    pub iso_week: u32,
}

/// Half-open `[start_ms, end_ms)` interval covering whole local days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl DateRange {
    pub fn contains(&self, ms: i64) -> bool {
        ms >= self.start_ms && ms < self.end_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Zone {
    #[default]
    Local,
    Fixed(FixedOffset),
}

impl Zone {
    pub fn utc() -> Self {
        Zone::Fixed(Utc.fix())
    }

    /// `None` selects the system zone.
    pub fn from_offset_minutes(minutes: Option<i32>) -> Result<Self, ValidationError> {
        match minutes {
            None => Ok(Zone::Local),
            Some(m) => FixedOffset::east_opt(m.saturating_mul(60))
                .map(Zone::Fixed)
                .ok_or_else(|| ValidationError::InvalidValue {
                    field: "utc_offset_minutes".into(),
                    message: format!("{m} is outside +/-24h"),
                }),
        }
    }

    /// Epoch ms of the most recent local midnight at or before `now_ms`.
    pub fn last_midnight(&self, now_ms: i64) -> i64 {
        match self {
            Zone::Local => last_midnight_in(&Local, now_ms),
            Zone::Fixed(off) => last_midnight_in(off, now_ms),
        }
    }

    /// Epoch ms of Monday 00:00 local time of the week containing `now_ms`.
    pub fn start_of_week(&self, now_ms: i64) -> i64 {
        match self {
            Zone::Local => start_of_week_in(&Local, now_ms),
            Zone::Fixed(off) => start_of_week_in(off, now_ms),
        }
    }

    /// Calendar buckets of a log ending at `end_ms`.
    ///
    /// A log belongs to the day of its last millisecond, so a part that ends
    /// exactly at midnight stays on the day it was studied.
    pub fn session_keys(&self, end_ms: i64) -> CalendarKeys {
        let last = end_ms.saturating_sub(1);
        match self {
            Zone::Local => keys_in(&Local, last),
            Zone::Fixed(off) => keys_in(off, last),
        }
    }

    /// `YYYY-MM-DD HH:MM:SS` in local time.
    pub fn format_local(&self, ms: i64) -> String {
        self.naive_local(ms).format("%Y-%m-%d %H:%M:%S").to_string()
    }

    /// `YYYY-MM-DD` in local time.
    pub fn local_date(&self, ms: i64) -> String {
        self.naive_local(ms).format("%Y-%m-%d").to_string()
    }

    /// Parse an inclusive `YYYY-MM-DD` pair into whole local days.
    pub fn date_range(&self, start: &str, end: &str) -> Result<DateRange, ValidationError> {
        let start_date = parse_date(start)?;
        let end_date = parse_date(end)?;
        let start_ms = self.midnight_of(start_date);
        let end_ms = self.midnight_of(end_date) + DAY_MS;
        if start_ms >= end_ms {
            return Err(ValidationError::InvalidDateRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(DateRange { start_ms, end_ms })
    }

    fn naive_local(&self, ms: i64) -> NaiveDateTime {
        match self {
            Zone::Local => to_zone(&Local, ms).naive_local(),
            Zone::Fixed(off) => to_zone(off, ms).naive_local(),
        }
    }

    fn midnight_of(&self, date: NaiveDate) -> i64 {
        match self {
            Zone::Local => midnight_of_in(&Local, date),
            Zone::Fixed(off) => midnight_of_in(off, date),
        }
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(s.to_string()))
}

fn to_zone<Tz: TimeZone>(tz: &Tz, ms: i64) -> DateTime<Tz> {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .with_timezone(tz)
}

fn midnight_of_in<Tz: TimeZone>(tz: &Tz, date: NaiveDate) -> i64 {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp_millis(),
        // Midnight skipped by a DST jump: fall back to the offset in effect at noon.
        None => {
            let noon = tz
                .from_local_datetime(&(naive + Duration::hours(12)))
                .earliest()
                .map(|dt| dt.offset().fix().local_minus_utc())
                .unwrap_or(0);
            naive.and_utc().timestamp_millis() - i64::from(noon) * 1000
        }
    }
}

fn last_midnight_in<Tz: TimeZone>(tz: &Tz, now_ms: i64) -> i64 {
    midnight_of_in(tz, to_zone(tz, now_ms).date_naive())
}

fn start_of_week_in<Tz: TimeZone>(tz: &Tz, now_ms: i64) -> i64 {
    let date = to_zone(tz, now_ms).date_naive();
    let monday = date - Duration::days(i64::from(date.weekday().num_days_from_monday()));
    midnight_of_in(tz, monday)
}

fn keys_in<Tz: TimeZone>(tz: &Tz, end_ms: i64) -> CalendarKeys {
    let local = to_zone(tz, end_ms);
    let date = local.date_naive();
    let iso = date.iso_week();
    CalendarKeys {
        tz: format!("UTC{}", local.offset().fix()),
        end_local_date: date.format("%Y-%m-%d").to_string(),
        end_local_ym: date.format("%Y-%m").to_string(),
        iso_year: iso.year(),
        iso_week: iso.week(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-14T23:30:00Z, a Thursday.
    const THU_2330_UTC: i64 = 1_710_459_000_000;

    #[test]
    fn midnight_and_week_in_utc() {
        let zone = Zone::utc();
        assert_eq!(zone.last_midnight(THU_2330_UTC), 1_710_374_400_000);
        // Monday 2024-03-11T00:00:00Z
        assert_eq!(zone.start_of_week(THU_2330_UTC), 1_710_115_200_000);
        assert_eq!(zone.last_midnight(1_710_374_400_000), 1_710_374_400_000);
    }

    #[test]
    fn fixed_offset_moves_the_day() {
        let seoul = Zone::from_offset_minutes(Some(9 * 60)).unwrap();
        // 23:30Z on the 14th is 08:30 on the 15th in UTC+9.
        let keys = seoul.session_keys(THU_2330_UTC);
        assert_eq!(keys.end_local_date, "2024-03-15");
        assert_eq!(keys.end_local_ym, "2024-03");
        assert_eq!(keys.tz, "UTC+09:00");
        assert_eq!(seoul.last_midnight(THU_2330_UTC), 1_710_428_400_000);
    }

    #[test]
    fn iso_week_at_year_boundary() {
        // 2021-01-01 belongs to ISO week 53 of 2020.
        let keys = Zone::utc().session_keys(1_609_502_400_000);
        assert_eq!(keys.end_local_date, "2021-01-01");
        assert_eq!((keys.iso_year, keys.iso_week), (2020, 53));
    }

    #[test]
    fn log_ending_at_midnight_stays_on_previous_day() {
        let keys = Zone::utc().session_keys(1_710_374_400_000);
        assert_eq!(keys.end_local_date, "2024-03-13");
    }

    #[test]
    fn date_range_is_inclusive_of_end_day() {
        let zone = Zone::utc();
        let range = zone.date_range("2024-03-14", "2024-03-14").unwrap();
        assert_eq!(range.end_ms - range.start_ms, DAY_MS);
        assert!(range.contains(THU_2330_UTC));
        assert!(!range.contains(range.end_ms));
    }

    #[test]
    fn inverted_or_garbage_range_is_rejected() {
        let zone = Zone::utc();
        assert!(matches!(
            zone.date_range("2024-03-15", "2024-03-14"),
            Err(ValidationError::InvalidDateRange { .. })
        ));
        assert!(matches!(
            zone.date_range("yesterday", "2024-03-14"),
            Err(ValidationError::InvalidDate(_))
        ));
    }

    #[test]
    fn offset_out_of_range() {
        assert!(Zone::from_offset_minutes(Some(25 * 60)).is_err());
        assert_eq!(Zone::from_offset_minutes(None).unwrap(), Zone::Local);
    }

    #[test]
    fn format_local_uses_zone() {
        let zone = Zone::from_offset_minutes(Some(-5 * 60)).unwrap();
        assert_eq!(zone.format_local(THU_2330_UTC), "2024-03-14 18:30:00");
        assert_eq!(zone.local_date(THU_2330_UTC), "2024-03-14");
    }
}
