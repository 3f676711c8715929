//! CSV export of finalized sessions.
//!
//! Two layouts: `raw` (one row per log) and `daily` (seconds summed per
//! local date, task and detail). Both keep logs whose `end` falls inside an
//! inclusive `YYYY-MM-DD` range.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{DateRange, Zone};
use crate::error::ValidationError;
use crate::timer::SessionLog;

const RAW_HEADER: [&str; 15] = [
    "task",
    "detail",
    "startISO",
    "endISO",
    "startLocal",
    "endLocal",
    "seconds",
    "minutes",
    "hh:mm:ss",
    "mode",
    "tz",
    "endLocalDate",
    "endLocalYM",
    "isoYear",
    "isoWeek",
];

const DAILY_HEADER: [&str; 6] = ["date", "task", "detail", "seconds", "minutes", "hh:mm:ss"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Raw,
    Daily,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Raw => f.write_str("raw"),
            Granularity::Daily => f.write_str("daily"),
        }
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Granularity::Raw),
            "daily" => Ok(Granularity::Daily),
            other => Err(ValidationError::InvalidValue {
                field: "granularity".into(),
                message: format!("expected raw or daily, got '{other}'"),
            }),
        }
    }
}

/// `HH:MM:SS`; hours are not wrapped at 24.
pub fn fmt_hms(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Export `logs` ending within `start..=end` (local dates).
///
/// # Errors
/// Returns a validation error for unparsable dates or an inverted range.
pub fn export_csv(
    logs: &[SessionLog],
    zone: &Zone,
    start: &str,
    end: &str,
    granularity: Granularity,
) -> Result<String, ValidationError> {
    let range = zone.date_range(start, end)?;
    Ok(match granularity {
        Granularity::Raw => raw_csv(logs, zone, range),
        Granularity::Daily => daily_csv(logs, zone, range),
    })
}

pub fn raw_csv(logs: &[SessionLog], zone: &Zone, range: DateRange) -> String {
    let mut rows = vec![RAW_HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
    for log in logs.iter().filter(|l| range.contains(l.end - 1)) {
        let keys = &log.keys;
        // Logs written before calendar keys existed only carry start/end.
        let (date, ym, iso_year, iso_week) = if keys.end_local_date.is_empty() {
            let date = zone.local_date(log.end - 1);
            let ym = date.get(..7).unwrap_or_default().to_string();
            (date, ym, String::new(), String::new())
        } else {
            (
                keys.end_local_date.clone(),
                keys.end_local_ym.clone(),
                keys.iso_year.to_string(),
                keys.iso_week.to_string(),
            )
        };
        rows.push(vec![
            log.task.clone(),
            log.detail.clone(),
            iso(log.start),
            iso(log.end),
            zone.format_local(log.start),
            zone.format_local(log.end),
            log.seconds.to_string(),
            minutes_2dp(log.seconds),
            fmt_hms(log.seconds),
            log.mode.clone(),
            keys.tz.clone(),
            date,
            ym,
            iso_year,
            iso_week,
        ]);
    }
    to_csv(&rows)
}

pub fn daily_csv(logs: &[SessionLog], zone: &Zone, range: DateRange) -> String {
    let mut buckets: BTreeMap<(String, String, String), u64> = BTreeMap::new();
    for log in logs.iter().filter(|l| range.contains(l.end - 1)) {
        let date = if log.keys.end_local_date.is_empty() {
            zone.local_date(log.end - 1)
        } else {
            log.keys.end_local_date.clone()
        };
        *buckets
            .entry((date, log.task.clone(), log.detail.clone()))
            .or_default() += log.seconds;
    }

    let mut rows = vec![DAILY_HEADER.iter().map(|s| s.to_string()).collect::<Vec<_>>()];
    for ((date, task, detail), seconds) in buckets {
        rows.push(vec![
            date,
            task,
            detail,
            seconds.to_string(),
            minutes_2dp(seconds),
            fmt_hms(seconds),
        ]);
    }
    to_csv(&rows)
}

fn iso(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn minutes_2dp(seconds: u64) -> String {
    let m = (seconds as f64 / 60.0 * 100.0).round() / 100.0;
    m.to_string()
}

fn escape(field: &str) -> String {
    if field.contains(['"', ',', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn to_csv(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|r| r.iter().map(|f| escape(f)).collect::<Vec<_>>().join(","))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-03-14T10:00:00Z
    const T0: i64 = 1_710_410_400_000;

    fn log(task: &str, detail: &str, end: i64, seconds: u64) -> SessionLog {
        let zone = Zone::utc();
        SessionLog {
            task: task.into(),
            detail: detail.into(),
            start: end - seconds as i64 * 1000,
            end,
            seconds,
            minutes: seconds as f64 / 60.0,
            points: 0.0,
            mode: "linear_min".into(),
            keys: zone.session_keys(end),
        }
    }

    #[test]
    fn hms_formatting() {
        assert_eq!(fmt_hms(0), "00:00:00");
        assert_eq!(fmt_hms(95), "00:01:35");
        assert_eq!(fmt_hms(5999), "01:39:59");
        assert_eq!(fmt_hms(90_000), "25:00:00");
    }

    #[test]
    fn raw_rows_have_iso_and_local_columns() {
        let logs = vec![log("Math", "ch. 3", T0, 95)];
        let csv = export_csv(&logs, &Zone::utc(), "2024-03-14", "2024-03-14", Granularity::Raw)
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], RAW_HEADER.join(","));
        assert_eq!(
            lines[1],
            "Math,ch. 3,2024-03-14T09:58:25.000Z,2024-03-14T10:00:00.000Z,\
             2024-03-14 09:58:25,2024-03-14 10:00:00,95,1.58,00:01:35,linear_min,\
             UTC+00:00,2024-03-14,2024-03,2024,11"
        );
    }

    #[test]
    fn fields_with_separators_are_quoted() {
        let logs = vec![log("Read \"Dune\", part 1", "a\nb", T0, 60)];
        let csv = raw_csv(
            &logs,
            &Zone::utc(),
            Zone::utc().date_range("2024-03-14", "2024-03-14").unwrap(),
        );
        assert!(csv.contains("\"Read \"\"Dune\"\", part 1\",\"a\nb\""));
    }

    #[test]
    fn range_filters_by_end_time() {
        let day = 24 * 60 * 60 * 1000;
        let logs = vec![
            log("A", "", T0 - day, 60),
            log("B", "", T0, 60),
            log("C", "", T0 + day, 60),
        ];
        let csv = export_csv(&logs, &Zone::utc(), "2024-03-14", "2024-03-15", Granularity::Raw)
            .unwrap();
        assert_eq!(csv.lines().count(), 3);
        assert!(!csv.contains("\nA,"));
    }

    #[test]
    fn daily_groups_and_sorts() {
        let day = 24 * 60 * 60 * 1000;
        let logs = vec![
            log("Physics", "", T0 + day, 600),
            log("Math", "hw", T0, 1200),
            log("Math", "hw", T0 + 60_000, 600),
            log("Art", "", T0, 90),
        ];
        let csv = export_csv(&logs, &Zone::utc(), "2024-03-14", "2024-03-15", Granularity::Daily)
            .unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "date,task,detail,seconds,minutes,hh:mm:ss",
                "2024-03-14,Art,,90,1.5,00:01:30",
                "2024-03-14,Math,hw,1800,30,00:30:00",
                "2024-03-15,Physics,,600,10,00:10:00",
            ]
        );
    }

    #[test]
    fn legacy_logs_fall_back_to_zone_dates() {
        let mut old = log("Old", "", T0, 60);
        old.keys = Default::default();
        let csv = export_csv(&[old], &Zone::utc(), "2024-03-14", "2024-03-14", Granularity::Raw)
            .unwrap();
        assert!(csv.ends_with(",2024-03-14,2024-03,,"));
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(matches!(
            export_csv(&[], &Zone::utc(), "2024-03-15", "2024-03-14", Granularity::Daily),
            Err(ValidationError::InvalidDateRange { .. })
        ));
        assert!("weekly".parse::<Granularity>().is_err());
    }
}
