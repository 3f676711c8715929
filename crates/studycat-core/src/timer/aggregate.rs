//! Today / this-week study totals.

use serde::{Deserialize, Serialize};

use super::scoring::calc_points;
use super::state::TimerState;
use crate::calendar::Zone;

/// Totals for one calendar window.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub seconds: u64,
    pub minutes: f64,
    /// Points the window would score as one session under the active mode.
    pub points: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aggregates {
    pub day: Bucket,
    pub week: Bucket,
}

/// Sum finalized seconds of logs ending after local midnight and after
/// Monday 00:00. A log ending exactly on the boundary counts for the
/// earlier window.
///
/// Live time of a running session is added only when `include_live` is set,
/// so displayed totals stay still while a session is active.
pub fn aggregates(state: &TimerState, zone: &Zone, now_ms: i64, include_live: bool) -> Aggregates {
    let sod = zone.last_midnight(now_ms);
    let sow = zone.start_of_week(now_ms);

    let sum_from = |from: i64| -> u64 {
        state
            .logs
            .iter()
            .filter(|l| l.end > from)
            .map(|l| l.seconds)
            .sum()
    };

    let mut day = sum_from(sod);
    let mut week = sum_from(sow);

    if include_live && state.running {
        let live = state.elapsed_at(now_ms) / 1000;
        day += live;
        week += live;
    }

    let bucket = |seconds: u64| {
        let minutes = seconds as f64 / 60.0;
        Bucket {
            seconds,
            minutes,
            points: calc_points(minutes, state.mode, state.linear_per_min),
        }
    };

    Aggregates {
        day: bucket(day),
        week: bucket(week),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::SessionLog;

    // Thu 2024-03-14T23:30:00Z
    const NOW: i64 = 1_710_459_000_000;
    const HOUR: i64 = 3_600_000;

    fn log(end: i64, seconds: u64) -> SessionLog {
        SessionLog {
            start: end - seconds as i64 * 1000,
            end,
            seconds,
            minutes: seconds as f64 / 60.0,
            ..SessionLog::default()
        }
    }

    fn state() -> TimerState {
        TimerState {
            logs: vec![
                log(NOW - 10 * 24 * HOUR, 600), // previous week
                log(NOW - 2 * 24 * HOUR, 1200), // Tuesday
                log(NOW - HOUR, 1800),          // today
            ],
            ..TimerState::default()
        }
    }

    #[test]
    fn day_and_week_windows() {
        let agg = aggregates(&state(), &Zone::utc(), NOW, false);
        assert_eq!(agg.day.seconds, 1800);
        assert_eq!(agg.week.seconds, 3000);
        assert_eq!(agg.day.minutes, 30.0);
        assert_eq!(agg.day.points, 4.0);
    }

    #[test]
    fn live_time_only_on_request_and_only_while_running() {
        let mut st = state();
        st.running = true;
        st.start_timestamp = NOW - 5 * 60_000;

        let quiet = aggregates(&st, &Zone::utc(), NOW, false);
        assert_eq!(quiet.day.seconds, 1800);

        let live = aggregates(&st, &Zone::utc(), NOW, true);
        assert_eq!(live.day.seconds, 2100);
        assert_eq!(live.week.seconds, 3300);

        st.running = false;
        st.start_timestamp = 0;
        st.offset_ms = 60_000;
        assert_eq!(aggregates(&st, &Zone::utc(), NOW, true).day.seconds, 1800);
    }
}
