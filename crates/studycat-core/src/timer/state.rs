use serde::{Deserialize, Serialize};

use super::scoring::{ScoringMode, DEFAULT_LINEAR_PER_MIN};
use crate::calendar::CalendarKeys;
use crate::error::ValidationError;

/// Storage key of the persisted timer record.
pub const TIMER_STATE_KEY: &str = "studyTimer:v1";

/// Logical state derived from `running` and `offset_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Paused,
    Running,
}

/// The single persisted timer record.
///
/// Field names follow the persisted camelCase layout so that every surface
/// reading the store sees the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerState {
    pub running: bool,
    /// Start of the current running interval; `0` when not running.
    pub start_timestamp: i64,
    /// Time accumulated by earlier intervals of the current session.
    pub offset_ms: u64,
    /// Heartbeat estimate of the live elapsed time. Informational only.
    pub elapsed_ms: u64,
    pub last_alive_at: i64,
    pub work: String,
    pub detail: String,
    pub task_name: String,
    pub mode: ScoringMode,
    pub linear_per_min: f64,
    /// Finalized sessions in chronological order.
    pub logs: Vec<SessionLog>,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            running: false,
            start_timestamp: 0,
            offset_ms: 0,
            elapsed_ms: 0,
            last_alive_at: 0,
            work: String::new(),
            detail: String::new(),
            task_name: String::new(),
            mode: ScoringMode::default(),
            linear_per_min: DEFAULT_LINEAR_PER_MIN,
            logs: Vec::new(),
        }
    }
}

impl TimerState {
    pub fn phase(&self) -> Phase {
        if self.running {
            Phase::Running
        } else if self.offset_ms > 0 {
            Phase::Paused
        } else {
            Phase::Idle
        }
    }

    /// Elapsed time of the unfinalized session at `now_ms`. Never negative.
    pub fn elapsed_at(&self, now_ms: i64) -> u64 {
        if self.running && self.start_timestamp > 0 {
            self.offset_ms
                .saturating_add(now_ms.saturating_sub(self.start_timestamp).max(0) as u64)
        } else {
            self.offset_ms
        }
    }

    /// Task label copied into logs: the session's own label, else `work`.
    pub fn task_label(&self) -> &str {
        if self.task_name.is_empty() {
            &self.work
        } else {
            &self.task_name
        }
    }
}

/// A finalized study session. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLog {
    pub task: String,
    #[serde(default)]
    pub detail: String,
    pub start: i64,
    pub end: i64,
    pub seconds: u64,
    pub minutes: f64,
    pub points: f64,
    pub mode: String,
    #[serde(flatten)]
    pub keys: CalendarKeys,
}

/// Field-scoped update of [`TimerState`].
///
/// Only the fields that are `Some` are written, so concurrent writers that
/// touch different fields never clobber each other. Logs are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimerPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_alive_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ScoringMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linear_per_min: Option<f64>,
}

impl TimerPatch {
    /// The two fields the heartbeat is allowed to write.
    pub fn heartbeat(elapsed_ms: u64, last_alive_at: i64) -> Self {
        Self {
            elapsed_ms: Some(elapsed_ms),
            last_alive_at: Some(last_alive_at),
            ..Self::default()
        }
    }

    pub fn labels(work: impl Into<String>, detail: impl Into<String>) -> Self {
        let work = work.into();
        Self {
            task_name: Some(work.clone()),
            work: Some(work),
            detail: Some(detail.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `state`, rejecting patches that would break its invariants.
    pub fn apply(&self, state: &mut TimerState) -> Result<(), ValidationError> {
        let mut next = state.clone();
        if let Some(v) = self.running {
            next.running = v;
        }
        if let Some(v) = self.start_timestamp {
            next.start_timestamp = v;
        }
        if let Some(v) = self.offset_ms {
            next.offset_ms = v;
        }
        if let Some(v) = self.elapsed_ms {
            next.elapsed_ms = v;
        }
        if let Some(v) = self.last_alive_at {
            next.last_alive_at = v;
        }
        if let Some(v) = &self.work {
            next.work = v.clone();
        }
        if let Some(v) = &self.detail {
            next.detail = v.clone();
        }
        if let Some(v) = &self.task_name {
            next.task_name = v.clone();
        }
        if let Some(v) = self.mode {
            next.mode = v;
        }
        if let Some(v) = self.linear_per_min {
            next.linear_per_min = v;
        }

        if next.start_timestamp < 0 {
            return Err(invalid("startTimestamp", "must not be negative"));
        }
        if !next.running {
            next.start_timestamp = 0;
        }
        if next.running && next.start_timestamp == 0 {
            return Err(invalid("startTimestamp", "a running session needs a start"));
        }
        if !next.linear_per_min.is_finite() || next.linear_per_min < 0.0 {
            return Err(invalid("linearPerMin", "must be a finite non-negative number"));
        }

        *state = next;
        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases() {
        let mut st = TimerState::default();
        assert_eq!(st.phase(), Phase::Idle);
        st.offset_ms = 10;
        assert_eq!(st.phase(), Phase::Paused);
        st.running = true;
        st.start_timestamp = 5;
        assert_eq!(st.phase(), Phase::Running);
    }

    #[test]
    fn elapsed_never_negative_when_clock_is_behind() {
        let st = TimerState {
            running: true,
            start_timestamp: 10_000,
            offset_ms: 500,
            ..TimerState::default()
        };
        assert_eq!(st.elapsed_at(4_000), 500);
        assert_eq!(st.elapsed_at(11_000), 1_500);
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut st = TimerState {
            work: "Algebra".into(),
            offset_ms: 42,
            ..TimerState::default()
        };
        TimerPatch::heartbeat(9_000, 77).apply(&mut st).unwrap();
        assert_eq!(st.work, "Algebra");
        assert_eq!(st.offset_ms, 42);
        assert_eq!(st.elapsed_ms, 9_000);
        assert_eq!(st.last_alive_at, 77);
    }

    #[test]
    fn patch_rejects_running_without_start() {
        let mut st = TimerState::default();
        let patch = TimerPatch {
            running: Some(true),
            ..TimerPatch::default()
        };
        assert!(patch.apply(&mut st).is_err());
        assert!(!st.running);
    }

    #[test]
    fn patch_that_stops_running_clears_start() {
        let mut st = TimerState {
            running: true,
            start_timestamp: 1_000,
            offset_ms: 500,
            ..TimerState::default()
        };
        let patch = TimerPatch {
            running: Some(false),
            ..TimerPatch::default()
        };
        patch.apply(&mut st).unwrap();
        assert!(!st.running);
        assert_eq!(st.start_timestamp, 0);
        assert_eq!(st.offset_ms, 500);
        assert_eq!(st.phase(), Phase::Paused);

        let stale_start = TimerPatch {
            start_timestamp: Some(9_000),
            ..TimerPatch::default()
        };
        stale_start.apply(&mut st).unwrap();
        assert_eq!(st.start_timestamp, 0);
    }

    #[test]
    fn missing_fields_decode_to_defaults() {
        let st: TimerState = serde_json::from_str(r#"{"running":false,"work":"Essay"}"#).unwrap();
        assert_eq!(st.work, "Essay");
        assert_eq!(st.linear_per_min, DEFAULT_LINEAR_PER_MIN);
        assert!(st.logs.is_empty());
    }

    #[test]
    fn patch_decodes_from_camel_case() {
        let patch: TimerPatch =
            serde_json::from_str(r#"{"work":"Essay","linearPerMin":0.2}"#).unwrap();
        assert_eq!(patch.work.as_deref(), Some("Essay"));
        assert_eq!(patch.linear_per_min, Some(0.2));
        assert!(patch.running.is_none());
        assert!(TimerPatch::default().is_empty());
    }

    #[test]
    fn label_falls_back_to_task_name() {
        let st = TimerState {
            task_name: "Reading".into(),
            ..TimerState::default()
        };
        assert_eq!(st.task_label(), "Reading");
    }

    #[test]
    fn session_label_wins_over_work() {
        let mut st = TimerState {
            work: "Essay".into(),
            task_name: "Quiz".into(),
            ..TimerState::default()
        };
        assert_eq!(st.task_label(), "Quiz");
        st.task_name.clear();
        assert_eq!(st.task_label(), "Essay");
    }
}
