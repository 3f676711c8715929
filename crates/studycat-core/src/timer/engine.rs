//! Timer engine implementation.
//!
//! The timer engine is a wall-clock-based state machine over a
//! [`TimerState`] record. It does not own threads or storage: every command
//! takes the current time in epoch milliseconds and reports what happened in
//! a [`Transition`], which the timer service persists and acts upon.
//!
//! ## State Transitions
//!
//! ```text
//! Idle -> Running -> Paused -> Running -> ... -> Idle
//!            \______________________________/  (stop / force stop)
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let mut engine = TimerEngine::new(state, Zone::Local, MAX_SESSION_MS);
//! engine.start(Some("Calculus"), now);
//! // Once a minute:
//! let t = engine.settle(now); // clamp -> midnight split -> force stop
//! ```

use tracing::{debug, info, warn};

use super::scoring::calc_points;
use super::state::{Phase, SessionLog, TimerPatch, TimerState};
use crate::calendar::Zone;
use crate::error::ValidationError;
use crate::events::{at, Event};

/// Hard ceiling for one session: 99 minutes 59 seconds.
pub const MAX_SESSION_MS: u64 = (99 * 60 + 59) * 1000;

/// Request to the heartbeat coordinator produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatRequest {
    Start,
    Stop,
}

/// Outcome of a timer command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    /// Whether the record changed and must be persisted.
    pub changed: bool,
    /// Logs appended by this transition, in order.
    pub finalized: Vec<SessionLog>,
    pub heartbeat: Option<HeartbeatRequest>,
    pub events: Vec<Event>,
}

impl Transition {
    fn merge(&mut self, other: Transition) {
        self.changed |= other.changed;
        self.finalized.extend(other.finalized);
        if other.heartbeat.is_some() {
            self.heartbeat = other.heartbeat;
        }
        self.events.extend(other.events);
    }

    /// Whole points owed to the ledger, one entry per finalized log.
    ///
    /// Fractional remainders are dropped and zero awards are skipped.
    pub fn awards(&self) -> Vec<(u64, String)> {
        self.finalized
            .iter()
            .filter_map(|log| {
                let whole = log.points.max(0.0).floor() as u64;
                (whole > 0).then(|| (whole, format!("timer_session:{}", log.mode)))
            })
            .collect()
    }
}

/// Core timer engine.
#[derive(Debug, Clone)]
pub struct TimerEngine {
    state: TimerState,
    zone: Zone,
    max_session_ms: u64,
}

impl TimerEngine {
    pub fn new(state: TimerState, zone: Zone, max_session_ms: u64) -> Self {
        Self {
            state,
            zone,
            max_session_ms,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    pub fn into_state(self) -> TimerState {
        self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase()
    }

    pub fn elapsed_ms(&self, now_ms: i64) -> u64 {
        self.state.elapsed_at(now_ms)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Idle/Paused -> Running. No-op when already running.
    pub fn start(&mut self, label: Option<&str>, now_ms: i64) -> Transition {
        if self.state.running {
            return Transition::default();
        }
        let st = &mut self.state;
        if let Some(label) = label.filter(|l| !l.is_empty()) {
            st.task_name = label.to_string();
        } else if st.task_name.is_empty() {
            st.task_name = st.work.clone();
        }
        st.running = true;
        st.start_timestamp = now_ms.max(1);
        info!(task = %st.task_label(), offset_ms = st.offset_ms, "session started");
        Transition {
            changed: true,
            heartbeat: Some(HeartbeatRequest::Start),
            events: vec![Event::SessionStarted {
                task: st.task_label().to_string(),
                offset_ms: st.offset_ms,
                at: at(now_ms),
            }],
            ..Transition::default()
        }
    }

    /// Running -> Paused. No-op when not running.
    pub fn pause(&mut self, now_ms: i64) -> Transition {
        if !self.state.running {
            return Transition::default();
        }
        let st = &mut self.state;
        let elapsed = now_ms.saturating_sub(st.start_timestamp).max(0) as u64;
        st.running = false;
        st.start_timestamp = 0;
        st.offset_ms = st.offset_ms.saturating_add(elapsed);
        info!(offset_ms = st.offset_ms, "session paused");
        Transition {
            changed: true,
            heartbeat: Some(HeartbeatRequest::Stop),
            events: vec![Event::SessionPaused {
                offset_ms: st.offset_ms,
                at: at(now_ms),
            }],
            ..Transition::default()
        }
    }

    /// Running/Paused -> Idle, finalizing the session. No-op when idle.
    pub fn stop(&mut self, now_ms: i64) -> Transition {
        if self.phase() == Phase::Idle {
            return Transition::default();
        }
        let mut t = self.finalize(now_ms);
        self.reset_session();
        t.changed = true;
        t.heartbeat = Some(HeartbeatRequest::Stop);
        t
    }

    /// Finalize when the running session has reached the duration ceiling.
    pub fn force_stop_if_exceeded(&mut self, now_ms: i64) -> Transition {
        if !self.state.running {
            return Transition::default();
        }
        let elapsed = self.state.elapsed_at(now_ms);
        if elapsed < self.max_session_ms {
            return Transition::default();
        }
        warn!(elapsed_ms = elapsed, "session exceeded the duration ceiling, stopping");
        let mut t = self.finalize(now_ms);
        self.reset_session();
        t.changed = true;
        t.heartbeat = Some(HeartbeatRequest::Stop);
        t.events.push(Event::SessionForceStopped {
            elapsed_ms: elapsed,
            at: at(now_ms),
        });
        t
    }

    /// Pull a start timestamp that lies in the future back to `now_ms` and
    /// record `now_ms` as the latest liveness checkpoint.
    pub fn clamp_if_clock_anomaly(&mut self, now_ms: i64) -> Transition {
        let st = &mut self.state;
        let mut t = Transition {
            changed: st.last_alive_at != now_ms,
            ..Transition::default()
        };
        if st.last_alive_at > now_ms {
            debug!(
                last_alive_at = st.last_alive_at,
                now_ms, "clock moved backwards since last checkpoint"
            );
        }
        if st.running && st.start_timestamp > now_ms {
            warn!(
                start_timestamp = st.start_timestamp,
                now_ms, "running interval starts in the future, clamping"
            );
            t.events.push(Event::ClockClamped {
                from_ms: st.start_timestamp,
                to_ms: now_ms,
                at: at(now_ms),
            });
            st.start_timestamp = now_ms;
            t.changed = true;
        }
        st.last_alive_at = now_ms;
        t
    }

    /// Split a running session that began before the latest local midnight.
    ///
    /// The pre-midnight part (including any paused offset) becomes its own
    /// log ending at the boundary; the session continues from the boundary.
    pub fn split_if_crossed_midnight(&mut self, now_ms: i64) -> Transition {
        if !self.state.running || self.state.start_timestamp <= 0 {
            return Transition::default();
        }
        let boundary = self.zone.last_midnight(now_ms);
        if self.state.start_timestamp >= boundary {
            return Transition::default();
        }
        let elapsed_first = (boundary - self.state.start_timestamp) as u64 + self.state.offset_ms;
        let log = self.build_log(boundary - elapsed_first as i64, boundary, elapsed_first);
        info!(boundary_ms = boundary, seconds = log.seconds, "session split at midnight");
        self.state.logs.push(log.clone());
        self.state.start_timestamp = boundary;
        self.state.offset_ms = 0;
        Transition {
            changed: true,
            events: vec![
                Event::SessionFinalized {
                    log: log.clone(),
                    at: at(now_ms),
                },
                Event::MidnightSplit {
                    boundary_ms: boundary,
                    at: at(now_ms),
                },
            ],
            finalized: vec![log],
            heartbeat: None,
        }
    }

    /// Anomaly correction, midnight split, then the duration ceiling.
    ///
    /// Runs at startup and on every maintenance tick.
    pub fn settle(&mut self, now_ms: i64) -> Transition {
        let mut t = self.clamp_if_clock_anomaly(now_ms);
        t.merge(self.split_if_crossed_midnight(now_ms));
        t.merge(self.force_stop_if_exceeded(now_ms));
        t
    }

    /// Merge a field-scoped patch. Phase changes request heartbeat start/stop.
    pub fn apply_patch(&mut self, patch: &TimerPatch) -> Result<Transition, ValidationError> {
        if patch.is_empty() {
            return Ok(Transition::default());
        }
        let was_running = self.phase() == Phase::Running;
        patch.apply(&mut self.state)?;
        let heartbeat = match (was_running, self.phase() == Phase::Running) {
            (false, true) => Some(HeartbeatRequest::Start),
            (true, false) => Some(HeartbeatRequest::Stop),
            _ => None,
        };
        Ok(Transition {
            changed: true,
            heartbeat,
            ..Transition::default()
        })
    }

    /// Remove logs that ended before `cutoff_ms`. Returns how many were removed.
    pub fn purge_logs_before(&mut self, cutoff_ms: i64) -> usize {
        let before = self.state.logs.len();
        self.state.logs.retain(|l| l.end >= cutoff_ms);
        before - self.state.logs.len()
    }

    pub fn purge_all_logs(&mut self) -> usize {
        std::mem::take(&mut self.state.logs).len()
    }

    // ── Internal ─────────────────────────────────────────────────────

    /// Append a log for the unfinalized session, if it has any elapsed time.
    fn finalize(&mut self, now_ms: i64) -> Transition {
        let st = &self.state;
        let elapsed = st.elapsed_at(now_ms);
        if elapsed == 0 {
            return Transition::default();
        }
        let mut start = if st.running && st.start_timestamp > 0 {
            st.start_timestamp
        } else {
            now_ms - elapsed as i64
        };
        // Paused sessions and same-millisecond stops still need end > start.
        if start >= now_ms {
            start = now_ms - elapsed as i64;
        }
        let log = self.build_log(start, now_ms, elapsed);
        info!(task = %log.task, seconds = log.seconds, points = log.points, "session finalized");
        self.state.logs.push(log.clone());
        Transition {
            changed: true,
            events: vec![Event::SessionFinalized {
                log: log.clone(),
                at: at(now_ms),
            }],
            finalized: vec![log],
            heartbeat: None,
        }
    }

    fn build_log(&self, start: i64, end: i64, elapsed_ms: u64) -> SessionLog {
        let st = &self.state;
        let seconds = elapsed_ms / 1000;
        let minutes = seconds as f64 / 60.0;
        SessionLog {
            task: st.task_label().to_string(),
            detail: st.detail.clone(),
            start,
            end,
            seconds,
            minutes,
            points: calc_points(minutes, st.mode, st.linear_per_min),
            mode: st.mode.as_str().to_string(),
            keys: self.zone.session_keys(end),
        }
    }

    fn reset_session(&mut self) {
        self.state.running = false;
        self.state.start_timestamp = 0;
        self.state.offset_ms = 0;
        self.state.elapsed_ms = 0;
        // A start label lasts one session.
        self.state.task_name.clear();
    }
}
