use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::SessionLog;

/// Every timer state change produces an Event.
/// Surfaces subscribe to them through [`crate::TimerHandle::subscribe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    SessionStarted {
        task: String,
        offset_ms: u64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        offset_ms: u64,
        at: DateTime<Utc>,
    },
    /// A session was converted into an immutable log.
    SessionFinalized {
        log: SessionLog,
        at: DateTime<Utc>,
    },
    /// The hard duration ceiling stopped a session.
    SessionForceStopped {
        elapsed_ms: u64,
        at: DateTime<Utc>,
    },
    /// The clock moved behind the running interval's start.
    ClockClamped {
        from_ms: i64,
        to_ms: i64,
        at: DateTime<Utc>,
    },
    /// A running session crossed local midnight and was split.
    MidnightSplit {
        boundary_ms: i64,
        at: DateTime<Utc>,
    },
    LogsPurged {
        removed: usize,
        at: DateTime<Utc>,
    },
}

/// Convert epoch milliseconds into a UTC timestamp for event payloads.
pub(crate) fn at(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}
