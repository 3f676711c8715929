mod aggregate;
mod engine;
mod scoring;
mod service;
mod state;

pub use aggregate::{aggregates, Aggregates, Bucket};
pub use engine::{HeartbeatRequest, TimerEngine, Transition, MAX_SESSION_MS};
pub use scoring::{calc_points, ScoringMode, DEFAULT_LINEAR_PER_MIN};
pub(crate) use service::read_state;
pub use service::{Award, TimerHandle, TimerService, TimerSnapshot, DEFAULT_PURGE_DAYS};
pub use state::{Phase, SessionLog, TimerPatch, TimerState, TIMER_STATE_KEY};
