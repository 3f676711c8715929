//! # StudyCat Core Library
//!
//! This library provides the core business logic behind the StudyCat study
//! companion: a persisted study-session timer and the points ledger that
//! rewards finished sessions. Every surface (the CLI, a desktop shell, a
//! browser popup bridge) is a thin layer over the same core library.
//!
//! ## Architecture
//!
//! - **Timer Engine**: a wall-clock state machine (`Idle -> Running -> Paused`)
//!   that finalizes sessions into immutable logs and heals clock anomalies,
//!   midnight crossings and runaway durations
//! - **Timer Service**: single-writer queue that owns persisted timer state
//! - **Ledger Authority**: serialized owner of the point balance with a
//!   short-lived signed balance token
//! - **Heartbeat**: background elapsed-time refresh and the once-per-minute
//!   maintenance sweep
//! - **Storage**: SQLite-backed key-value records and TOML configuration
//!
//! ## Key Components
//!
//! - [`TimerEngine`]: core timer state machine
//! - [`TimerHandle`]: async API of the timer service
//! - [`LedgerHandle`]: async API of the ledger authority
//! - [`Runtime`]: wires everything together the way the background process does
//! - [`Config`]: application configuration management

pub mod calendar;
pub mod clock;
pub mod error;
pub mod events;
pub mod export;
pub mod heartbeat;
pub mod ledger;
pub mod protocol;
pub mod runtime;
pub mod storage;
pub mod timer;

pub use calendar::{CalendarKeys, DateRange, Zone};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{ConfigError, CoreError, LedgerError, StorageError, ValidationError};
pub use events::Event;
pub use export::Granularity;
pub use heartbeat::{HeartbeatCoordinator, MaintenanceTicker};
pub use ledger::{BalanceToken, LedgerHandle, PointsClient, PointsUpdated};
pub use protocol::{Notification, PointsResponse, Request, Router};
pub use runtime::Runtime;
pub use storage::{Config, Database, KvStore, MemoryStore};
pub use timer::{
    calc_points, Aggregates, Award, Phase, ScoringMode, SessionLog, TimerEngine, TimerHandle,
    TimerPatch, TimerSnapshot, TimerState,
};
