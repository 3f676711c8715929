//! Single-writer service around the persisted timer record.
//!
//! Every command is queued and handled in arrival order. The record is
//! never cached: each command re-reads it inside a store transaction, so
//! heartbeat merges and other processes sharing the store are never
//! clobbered.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

use super::aggregate::{aggregates, Aggregates};
use super::engine::{HeartbeatRequest, TimerEngine, Transition};
use super::scoring::ScoringMode;
use super::state::{TimerPatch, TimerState, TIMER_STATE_KEY};
use crate::calendar::Zone;
use crate::clock::SharedClock;
use crate::error::{CoreError, Result, StorageError, ValidationError};
use crate::events::{at, Event};
use crate::heartbeat::HeartbeatCoordinator;
use crate::ledger::LedgerHandle;
use crate::storage::{Config, KvStore};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_PURGE_DAYS: u32 = 180;

/// Points requested from the ledger for one finalized log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Award {
    pub points: u64,
    pub reason: String,
    /// Balance after the award, when the ledger accepted it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Record after a command, plus the awards it triggered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    pub state: TimerState,
    pub awards: Vec<Award>,
}

/// Read the stored timer record, synthesizing defaults when absent.
pub(crate) fn read_state(store: &dyn KvStore) -> Result<TimerState> {
    decode(store.get(TIMER_STATE_KEY)?, &TimerState::default())
}

fn decode(raw: Option<String>, fresh: &TimerState) -> Result<TimerState> {
    match raw {
        None => Ok(fresh.clone()),
        Some(raw) => serde_json::from_str(&raw).map_err(|e| {
            StorageError::Corrupt {
                key: TIMER_STATE_KEY.to_string(),
                message: e.to_string(),
            }
            .into()
        }),
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum TimerCommand {
    Start {
        label: Option<String>,
        reply: Reply<TimerSnapshot>,
    },
    Pause {
        reply: Reply<TimerSnapshot>,
    },
    Stop {
        reply: Reply<TimerSnapshot>,
    },
    Maintain {
        reply: Reply<TimerSnapshot>,
    },
    GetState {
        reply: Reply<TimerState>,
    },
    SetState {
        patch: TimerPatch,
        reply: Reply<TimerState>,
    },
    NowElapsed {
        reply: Reply<u64>,
    },
    Aggregates {
        include_live: bool,
        reply: Reply<Aggregates>,
    },
    Purge {
        older_than_days: Option<u32>,
        reply: Reply<usize>,
    },
}

/// Owner of the timer record.
pub struct TimerService {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    zone: Zone,
    max_session_ms: u64,
    fresh: TimerState,
    ledger: LedgerHandle,
    heartbeat: HeartbeatCoordinator,
    events: broadcast::Sender<Event>,
}

impl TimerService {
    /// Start the service task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: Arc<dyn KvStore>,
        clock: SharedClock,
        config: &Config,
        ledger: LedgerHandle,
        heartbeat: HeartbeatCoordinator,
    ) -> Result<TimerHandle> {
        let zone = config.zone()?;
        let fresh = TimerState {
            mode: config.timer.mode,
            linear_per_min: config.timer.linear_per_min,
            ..TimerState::default()
        };
        let (events, _) = broadcast::channel(64);
        let service = TimerService {
            store,
            clock,
            zone,
            max_session_ms: config.max_session_ms(),
            fresh,
            ledger,
            heartbeat: heartbeat.clone(),
            events: events.clone(),
        };
        let (tx, rx) = mpsc::channel(config.ledger.queue_capacity.max(1));
        tokio::spawn(service.run(rx));
        Ok(TimerHandle {
            tx,
            events,
            zone,
            heartbeat,
        })
    }

    async fn run(self, mut rx: mpsc::Receiver<TimerCommand>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                TimerCommand::Start { label, reply } => {
                    let r = self
                        .transition(|e, now| Ok(e.start(label.as_deref(), now)))
                        .await;
                    let _ = reply.send(r);
                }
                TimerCommand::Pause { reply } => {
                    let _ = reply.send(self.transition(|e, now| Ok(e.pause(now))).await);
                }
                TimerCommand::Stop { reply } => {
                    let _ = reply.send(self.transition(|e, now| Ok(e.stop(now))).await);
                }
                TimerCommand::Maintain { reply } => {
                    let _ = reply.send(self.transition(|e, now| Ok(e.settle(now))).await);
                }
                TimerCommand::GetState { reply } => {
                    let _ = reply.send(self.load());
                }
                TimerCommand::SetState { patch, reply } => {
                    let r = self
                        .transition(|e, _| Ok(e.apply_patch(&patch)?))
                        .await
                        .map(|snap| snap.state);
                    let _ = reply.send(r);
                }
                TimerCommand::NowElapsed { reply } => {
                    let r = self.load().map(|st| st.elapsed_at(self.clock.now_ms()));
                    let _ = reply.send(r);
                }
                TimerCommand::Aggregates {
                    include_live,
                    reply,
                } => {
                    let r = self
                        .load()
                        .map(|st| aggregates(&st, &self.zone, self.clock.now_ms(), include_live));
                    let _ = reply.send(r);
                }
                TimerCommand::Purge {
                    older_than_days,
                    reply,
                } => {
                    let _ = reply.send(self.purge(older_than_days));
                }
            }
        }
        debug!("timer queue closed");
    }

    fn load(&self) -> Result<TimerState> {
        decode(self.store.get(TIMER_STATE_KEY)?, &self.fresh)
    }

    /// Run `f` against the stored record inside one store transaction.
    fn commit<T>(
        &self,
        f: impl FnOnce(&mut TimerEngine, i64) -> Result<(Transition, T)>,
    ) -> Result<(TimerState, Transition, T)> {
        let mut f = Some(f);
        let mut out = None;
        self.store.update(TIMER_STATE_KEY, &mut |current| {
            let f = f
                .take()
                .ok_or_else(|| CoreError::Custom("timer update re-entered".into()))?;
            let mut engine = TimerEngine::new(
                decode(current, &self.fresh)?,
                self.zone,
                self.max_session_ms,
            );
            let (t, value) = f(&mut engine, self.clock.now_ms())?;
            let state = engine.into_state();
            let write = if t.changed {
                Some(serde_json::to_string(&state)?)
            } else {
                None
            };
            out = Some((state, t, value));
            Ok(write)
        })?;
        out.ok_or_else(|| CoreError::Custom("timer update produced no state".into()))
    }

    async fn transition(
        &self,
        f: impl FnOnce(&mut TimerEngine, i64) -> Result<Transition>,
    ) -> Result<TimerSnapshot> {
        let (state, t, ()) = self.commit(|e, now| Ok((f(e, now)?, ())))?;

        match t.heartbeat {
            Some(HeartbeatRequest::Start) => self.heartbeat.start(),
            Some(HeartbeatRequest::Stop) => self.heartbeat.stop(),
            None => {}
        }
        for event in &t.events {
            let _ = self.events.send(event.clone());
        }

        let mut awards = Vec::new();
        for (points, reason) in t.awards() {
            let award = match self.ledger.earn(points as f64, &reason).await {
                Ok(balance) => Award {
                    points,
                    reason,
                    balance: Some(balance),
                    error: None,
                },
                Err(e) => {
                    warn!(points, reason = %reason, error = %e, "session award failed");
                    Award {
                        points,
                        reason,
                        balance: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            awards.push(award);
        }
        Ok(TimerSnapshot { state, awards })
    }

    fn purge(&self, older_than_days: Option<u32>) -> Result<usize> {
        let (_, _, removed) = self.commit(|e, now| {
            let removed = match older_than_days {
                Some(days) => e.purge_logs_before(now - i64::from(days) * DAY_MS),
                None => e.purge_all_logs(),
            };
            let t = Transition {
                changed: removed > 0,
                ..Transition::default()
            };
            Ok((t, removed))
        })?;
        if removed > 0 {
            let _ = self.events.send(Event::LogsPurged {
                removed,
                at: at(self.clock.now_ms()),
            });
        }
        Ok(removed)
    }
}

/// Cloneable async API of the timer service.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    tx: mpsc::Sender<TimerCommand>,
    events: broadcast::Sender<Event>,
    zone: Zone,
    heartbeat: HeartbeatCoordinator,
}

impl TimerHandle {
    /// Idle/Paused -> Running. `label` overrides the stored task name.
    pub async fn start(&self, label: Option<&str>) -> Result<TimerSnapshot> {
        let label = label.map(str::to_string);
        self.request(|reply| TimerCommand::Start { label, reply })
            .await
    }

    pub async fn pause(&self) -> Result<TimerSnapshot> {
        self.request(|reply| TimerCommand::Pause { reply }).await
    }

    pub async fn stop(&self) -> Result<TimerSnapshot> {
        self.request(|reply| TimerCommand::Stop { reply }).await
    }

    /// Clock clamp, midnight split and duration ceiling, in that order.
    pub async fn maintain(&self) -> Result<TimerSnapshot> {
        self.request(|reply| TimerCommand::Maintain { reply }).await
    }

    pub async fn get_state(&self) -> Result<TimerState> {
        self.request(|reply| TimerCommand::GetState { reply }).await
    }

    /// Merge `patch` into the stored record and return the result.
    pub async fn set_state(&self, patch: TimerPatch) -> Result<TimerState> {
        self.request(|reply| TimerCommand::SetState { patch, reply })
            .await
    }

    pub async fn set_work_detail(&self, work: &str, detail: &str) -> Result<TimerState> {
        self.set_state(TimerPatch::labels(work, detail)).await
    }

    pub async fn set_scoring(
        &self,
        mode: ScoringMode,
        linear_per_min: Option<f64>,
    ) -> Result<TimerState> {
        self.set_state(TimerPatch {
            mode: Some(mode),
            linear_per_min,
            ..TimerPatch::default()
        })
        .await
    }

    /// Live elapsed time of the unfinalized session.
    pub async fn now_elapsed_ms(&self) -> Result<u64> {
        self.request(|reply| TimerCommand::NowElapsed { reply })
            .await
    }

    pub async fn aggregates(&self, include_live: bool) -> Result<Aggregates> {
        self.request(|reply| TimerCommand::Aggregates {
            include_live,
            reply,
        })
        .await
    }

    /// Delete logs that ended more than `days` days ago. `days` must be at least 1.
    pub async fn purge_logs_older_than(&self, days: u32) -> Result<usize> {
        if days == 0 {
            return Err(ValidationError::InvalidValue {
                field: "days".into(),
                message: "must be at least 1".into(),
            }
            .into());
        }
        self.request(|reply| TimerCommand::Purge {
            older_than_days: Some(days),
            reply,
        })
        .await
    }

    pub async fn purge_all_logs(&self) -> Result<usize> {
        self.request(|reply| TimerCommand::Purge {
            older_than_days: None,
            reply,
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn heartbeat(&self) -> &HeartbeatCoordinator {
        &self.heartbeat
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> TimerCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        let unavailable = || CoreError::ServiceUnavailable { service: "timer" };
        self.tx.send(build(reply)).await.map_err(|_| unavailable())?;
        rx.await.map_err(|_| unavailable())?
    }
}
