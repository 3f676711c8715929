use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::clock::SharedClock;
use crate::error::{Result, StorageError};
use crate::storage::KvStore;
use crate::timer::{read_state, TIMER_STATE_KEY};

/// Keeps the persisted elapsed-time estimate fresh while a session runs.
///
/// A fast tick samples `offsetMs + (now - startTimestamp)` into memory; a
/// slower tick merges only `elapsedMs` and `lastAliveAt` into the stored
/// record. The task ends by itself once the record is no longer running.
#[derive(Clone)]
pub struct HeartbeatCoordinator {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    tick: Duration,
    persist: Duration,
    sample: Arc<Sample>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[derive(Debug, Default)]
struct Sample {
    elapsed_ms: AtomicU64,
    at_ms: AtomicI64,
}

impl std::fmt::Debug for HeartbeatCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatCoordinator")
            .field("tick", &self.tick)
            .field("persist", &self.persist)
            .field("active", &self.is_active())
            .finish()
    }
}

impl HeartbeatCoordinator {
    pub fn new(
        store: Arc<dyn KvStore>,
        clock: SharedClock,
        tick: Duration,
        persist: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            tick,
            persist,
            sample: Arc::new(Sample::default()),
            task: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the intervals. No-op while they are already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut task = self.lock();
        if task.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        info!("heartbeat started");
        let this = self.clone();
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.lock().take() {
            if !handle.is_finished() {
                info!("heartbeat stopped");
            }
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Most recent in-memory sample of the running session's elapsed time.
    pub fn elapsed_estimate_ms(&self) -> u64 {
        self.sample.elapsed_ms.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.task.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn run(self) {
        let mut sample_tick = interval(self.tick);
        sample_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut persist_tick = interval_at(Instant::now() + self.persist, self.persist);
        persist_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let keep_going = tokio::select! {
                _ = sample_tick.tick() => self.sample_once(),
                _ = persist_tick.tick() => self.persist_once(),
            };
            match keep_going {
                Ok(true) => {}
                Ok(false) => {
                    debug!("session no longer running, heartbeat exiting");
                    break;
                }
                Err(e) => warn!(error = %e, "heartbeat tick failed"),
            }
        }
    }

    /// Compute without writing. `false` once the session is not running.
    fn sample_once(&self) -> Result<bool> {
        let state = read_state(self.store.as_ref())?;
        if !state.running || state.start_timestamp <= 0 {
            return Ok(false);
        }
        let now = self.clock.now_ms();
        self.sample
            .elapsed_ms
            .store(state.elapsed_at(now), Ordering::SeqCst);
        self.sample.at_ms.store(now, Ordering::SeqCst);
        Ok(true)
    }

    /// Merge the last sample into the stored record, touching nothing else.
    fn persist_once(&self) -> Result<bool> {
        let elapsed = self.sample.elapsed_ms.load(Ordering::SeqCst);
        let at = match self.sample.at_ms.load(Ordering::SeqCst) {
            0 => self.clock.now_ms(),
            at => at,
        };
        let mut running = false;
        self.store.update(TIMER_STATE_KEY, &mut |current| {
            let Some(raw) = current else {
                return Ok(None);
            };
            let mut record: serde_json::Value =
                serde_json::from_str(&raw).map_err(|e| StorageError::Corrupt {
                    key: TIMER_STATE_KEY.to_string(),
                    message: e.to_string(),
                })?;
            let Some(obj) = record.as_object_mut() else {
                return Ok(None);
            };
            running = obj.get("running").and_then(|v| v.as_bool()).unwrap_or(false)
                && obj
                    .get("startTimestamp")
                    .and_then(|v| v.as_i64())
                    .is_some_and(|s| s > 0);
            if !running {
                return Ok(None);
            }
            obj.insert("elapsedMs".into(), elapsed.into());
            obj.insert("lastAliveAt".into(), at.into());
            Ok(Some(record.to_string()))
        })?;
        if running {
            debug!(elapsed_ms = elapsed, "heartbeat merged");
        }
        Ok(running)
    }
}
