use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::timer::TimerHandle;

/// Periodic settle of the timer record: clock clamp, midnight split,
/// duration ceiling.
///
/// Best effort. If the host sleeps through several periods the next tick
/// applies all corrections at once.
#[derive(Debug)]
pub struct MaintenanceTicker {
    handle: JoinHandle<()>,
}

impl MaintenanceTicker {
    pub fn spawn(timer: TimerHandle, period: Duration) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match timer.maintain().await {
                    Ok(snapshot) => {
                        debug!(awards = snapshot.awards.len(), "maintenance tick")
                    }
                    Err(CoreError::ServiceUnavailable { .. }) => break,
                    Err(e) => warn!(error = %e, "maintenance tick failed"),
                }
            }
        });
        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for MaintenanceTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
