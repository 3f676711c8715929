//! The background process: one ledger authority, one timer service, the
//! heartbeat and the maintenance sweep, all sharing one store.

use std::sync::Arc;

use tracing::info;

use crate::clock::{SharedClock, SystemClock};
use crate::error::Result;
use crate::heartbeat::{HeartbeatCoordinator, MaintenanceTicker};
use crate::ledger::{LedgerAuthority, LedgerHandle, PointsClient};
use crate::protocol::Router;
use crate::storage::{Config, Database, KvStore};
use crate::timer::{TimerHandle, TimerService, TimerSnapshot};

pub struct Runtime {
    config: Config,
    ledger: LedgerHandle,
    timer: TimerHandle,
    router: Router,
    maintenance: Option<MaintenanceTicker>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("maintenance", &self.maintenance.is_some())
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Wire the services over `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: Config, store: Arc<dyn KvStore>, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        let ledger = LedgerAuthority::spawn(store.clone(), clock.clone(), &config.ledger)?;
        let heartbeat = HeartbeatCoordinator::new(
            store.clone(),
            clock.clone(),
            config.heartbeat.tick(),
            config.heartbeat.persist(),
        );
        let timer = TimerService::spawn(store, clock, &config, ledger.clone(), heartbeat)?;
        let router = Router::new(ledger.clone(), timer.clone());
        Ok(Self {
            config,
            ledger,
            timer,
            router,
            maintenance: None,
        })
    }

    /// [`Runtime::start`] followed by [`Runtime::settle_on_startup`].
    ///
    /// Any process that serves timer or points requests starts this way.
    pub async fn start_settled(
        config: Config,
        store: Arc<dyn KvStore>,
        clock: SharedClock,
    ) -> Result<Self> {
        let rt = Self::start(config, store, clock)?;
        rt.settle_on_startup().await?;
        Ok(rt)
    }

    /// Config and database from the data directory, system clock.
    pub fn open_default() -> Result<Self> {
        let config = Config::load()?;
        let store: Arc<dyn KvStore> = Arc::new(Database::open()?);
        Self::start(config, store, Arc::new(SystemClock))
    }

    /// [`Runtime::open_default`], settled.
    pub async fn open_settled() -> Result<Self> {
        let config = Config::load()?;
        let store: Arc<dyn KvStore> = Arc::new(Database::open()?);
        Self::start_settled(config, store, Arc::new(SystemClock)).await
    }

    /// Restore a consistent record after the process was killed or slept.
    ///
    /// Heals the balance token, then runs clock clamp, midnight split and
    /// the duration ceiling. The heartbeat follows the settled phase.
    pub async fn settle_on_startup(&self) -> Result<TimerSnapshot> {
        let balance = self.ledger.get().await?;
        let snapshot = self.timer.maintain().await?;
        if snapshot.state.running {
            self.timer.heartbeat().start();
        } else {
            self.timer.heartbeat().stop();
        }
        info!(
            balance,
            running = snapshot.state.running,
            finalized = snapshot.awards.len(),
            "startup settlement done"
        );
        Ok(snapshot)
    }

    /// Start the periodic maintenance sweep. No-op when already running.
    pub fn spawn_maintenance(&mut self) {
        if self.maintenance.as_ref().is_some_and(|m| m.is_running()) {
            return;
        }
        self.maintenance = Some(MaintenanceTicker::spawn(
            self.timer.clone(),
            self.config.heartbeat.maintenance(),
        ));
    }

    pub fn shutdown(mut self) {
        self.timer.heartbeat().stop();
        if let Some(m) = self.maintenance.take() {
            m.stop();
        }
        info!("runtime stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn timer(&self) -> &TimerHandle {
        &self.timer
    }

    pub fn heartbeat(&self) -> &HeartbeatCoordinator {
        self.timer.heartbeat()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn points_client(&self) -> PointsClient {
        PointsClient::new(self.ledger.clone(), self.config.client_timeout())
    }
}
