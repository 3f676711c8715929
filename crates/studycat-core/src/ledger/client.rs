use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::warn;

use super::authority::LedgerHandle;
use crate::error::LedgerError;

/// UI-side view of the ledger.
///
/// Every request races a deadline. A timeout means "assume nothing
/// happened"; the request itself may still complete in the authority.
#[derive(Debug, Clone)]
pub struct PointsClient {
    ledger: LedgerHandle,
    timeout: Duration,
    last_known: Arc<Mutex<Option<u64>>>,
}

impl PointsClient {
    pub fn new(ledger: LedgerHandle, timeout: Duration) -> Self {
        Self {
            ledger,
            timeout,
            last_known: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn get(&self) -> Result<u64, LedgerError> {
        let balance = self.within(self.ledger.get()).await?;
        self.remember(balance);
        Ok(balance)
    }

    /// Balance for display: live value, else the last value seen, else 0.
    pub async fn get_or_cached(&self) -> u64 {
        match self.get().await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "points unavailable, showing cached balance");
                self.last_known().unwrap_or(0)
            }
        }
    }

    pub async fn earn(&self, delta: f64, reason: &str) -> Result<u64, LedgerError> {
        let balance = self.within(self.ledger.earn(delta, reason)).await?;
        self.remember(balance);
        Ok(balance)
    }

    pub async fn spend(&self, cost: f64, reason: &str) -> Result<u64, LedgerError> {
        match self.within(self.ledger.spend(cost, reason)).await {
            Ok(balance) => {
                self.remember(balance);
                Ok(balance)
            }
            Err(e) => {
                if let Some(balance) = e.balance() {
                    self.remember(balance);
                }
                Err(e)
            }
        }
    }

    pub fn last_known(&self) -> Option<u64> {
        *self.last_known.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn within<F>(&self, fut: F) -> Result<u64, LedgerError>
    where
        F: std::future::Future<Output = Result<u64, LedgerError>>,
    {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| LedgerError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
    }

    fn remember(&self, balance: u64) {
        *self.last_known.lock().unwrap_or_else(|p| p.into_inner()) = Some(balance);
    }
}
