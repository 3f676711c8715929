//! The points ledger authority.
//!
//! One task owns every balance mutation. `earn` and `spend` requests are
//! queued on an mpsc channel and applied strictly in arrival order; `get`
//! reads the persisted balance directly. Each mutation reads, checks and
//! writes the balance and its token in a single store transaction, so
//! processes sharing one database never interleave.
//!
//! ## Records
//!
//! - `pts:balance`: integer balance, the value of record
//! - `pts:token`: [`BalanceToken`] JSON, reissued on every mutation
//! - `pts:key_b64`: the signing secret, created once

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::token::{BalanceToken, SigningKey};
use crate::clock::SharedClock;
use crate::error::{CoreError, LedgerError, Result, StorageError};
use crate::storage::{KvStore, LedgerConfig};

pub const BALANCE_KEY: &str = "pts:balance";
pub const TOKEN_KEY: &str = "pts:token";
pub const SIGNING_KEY_KEY: &str = "pts:key_b64";

/// Broadcast after every successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointsUpdated {
    pub balance: u64,
}

enum LedgerCommand {
    Earn {
        amount: u64,
        reason: String,
        reply: oneshot::Sender<Result<u64, LedgerError>>,
    },
    Spend {
        amount: u64,
        reason: String,
        reply: oneshot::Sender<Result<u64, LedgerError>>,
    },
}

struct LedgerCore {
    store: Arc<dyn KvStore>,
    clock: SharedClock,
    key: SigningKey,
    token_ttl_secs: u64,
    updates: broadcast::Sender<PointsUpdated>,
}

impl LedgerCore {
    fn load_or_create_key(store: &dyn KvStore) -> Result<SigningKey> {
        let mut key = None;
        // Insert-if-absent, so processes racing on a fresh store agree on one key.
        store.update(SIGNING_KEY_KEY, &mut |current| {
            if let Some(encoded) = current {
                match SigningKey::from_b64(&encoded) {
                    Ok(existing) => {
                        key = Some(existing);
                        return Ok(None);
                    }
                    // Losing the key only invalidates tokens, which heal on read.
                    Err(e) => warn!(error = %e, "stored signing key unusable, generating a new one"),
                }
            }
            let fresh = SigningKey::generate()?;
            let encoded = fresh.to_b64();
            key = Some(fresh);
            info!("generated points signing key");
            Ok(Some(encoded))
        })?;
        key.ok_or_else(|| CoreError::Custom("signing key was not loaded".into()))
    }

    fn issue(&self, balance: u64, now: i64) -> Result<BalanceToken> {
        BalanceToken::issue(&self.key, balance, now, self.token_ttl_secs)
    }

    /// Balance carried by a token from an install that predates `pts:balance`.
    fn legacy_balance(&self, token: Option<&BalanceToken>) -> u64 {
        match token {
            Some(tok) if tok.verify(&self.key) => tok.balance,
            _ => 0,
        }
    }

    /// Current balance plus a token bound to it, healing the token if needed.
    ///
    /// Never writes `pts:balance`.
    fn get(&self) -> Result<(u64, BalanceToken)> {
        let now = self.clock.now_secs();
        let mut out = None;
        self.store
            .update_many(&[BALANCE_KEY, TOKEN_KEY], &mut |records| {
                let (raw_balance, token) = split_records(records);
                let Some(raw) = raw_balance else {
                    // The first mutation commits the adopted value.
                    let balance = self.legacy_balance(token.as_ref());
                    out = Some((balance, self.issue(balance, now)?));
                    return Ok(Vec::new());
                };
                let balance = parse_balance(&raw)?;
                match token {
                    Some(tok) if tok.is_current(&self.key, balance, now) => {
                        out = Some((balance, tok));
                        Ok(Vec::new())
                    }
                    _ => {
                        debug!(balance, "reissuing balance token");
                        let tok = self.issue(balance, now)?;
                        let tok_s = serde_json::to_string(&tok)?;
                        out = Some((balance, tok));
                        Ok(vec![(TOKEN_KEY.to_string(), tok_s)])
                    }
                }
            })?;
        out.ok_or_else(|| CoreError::Custom("balance was not read".into()))
    }

    /// Read, check and write the balance and its token in one store
    /// transaction. `op` maps the current balance to the next one or rejects.
    fn apply(
        &self,
        op: impl Fn(u64) -> Result<u64, LedgerError>,
    ) -> Result<u64, LedgerError> {
        let now = self.clock.now_secs();
        let mut outcome = None;
        self.store
            .update_many(&[BALANCE_KEY, TOKEN_KEY], &mut |records| {
                let (raw_balance, token) = split_records(records);
                let balance = match raw_balance {
                    Some(raw) => parse_balance(&raw)?,
                    None => {
                        let adopted = self.legacy_balance(token.as_ref());
                        if adopted > 0 {
                            info!(balance = adopted, "adopting balance from legacy token");
                        }
                        adopted
                    }
                };
                match op(balance) {
                    Ok(next) => {
                        let tok_s = serde_json::to_string(&self.issue(next, now)?)?;
                        outcome = Some(Ok(next));
                        Ok(vec![
                            (BALANCE_KEY.to_string(), next.to_string()),
                            (TOKEN_KEY.to_string(), tok_s),
                        ])
                    }
                    Err(rejected) => {
                        outcome = Some(Err(rejected));
                        Ok(Vec::new())
                    }
                }
            })?;
        outcome.unwrap_or(Err(LedgerError::Unavailable))
    }

    fn earn(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let next = self.apply(|balance| Ok(balance.saturating_add(amount)))?;
        info!(amount, balance = next, reason, "points earned");
        self.publish(next);
        Ok(next)
    }

    fn spend(&self, amount: u64, reason: &str) -> Result<u64, LedgerError> {
        let next = self.apply(|balance| {
            balance.checked_sub(amount).ok_or_else(|| {
                debug!(balance, cost = amount, reason, "spend rejected");
                LedgerError::Insufficient {
                    balance,
                    cost: amount,
                }
            })
        })?;
        info!(amount, balance = next, reason, "points spent");
        self.publish(next);
        Ok(next)
    }

    fn publish(&self, balance: u64) {
        // No subscribers is fine.
        let _ = self.updates.send(PointsUpdated { balance });
    }
}

fn split_records(records: Vec<Option<String>>) -> (Option<String>, Option<BalanceToken>) {
    let mut records = records.into_iter();
    let balance = records.next().flatten();
    let token = records.next().flatten().and_then(|raw| {
        serde_json::from_str(&raw)
            .map_err(|e| debug!(error = %e, "stored token is not decodable"))
            .ok()
    });
    (balance, token)
}

/// `pts:balance` must hold a non-negative number; anything else is left
/// untouched and fails the operation.
fn parse_balance(raw: &str) -> Result<u64> {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() && n >= 0.0 => Ok(n.floor() as u64),
        _ => Err(StorageError::Corrupt {
            key: BALANCE_KEY.to_string(),
            message: format!("expected a non-negative number, found {raw:?}"),
        }
        .into()),
    }
}

/// Spawns the ledger task.
pub struct LedgerAuthority;

impl LedgerAuthority {
    /// Load or create the signing key and start the FIFO task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        store: Arc<dyn KvStore>,
        clock: SharedClock,
        config: &LedgerConfig,
    ) -> Result<LedgerHandle> {
        let key = LedgerCore::load_or_create_key(store.as_ref())?;
        let (updates, _) = broadcast::channel(64);
        let core = Arc::new(LedgerCore {
            store,
            clock,
            key,
            token_ttl_secs: config.token_ttl_secs,
            updates,
        });
        let (tx, mut rx) = mpsc::channel::<LedgerCommand>(config.queue_capacity.max(1));

        let worker = core.clone();
        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                // Each request is answered on its own; a failure never stops the queue.
                match cmd {
                    LedgerCommand::Earn {
                        amount,
                        reason,
                        reply,
                    } => {
                        let _ = reply.send(worker.earn(amount, &reason));
                    }
                    LedgerCommand::Spend {
                        amount,
                        reason,
                        reply,
                    } => {
                        let _ = reply.send(worker.spend(amount, &reason));
                    }
                }
            }
            debug!("ledger queue closed");
        });

        Ok(LedgerHandle { core, tx })
    }
}

/// Cloneable entry point to the ledger.
#[derive(Clone)]
pub struct LedgerHandle {
    core: Arc<LedgerCore>,
    tx: mpsc::Sender<LedgerCommand>,
}

impl std::fmt::Debug for LedgerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerHandle").finish_non_exhaustive()
    }
}

impl LedgerHandle {
    /// Latest persisted balance. Bypasses the queue.
    pub async fn get(&self) -> Result<u64, LedgerError> {
        Ok(self.core.get()?.0)
    }

    /// Current token, reissued first if stale.
    pub async fn token(&self) -> Result<BalanceToken, LedgerError> {
        Ok(self.core.get()?.1)
    }

    /// Add `floor(delta)` points.
    ///
    /// Rejected before queueing unless `delta` is a positive finite number.
    pub async fn earn(&self, delta: f64, reason: &str) -> Result<u64, LedgerError> {
        if !delta.is_finite() || delta <= 0.0 {
            return Err(LedgerError::BadDelta);
        }
        let amount = delta.floor() as u64;
        self.request(|reply| LedgerCommand::Earn {
            amount,
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    /// Remove `floor(cost)` points, or fail with `Insufficient`.
    pub async fn spend(&self, cost: f64, reason: &str) -> Result<u64, LedgerError> {
        if !cost.is_finite() || cost <= 0.0 {
            return Err(LedgerError::BadCost);
        }
        let amount = cost.floor() as u64;
        self.request(|reply| LedgerCommand::Spend {
            amount,
            reason: reason.to_string(),
            reply,
        })
        .await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PointsUpdated> {
        self.core.updates.subscribe()
    }

    async fn request(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<u64, LedgerError>>) -> LedgerCommand,
    ) -> Result<u64, LedgerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| LedgerError::Unavailable)?;
        rx.await.map_err(|_| LedgerError::Unavailable)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    const T0: i64 = 1_710_410_400_000;

    fn setup() -> (Arc<MemoryStore>, ManualClock, LedgerHandle) {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(T0);
        let handle =
            LedgerAuthority::spawn(store.clone(), Arc::new(clock.clone()), &LedgerConfig::default())
                .unwrap();
        (store, clock, handle)
    }

    #[tokio::test]
    async fn earn_spend_reject_get() {
        let (_store, _clock, ledger) = setup();
        assert_eq!(ledger.earn(100.0, "test").await.unwrap(), 100);
        assert_eq!(ledger.spend(30.0, "shop").await.unwrap(), 70);
        let err = ledger.spend(100.0, "shop").await.unwrap_err();
        assert_eq!(err.reason(), "insufficient");
        assert_eq!(err.balance(), Some(70));
        assert_eq!(ledger.get().await.unwrap(), 70);
    }

    #[tokio::test]
    async fn fractional_amounts_are_floored() {
        let (_store, _clock, ledger) = setup();
        assert_eq!(ledger.earn(2.9, "t").await.unwrap(), 2);
        assert_eq!(ledger.spend(1.5, "t").await.unwrap(), 1);
        assert_eq!(ledger.earn(0.4, "t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn malformed_amounts_fail_fast() {
        let (store, _clock, ledger) = setup();
        for bad in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(ledger.earn(bad, "t").await, Err(LedgerError::BadDelta)));
            assert!(matches!(ledger.spend(bad, "t").await, Err(LedgerError::BadCost)));
        }
        assert!(store.get(BALANCE_KEY).unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_token_is_reissued_for_persisted_balance() {
        let (store, clock, ledger) = setup();
        ledger.earn(12.0, "t").await.unwrap();
        let old = ledger.token().await.unwrap();
        clock.advance(181_000);
        let fresh = ledger.token().await.unwrap();
        assert_ne!(old.nonce, fresh.nonce);
        assert_eq!(fresh.balance, 12);
        let stored: BalanceToken =
            serde_json::from_str(&store.get(TOKEN_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(stored, fresh);
    }

    #[tokio::test]
    async fn forged_token_does_not_change_balance() {
        let (store, _clock, ledger) = setup();
        ledger.earn(5.0, "t").await.unwrap();
        let mut forged = ledger.token().await.unwrap();
        forged.balance = 9_999;
        store
            .set(TOKEN_KEY, &serde_json::to_string(&forged).unwrap())
            .unwrap();
        assert_eq!(ledger.get().await.unwrap(), 5);
        store.set(TOKEN_KEY, "garbage").unwrap();
        assert_eq!(ledger.get().await.unwrap(), 5);
        assert!(ledger.token().await.unwrap().balance == 5);
    }

    #[tokio::test]
    async fn legacy_token_balance_is_adopted_by_first_mutation() {
        let store = Arc::new(MemoryStore::new());
        let clock = ManualClock::new(T0);
        let key = SigningKey::generate().unwrap();
        store.set(SIGNING_KEY_KEY, &key.to_b64()).unwrap();
        let legacy = BalanceToken::issue(&key, 40, 0, 180).unwrap();
        store
            .set(TOKEN_KEY, &serde_json::to_string(&legacy).unwrap())
            .unwrap();

        let ledger =
            LedgerAuthority::spawn(store.clone(), Arc::new(clock), &LedgerConfig::default())
                .unwrap();
        assert_eq!(ledger.get().await.unwrap(), 40);
        assert_eq!(ledger.token().await.unwrap().balance, 40);
        assert!(store.get(BALANCE_KEY).unwrap().is_none());

        assert_eq!(ledger.earn(2.0, "t").await.unwrap(), 42);
        assert_eq!(store.get(BALANCE_KEY).unwrap().as_deref(), Some("42"));
        assert_eq!(ledger.get().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn get_on_fresh_store_writes_no_balance() {
        let (store, _clock, ledger) = setup();
        assert_eq!(ledger.get().await.unwrap(), 0);
        assert_eq!(ledger.token().await.unwrap().balance, 0);
        assert!(store.get(BALANCE_KEY).unwrap().is_none());
        assert!(store.get(TOKEN_KEY).unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_never_undoes_first_earn() {
        for _ in 0..100 {
            let (_store, _clock, ledger) = setup();
            let reader = ledger.clone();
            let get = tokio::spawn(async move { reader.get().await });
            let earn = ledger.earn(50.0, "t").await.unwrap();
            get.await.unwrap().unwrap();
            assert_eq!(earn, 50);
            assert_eq!(ledger.get().await.unwrap(), 50);
        }
    }

    #[tokio::test]
    async fn unparsable_balance_fails_and_is_kept() {
        let (store, _clock, ledger) = setup();
        store.set(BALANCE_KEY, "lots").unwrap();
        let corrupt = |err: &LedgerError| {
            matches!(
                err,
                LedgerError::Core(CoreError::Storage(StorageError::Corrupt { key, .. }))
                    if key == BALANCE_KEY
            )
        };
        assert!(corrupt(&ledger.get().await.unwrap_err()));
        assert!(corrupt(&ledger.earn(5.0, "t").await.unwrap_err()));
        assert!(corrupt(&ledger.spend(1.0, "t").await.unwrap_err()));
        assert_eq!(ledger.earn(5.0, "t").await.unwrap_err().reason(), "storage");
        assert_eq!(store.get(BALANCE_KEY).unwrap().as_deref(), Some("lots"));
    }

    #[tokio::test]
    async fn mutations_are_broadcast() {
        let (_store, _clock, ledger) = setup();
        let mut rx = ledger.subscribe();
        ledger.earn(3.0, "t").await.unwrap();
        let _ = ledger.spend(10.0, "t").await;
        ledger.spend(1.0, "t").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), PointsUpdated { balance: 3 });
        assert_eq!(rx.recv().await.unwrap(), PointsUpdated { balance: 2 });
        assert!(rx.try_recv().is_err());
    }
}
