//! Session / transaction aggregator
//!
//! A session is one open ledger transaction addressed by id. Callers fetch
//! its handle, issue mutations in order and finish it with exactly one
//! commit or rollback. Once finished the id is gone, and any handle still
//! held by a caller fails every call with `NotFound`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::types::UserId;
use shared::Money;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use uuid::Uuid;

use crate::domain::{RoundId, RoundRecord, Statistics};
use crate::errors::{LedgerError, Result};
use crate::fairness::SeedPair;
use crate::repository::{LedgerStore, LedgerTxn, OwnedNft};

pub type SessionId = Uuid;

/// Shared access to one session's transaction
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    txn: Arc<AsyncMutex<Box<dyn LedgerTxn>>>,
}

impl SessionHandle {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Exclusive access to the transaction. Mutations issued through one
    /// guard run in order.
    pub async fn txn(&self) -> AsyncMutexGuard<'_, Box<dyn LedgerTxn>> {
        self.txn.lock().await
    }

    /// Swap the live transaction out so no handle can reach it again.
    async fn finalize(&self) -> Box<dyn LedgerTxn> {
        let mut guard = self.txn.lock().await;
        std::mem::replace(&mut *guard, Box::new(FinalizedTxn(self.id)))
    }
}

/// Stand-in left behind in a finished session
struct FinalizedTxn(SessionId);

impl FinalizedTxn {
    fn gone<T>(&self) -> Result<T> {
        Err(LedgerError::NotFound(format!("session {} is finalized", self.0)))
    }
}

#[async_trait]
impl LedgerTxn for FinalizedTxn {
    async fn lock_balance(&mut self, _user_id: UserId) -> Result<Money> {
        self.gone()
    }

    async fn credit(&mut self, _user_id: UserId, _amount: Money) -> Result<Money> {
        self.gone()
    }

    async fn debit(&mut self, _user_id: UserId, _amount: Money) -> Result<Money> {
        self.gone()
    }

    async fn lock_round(&mut self, _round_id: RoundId) -> Result<Option<RoundRecord>> {
        self.gone()
    }

    async fn create_round(&mut self, _round: &RoundRecord) -> Result<RoundRecord> {
        self.gone()
    }

    async fn save_round(&mut self, _round: &RoundRecord) -> Result<()> {
        self.gone()
    }

    async fn save_seed_pair(&mut self, _round_id: RoundId, _seed: &SeedPair) -> Result<()> {
        self.gone()
    }

    async fn load_seed_pair(&mut self, _round_id: RoundId) -> Result<Option<SeedPair>> {
        self.gone()
    }

    async fn lock_nfts(&mut self, _mints: &[String]) -> Result<Vec<OwnedNft>> {
        self.gone()
    }

    async fn save_nft(&mut self, _nft: &OwnedNft) -> Result<()> {
        self.gone()
    }

    async fn transfer_nft(&mut self, _mint_address: &str, _to: UserId) -> Result<()> {
        self.gone()
    }

    async fn lock_statistics(&mut self, _user_id: UserId) -> Result<Statistics> {
        self.gone()
    }

    async fn save_statistics(&mut self, _stats: &Statistics) -> Result<()> {
        self.gone()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.gone()
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.gone()
    }
}

struct SessionSlot {
    handle: SessionHandle,
    opened_at: Instant,
}

/// Registry of open sessions over one LedgerStore
pub struct SessionAggregator {
    store: Arc<dyn LedgerStore>,
    sessions: Mutex<HashMap<SessionId, SessionSlot>>,
}

impl SessionAggregator {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    pub async fn start_session(&self) -> Result<SessionId> {
        let txn = self.store.begin().await?;
        let id = Uuid::new_v4();
        let handle = SessionHandle {
            id,
            txn: Arc::new(AsyncMutex::new(txn)),
        };

        self.sessions.lock().insert(
            id,
            SessionSlot {
                handle,
                opened_at: Instant::now(),
            },
        );

        metrics::counter!("sessions_started_total").increment(1);
        metrics::gauge!("open_sessions").increment(1.0);
        tracing::debug!(session_id = %id, "Session started");

        Ok(id)
    }

    pub fn get_session(&self, id: SessionId) -> Result<SessionHandle> {
        self.sessions
            .lock()
            .get(&id)
            .map(|slot| slot.handle.clone())
            .ok_or_else(|| LedgerError::NotFound(format!("session {}", id)))
    }

    /// Apply every mutation made in the session, or none of them.
    pub async fn commit_session(&self, id: SessionId) -> Result<()> {
        let slot = self.take(id)?;
        let txn = slot.handle.finalize().await;

        match txn.commit().await {
            Ok(()) => {
                metrics::counter!("sessions_committed_total").increment(1);
                tracing::debug!(session_id = %id, "Session committed");
                Ok(())
            }
            Err(e) => {
                metrics::counter!("sessions_rolled_back_total").increment(1);
                tracing::warn!(session_id = %id, error = %e, "Session commit failed");
                Err(e)
            }
        }
    }

    pub async fn rollback_session(&self, id: SessionId) -> Result<()> {
        let slot = self.take(id)?;
        let txn = slot.handle.finalize().await;

        metrics::counter!("sessions_rolled_back_total").increment(1);
        tracing::debug!(session_id = %id, "Session rolled back");
        txn.rollback().await
    }

    /// Commit on `Ok`, roll back on `Err`, and pass the work's result on.
    ///
    /// A rollback failure is logged; the original error is what the caller
    /// sees.
    pub async fn finish<T>(&self, id: SessionId, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.commit_session(id).await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback_session(id).await {
                    tracing::warn!(session_id = %id, error = %rollback_err, "Rollback failed");
                }
                Err(e)
            }
        }
    }

    /// Roll back every session open for at least `max_age`.
    ///
    /// Returns how many were reaped.
    pub async fn reap_abandoned(&self, max_age: Duration) -> usize {
        let stale: Vec<(SessionId, SessionSlot)> = {
            let mut sessions = self.sessions.lock();
            let ids: Vec<SessionId> = sessions
                .iter()
                .filter(|(_, slot)| slot.opened_at.elapsed() >= max_age)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| sessions.remove(&id).map(|slot| (id, slot)))
                .collect()
        };

        let reaped = stale.len();
        for (id, slot) in stale {
            metrics::gauge!("open_sessions").decrement(1.0);
            let txn = slot.handle.finalize().await;
            if let Err(e) = txn.rollback().await {
                tracing::warn!(session_id = %id, error = %e, "Rollback of abandoned session failed");
            }
            metrics::counter!("sessions_reaped_total").increment(1);
            tracing::warn!(
                session_id = %id,
                age_ms = slot.opened_at.elapsed().as_millis() as u64,
                "Reaped abandoned session"
            );
        }

        reaped
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn take(&self, id: SessionId) -> Result<SessionSlot> {
        let slot = self
            .sessions
            .lock()
            .remove(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("session {}", id)))?;
        metrics::gauge!("open_sessions").decrement(1.0);
        Ok(slot)
    }
}
