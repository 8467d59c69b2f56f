//! In-process LedgerStore
//!
//! Row locks are per-key tokio mutexes held for the life of a transaction,
//! so two transactions touching the same row serialize exactly as they do
//! with `SELECT ... FOR UPDATE`. Writes are staged per transaction and
//! merged into the shared tables on commit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::types::UserId;
use shared::Money;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};

use super::ledger_store::{LedgerStore, LedgerTxn, OwnedNft};
use crate::domain::{RoundId, RoundRecord, Statistics};
use crate::errors::{LedgerError, Result};
use crate::fairness::SeedPair;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RowKey {
    Balance(UserId),
    Round(RoundId),
    Nft(String),
    Statistics(UserId),
}

#[derive(Debug, Default)]
struct Tables {
    balances: HashMap<UserId, Money>,
    rounds: HashMap<RoundId, RoundRecord>,
    seeds: HashMap<RoundId, SeedPair>,
    nfts: HashMap<String, OwnedNft>,
    statistics: HashMap<UserId, Statistics>,
}

impl Tables {
    fn merge(&mut self, staged: Tables) {
        self.balances.extend(staged.balances);
        self.rounds.extend(staged.rounds);
        self.seeds.extend(staged.seeds);
        self.nfts.extend(staged.nfts);
        self.statistics.extend(staged.statistics);
    }
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: Mutex<HashMap<RowKey, Arc<RowLock<()>>>>,
    lock_timeout: Duration,
    sessions: Option<Arc<Semaphore>>,
}

/// LedgerStore kept in process memory
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_session_limit(lock_timeout, None)
    }

    /// Cap the number of simultaneously open transactions. `begin` waits up
    /// to `lock_timeout` for a free slot.
    pub fn with_session_limit(lock_timeout: Duration, max_open_sessions: Option<usize>) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: Mutex::new(HashMap::new()),
                lock_timeout,
                sessions: max_open_sessions.map(|n| Arc::new(Semaphore::new(n))),
            }),
        }
    }

    /// Committed balance, without locking
    pub fn balance(&self, user_id: UserId) -> Money {
        self.shared
            .tables
            .lock()
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(Money::ZERO)
    }

    pub fn round(&self, round_id: RoundId) -> Option<RoundRecord> {
        self.shared.tables.lock().rounds.get(&round_id).cloned()
    }

    pub fn seed_pair(&self, round_id: RoundId) -> Option<SeedPair> {
        self.shared.tables.lock().seeds.get(&round_id).cloned()
    }

    pub fn nft(&self, mint_address: &str) -> Option<OwnedNft> {
        self.shared.tables.lock().nfts.get(mint_address).cloned()
    }

    pub fn statistics(&self, user_id: UserId) -> Option<Statistics> {
        self.shared.tables.lock().statistics.get(&user_id).cloned()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        let permit = match &self.shared.sessions {
            Some(sessions) => {
                let acquire = sessions.clone().acquire_owned();
                let permit = tokio::time::timeout(self.shared.lock_timeout, acquire)
                    .await
                    .map_err(|_| {
                        LedgerError::ResourceExhausted("no free ledger session".to_string())
                    })?
                    .map_err(|_| LedgerError::Unavailable("ledger store closed".to_string()))?;
                Some(permit)
            }
            None => None,
        };

        Ok(Box::new(MemoryTxn {
            shared: self.shared.clone(),
            held: HashMap::new(),
            staged: Tables::default(),
            _permit: permit,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

struct MemoryTxn {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    staged: Tables,
    _permit: Option<OwnedSemaphorePermit>,
}

impl MemoryTxn {
    async fn lock(&mut self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let row = {
            let mut locks = self.shared.row_locks.lock();
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(RowLock::new(())))
                .clone()
        };

        let timeout = self.shared.lock_timeout;
        let guard = tokio::time::timeout(timeout, row.lock_owned())
            .await
            .map_err(|_| LedgerError::Timeout(format!("lock wait on {:?} exceeded {:?}", key, timeout)))?;

        self.held.insert(key, guard);
        Ok(())
    }

    fn release(&mut self) {
        let keys: Vec<RowKey> = self.held.keys().cloned().collect();
        self.held.clear();

        // Forget lock entries nobody else is holding or waiting on
        let mut locks = self.shared.row_locks.lock();
        for key in keys {
            if locks.get(&key).is_some_and(|row| Arc::strong_count(row) == 1) {
                locks.remove(&key);
            }
        }
    }

    fn current_balance(&self, user_id: UserId) -> Money {
        if let Some(balance) = self.staged.balances.get(&user_id) {
            return *balance;
        }
        self.shared
            .tables
            .lock()
            .balances
            .get(&user_id)
            .copied()
            .unwrap_or(Money::ZERO)
    }

    fn current_round(&self, round_id: RoundId) -> Option<RoundRecord> {
        if let Some(round) = self.staged.rounds.get(&round_id) {
            return Some(round.clone());
        }
        self.shared.tables.lock().rounds.get(&round_id).cloned()
    }

    fn current_nft(&self, mint_address: &str) -> Option<OwnedNft> {
        if let Some(nft) = self.staged.nfts.get(mint_address) {
            return Some(nft.clone());
        }
        self.shared.tables.lock().nfts.get(mint_address).cloned()
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        self.release();
    }
}

fn reject_negative(amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidInput(format!("negative amount: {}", amount)));
    }
    Ok(())
}

#[async_trait]
impl LedgerTxn for MemoryTxn {
    async fn lock_balance(&mut self, user_id: UserId) -> Result<Money> {
        self.lock(RowKey::Balance(user_id)).await?;
        Ok(self.current_balance(user_id))
    }

    async fn credit(&mut self, user_id: UserId, amount: Money) -> Result<Money> {
        reject_negative(amount)?;
        let balance = self.lock_balance(user_id).await?;
        let updated = balance.checked_add(amount)?;
        self.staged.balances.insert(user_id, updated);
        Ok(updated)
    }

    async fn debit(&mut self, user_id: UserId, amount: Money) -> Result<Money> {
        reject_negative(amount)?;
        let balance = self.lock_balance(user_id).await?;
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                required: amount.as_i64(),
                available: balance.as_i64(),
            });
        }
        let updated = balance.checked_sub(amount)?;
        self.staged.balances.insert(user_id, updated);
        Ok(updated)
    }

    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<RoundRecord>> {
        self.lock(RowKey::Round(round_id)).await?;
        Ok(self.current_round(round_id))
    }

    async fn create_round(&mut self, round: &RoundRecord) -> Result<RoundRecord> {
        self.lock(RowKey::Round(round.round_id)).await?;
        if let Some(existing) = self.current_round(round.round_id) {
            return Ok(existing);
        }
        self.staged.rounds.insert(round.round_id, round.clone());
        Ok(round.clone())
    }

    async fn save_round(&mut self, round: &RoundRecord) -> Result<()> {
        if self.lock_round(round.round_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("round {}", round.round_id)));
        }
        self.staged.rounds.insert(round.round_id, round.clone());
        Ok(())
    }

    async fn save_seed_pair(&mut self, round_id: RoundId, seed: &SeedPair) -> Result<()> {
        if self.lock_round(round_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("round {}", round_id)));
        }
        self.staged.seeds.insert(round_id, seed.clone());
        Ok(())
    }

    async fn load_seed_pair(&mut self, round_id: RoundId) -> Result<Option<SeedPair>> {
        self.lock(RowKey::Round(round_id)).await?;
        if let Some(seed) = self.staged.seeds.get(&round_id) {
            return Ok(Some(seed.clone()));
        }
        Ok(self.shared.tables.lock().seeds.get(&round_id).cloned())
    }

    async fn lock_nfts(&mut self, mints: &[String]) -> Result<Vec<OwnedNft>> {
        let mut ordered: Vec<String> = mints.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut locked = Vec::with_capacity(ordered.len());
        for mint in ordered {
            self.lock(RowKey::Nft(mint.clone())).await?;
            let nft = self
                .current_nft(&mint)
                .ok_or_else(|| LedgerError::NotFound(format!("NFT {}", mint)))?;
            locked.push(nft);
        }
        Ok(locked)
    }

    async fn save_nft(&mut self, nft: &OwnedNft) -> Result<()> {
        reject_negative(nft.asset.price)?;
        let mint = nft.asset.mint_address.clone();
        self.lock(RowKey::Nft(mint.clone())).await?;
        self.staged.nfts.insert(mint, nft.clone());
        Ok(())
    }

    async fn transfer_nft(&mut self, mint_address: &str, to: UserId) -> Result<()> {
        self.lock(RowKey::Nft(mint_address.to_string())).await?;
        let mut nft = self
            .current_nft(mint_address)
            .ok_or_else(|| LedgerError::NotFound(format!("NFT {}", mint_address)))?;
        nft.owner = to;
        self.staged.nfts.insert(mint_address.to_string(), nft);
        Ok(())
    }

    async fn lock_statistics(&mut self, user_id: UserId) -> Result<Statistics> {
        self.lock(RowKey::Statistics(user_id)).await?;
        if let Some(stats) = self.staged.statistics.get(&user_id) {
            return Ok(stats.clone());
        }
        let committed = self.shared.tables.lock().statistics.get(&user_id).cloned();
        Ok(committed.unwrap_or_else(|| Statistics::new(user_id)))
    }

    async fn save_statistics(&mut self, stats: &Statistics) -> Result<()> {
        self.lock(RowKey::Statistics(stats.user_id)).await?;
        self.staged.statistics.insert(stats.user_id, stats.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut txn = self;
        let staged = std::mem::take(&mut txn.staged);
        txn.shared.tables.lock().merge(staged);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NftAsset;
    use shared::types::GameType;
    use std::time::Instant;
    use uuid::Uuid;

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn store() -> MemoryLedgerStore {
        MemoryLedgerStore::new(Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_commit_makes_writes_visible() {
        let store = store();
        let mut txn = store.begin().await.unwrap();
        txn.credit(user(1), Money::from_scaled(500)).await.unwrap();
        assert_eq!(store.balance(user(1)), Money::ZERO);

        txn.commit().await.unwrap();
        assert_eq!(store.balance(user(1)), Money::from_scaled(500));
    }

    #[tokio::test]
    async fn test_rollback_and_drop_discard_writes() {
        let store = store();
        let mut txn = store.begin().await.unwrap();
        txn.credit(user(1), Money::from_scaled(500)).await.unwrap();
        txn.rollback().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        txn.credit(user(1), Money::from_scaled(700)).await.unwrap();
        drop(txn);

        assert_eq!(store.balance(user(1)), Money::ZERO);
    }

    #[tokio::test]
    async fn test_debit_never_goes_negative() {
        let store = store();
        let mut txn = store.begin().await.unwrap();
        txn.credit(user(1), Money::from_scaled(100)).await.unwrap();

        let err = txn.debit(user(1), Money::from_scaled(101)).await.unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { required: 101, available: 100 }
        ));
        assert_eq!(txn.debit(user(1), Money::from_scaled(100)).await.unwrap(), Money::ZERO);
        assert!(txn.credit(user(1), Money::from_scaled(-1)).await.is_err());
    }

    #[tokio::test]
    async fn test_second_locker_times_out_while_row_held() {
        let store = store();
        let mut first = store.begin().await.unwrap();
        first.lock_balance(user(1)).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let started = Instant::now();
        let err = second.lock_balance(user(1)).await.unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(100));

        // Other rows are unaffected
        second.lock_balance(user(2)).await.unwrap();

        drop(first);
        second.lock_balance(user(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_sees_committed_value() {
        let store = MemoryLedgerStore::new(Duration::from_secs(2));
        let mut first = store.begin().await.unwrap();
        first.credit(user(1), Money::from_scaled(10)).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut txn = waiter_store.begin().await.unwrap();
            txn.lock_balance(user(1)).await.unwrap()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        first.commit().await.unwrap();

        assert_eq!(waiter.await.unwrap(), Money::from_scaled(10));
    }

    #[tokio::test]
    async fn test_session_limit_exhausts() {
        let store = MemoryLedgerStore::with_session_limit(Duration::from_millis(50), Some(1));
        let held = store.begin().await.unwrap();
        assert!(matches!(store.begin().await, Err(LedgerError::ResourceExhausted(_))));

        drop(held);
        assert!(store.begin().await.is_ok());
    }

    #[tokio::test]
    async fn test_nft_lock_and_transfer() {
        let store = store();
        let mut txn = store.begin().await.unwrap();
        let nft = OwnedNft {
            asset: NftAsset::new("mint-b", Money::from_scaled(40)),
            owner: user(1),
        };
        txn.save_nft(&nft).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        let missing = txn
            .lock_nfts(&["mint-b".to_string(), "mint-a".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(missing, LedgerError::NotFound(_)));

        let locked = txn.lock_nfts(&["mint-b".to_string()]).await.unwrap();
        assert_eq!(locked, vec![nft]);
        txn.transfer_nft("mint-b", user(2)).await.unwrap();
        txn.commit().await.unwrap();

        assert_eq!(store.nft("mint-b").unwrap().owner, user(2));
    }

    #[tokio::test]
    async fn test_seed_requires_round() {
        let store = store();
        let round_id = Uuid::new_v4();
        let seed = SeedPair::from_server_seed("server", "client");

        let mut txn = store.begin().await.unwrap();
        assert!(matches!(
            txn.save_seed_pair(round_id, &seed).await,
            Err(LedgerError::NotFound(_))
        ));

        txn.create_round(&RoundRecord::open(round_id, GameType::Jackpot, seed.commitment()))
            .await
            .unwrap();
        txn.save_seed_pair(round_id, &seed).await.unwrap();
        assert_eq!(txn.load_seed_pair(round_id).await.unwrap(), Some(seed.clone()));
        txn.commit().await.unwrap();

        assert_eq!(store.seed_pair(round_id), Some(seed));
    }

    #[tokio::test]
    async fn test_create_round_never_overwrites() {
        let store = store();
        let round_id = Uuid::new_v4();
        let commitment = SeedPair::from_server_seed("server", "client").commitment();

        let mut txn = store.begin().await.unwrap();
        let mut record = txn
            .create_round(&RoundRecord::open(round_id, GameType::Crash, commitment.clone()))
            .await
            .unwrap();
        record.pot = Money::from_scaled(75);
        txn.save_round(&record).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = store.begin().await.unwrap();
        let existing = txn
            .create_round(&RoundRecord::open(round_id, GameType::Crash, commitment))
            .await
            .unwrap();
        assert_eq!(existing.pot, Money::from_scaled(75));
        txn.commit().await.unwrap();
        assert_eq!(store.round(round_id).unwrap().pot, Money::from_scaled(75));
    }

    #[tokio::test]
    async fn test_save_round_requires_existing_row() {
        let store = store();
        let commitment = SeedPair::from_server_seed("server", "client").commitment();
        let mut txn = store.begin().await.unwrap();
        assert!(matches!(
            txn.save_round(&RoundRecord::open(Uuid::new_v4(), GameType::Crash, commitment)).await,
            Err(LedgerError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_statistics_default_to_zero() {
        let store = store();
        let mut txn = store.begin().await.unwrap();
        let stats = txn.lock_statistics(user(3)).await.unwrap();
        assert_eq!(stats, Statistics::new(user(3)));
        drop(txn);
        assert!(store.statistics(user(3)).is_none());
    }
}
