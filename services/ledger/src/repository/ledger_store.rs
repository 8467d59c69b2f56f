use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::types::UserId;
use shared::Money;

use crate::domain::{NftAsset, RoundId, RoundRecord, Statistics};
use crate::errors::Result;
use crate::fairness::SeedPair;

/// NFT row together with its current owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedNft {
    pub asset: NftAsset,
    pub owner: UserId,
}

/// Source of ledger transactions
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a transaction. Fails with `ResourceExhausted` when the store
    /// cannot hand out another connection in time.
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>>;

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<()>;
}

/// One open ledger transaction
///
/// Every `lock_*` call takes an exclusive row lock held until `commit` or
/// `rollback`. Writes lock their row implicitly. A lock that cannot be
/// acquired within the store's lock timeout fails with `Timeout`, and
/// dropping the transaction without committing discards every write.
#[async_trait]
pub trait LedgerTxn: Send {
    /// Lock the user's balance; a user without a row reads as zero.
    async fn lock_balance(&mut self, user_id: UserId) -> Result<Money>;

    /// Add a non-negative amount and return the new balance.
    async fn credit(&mut self, user_id: UserId, amount: Money) -> Result<Money>;

    /// Remove a non-negative amount and return the new balance.
    ///
    /// Fails with `InsufficientBalance` instead of going negative.
    async fn debit(&mut self, user_id: UserId, amount: Money) -> Result<Money>;

    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<RoundRecord>>;

    /// Insert the round unless a row with its id exists, then lock it.
    ///
    /// Returns the stored row, which is the existing one when another
    /// transaction created it first. Never overwrites.
    async fn create_round(&mut self, round: &RoundRecord) -> Result<RoundRecord>;

    /// Update a round created earlier; `NotFound` when there is none.
    async fn save_round(&mut self, round: &RoundRecord) -> Result<()>;

    /// Seeds are stored alongside an existing round.
    async fn save_seed_pair(&mut self, round_id: RoundId, seed: &SeedPair) -> Result<()>;

    async fn load_seed_pair(&mut self, round_id: RoundId) -> Result<Option<SeedPair>>;

    /// Lock the named NFTs. Every mint must exist; the result is ordered by
    /// mint address.
    async fn lock_nfts(&mut self, mints: &[String]) -> Result<Vec<OwnedNft>>;

    async fn save_nft(&mut self, nft: &OwnedNft) -> Result<()>;

    async fn transfer_nft(&mut self, mint_address: &str, to: UserId) -> Result<()>;

    /// Lock the user's statistics, starting from zero when none exist yet.
    async fn lock_statistics(&mut self, user_id: UserId) -> Result<Statistics>;

    async fn save_statistics(&mut self, stats: &Statistics) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
