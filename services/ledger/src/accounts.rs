//! Balance and NFT custody outside of rounds

use std::sync::Arc;

use shared::types::UserId;
use shared::Money;

use crate::domain::NftAsset;
use crate::errors::{LedgerError, Result};
use crate::repository::OwnedNft;
use crate::session::SessionAggregator;

pub struct AccountService {
    sessions: Arc<SessionAggregator>,
}

fn require_positive(amount: Money) -> Result<()> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidInput(format!("amount must be positive, got {}", amount)));
    }
    Ok(())
}

impl AccountService {
    pub fn new(sessions: Arc<SessionAggregator>) -> Self {
        Self { sessions }
    }

    /// Returns the new balance.
    pub async fn deposit(&self, user_id: UserId, amount: Money) -> Result<Money> {
        require_positive(amount)?;
        let id = self.sessions.start_session().await?;
        let result: Result<Money> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            txn.credit(user_id, amount).await
        }
        .await;

        let balance = self.sessions.finish(id, result).await?;
        tracing::info!(user_id = %user_id, amount = %amount, balance = %balance, "Deposit applied");
        Ok(balance)
    }

    /// Returns the new balance; fails with `InsufficientBalance` and moves
    /// nothing when the user cannot cover `amount`.
    pub async fn withdraw(&self, user_id: UserId, amount: Money) -> Result<Money> {
        require_positive(amount)?;
        let id = self.sessions.start_session().await?;
        let result: Result<Money> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            txn.debit(user_id, amount).await
        }
        .await;

        let balance = self.sessions.finish(id, result).await?;
        tracing::info!(user_id = %user_id, amount = %amount, balance = %balance, "Withdrawal applied");
        Ok(balance)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<Money> {
        let id = self.sessions.start_session().await?;
        let result: Result<Money> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            txn.lock_balance(user_id).await
        }
        .await;

        if let Err(e) = self.sessions.rollback_session(id).await {
            tracing::warn!(session_id = %id, error = %e, "Rollback failed");
        }
        result
    }

    /// Take custody of an NFT for `owner` at the given price.
    pub async fn register_nft(&self, owner: UserId, asset: NftAsset) -> Result<()> {
        if asset.mint_address.is_empty() {
            return Err(LedgerError::InvalidInput("empty mint address".to_string()));
        }

        let id = self.sessions.start_session().await?;
        let nft = OwnedNft { asset, owner };
        let result: Result<()> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            txn.save_nft(&nft).await
        }
        .await;

        self.sessions.finish(id, result).await?;
        tracing::info!(mint = %nft.asset.mint_address, owner = %owner, price = %nft.asset.price, "NFT registered");
        Ok(())
    }
}
