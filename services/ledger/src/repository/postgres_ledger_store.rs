use std::time::Duration;

use async_trait::async_trait;
use shared::types::{GameType, UserId};
use shared::Money;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::ledger_store::{LedgerStore, LedgerTxn, OwnedNft};
use crate::domain::{GameStatistics, NftAsset, RoundId, RoundRecord, RoundStatus, Statistics};
use crate::errors::{LedgerError, Result};
use crate::fairness::{SeedCommitment, SeedPair};

pub struct PostgresLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn begin(&self) -> Result<Box<dyn LedgerTxn>> {
        let mut tx = self.pool.begin().await?;

        // Scoped to this transaction; an expired wait raises SQLSTATE 55P03
        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(format!("{}ms", self.lock_timeout.as_millis()))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgLedgerTxn { tx }))
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgLedgerTxn {
    tx: Transaction<'static, Postgres>,
}

fn reject_negative(amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidInput(format!("negative amount: {}", amount)));
    }
    Ok(())
}

fn round_from_row(row: &PgRow) -> Result<RoundRecord> {
    let game_type: String = row.try_get("game_type")?;
    let status: String = row.try_get("status")?;
    let status = RoundStatus::parse(&status).ok_or_else(|| {
        LedgerError::Internal(anyhow::anyhow!("unknown round status {}", status))
    })?;
    let winner: Option<i64> = row.try_get("winner")?;

    Ok(RoundRecord {
        round_id: row.try_get("round_id")?,
        game_type: GameType::try_from(game_type.as_str())?,
        status,
        pot: Money::from_scaled(row.try_get("pot")?),
        commitment: SeedCommitment {
            server_seed_hash: row.try_get("server_seed_hash")?,
            client_seed: row.try_get("client_seed")?,
        },
        winner: winner.map(UserId::new).transpose()?,
        settled_at: row.try_get("settled_at")?,
    })
}

fn nft_from_row(row: &PgRow) -> Result<OwnedNft> {
    let mint_address: String = row.try_get("mint_address")?;
    Ok(OwnedNft {
        asset: NftAsset::new(mint_address, Money::from_scaled(row.try_get("price")?)),
        owner: UserId::new(row.try_get("owner_id")?)?,
    })
}

#[async_trait]
impl LedgerTxn for PgLedgerTxn {
    async fn lock_balance(&mut self, user_id: UserId) -> Result<Money> {
        // Make sure there is a row to lock
        sqlx::query("INSERT INTO balances (user_id, amount) VALUES ($1, 0) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        let amount: i64 = sqlx::query_scalar("SELECT amount FROM balances WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.as_i64())
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(Money::from_scaled(amount))
    }

    async fn credit(&mut self, user_id: UserId, amount: Money) -> Result<Money> {
        reject_negative(amount)?;
        let balance = self.lock_balance(user_id).await?;
        let updated = balance.checked_add(amount)?;

        sqlx::query("UPDATE balances SET amount = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id.as_i64())
            .bind(updated.as_i64())
            .execute(&mut *self.tx)
            .await?;

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

        sqlx::query("UPDATE balances SET amount = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id.as_i64())
            .bind(updated.as_i64())
            .execute(&mut *self.tx)
            .await?;

        Ok(updated)
    }

    async fn lock_round(&mut self, round_id: RoundId) -> Result<Option<RoundRecord>> {
        let row = sqlx::query(
            r#"
            SELECT round_id, game_type, status, pot, server_seed_hash, client_seed, winner, settled_at
            FROM rounds
            WHERE round_id = $1
            FOR UPDATE
            "#,
        )
        .bind(round_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(round_from_row).transpose()
    }

    async fn create_round(&mut self, round: &RoundRecord) -> Result<RoundRecord> {
        // A concurrent creator blocks here until it commits, then this is a no-op
        sqlx::query(
            r#"
            INSERT INTO rounds (round_id, game_type, status, pot, server_seed_hash, client_seed)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (round_id) DO NOTHING
            "#,
        )
        .bind(round.round_id)
        .bind(round.game_type.as_str())
        .bind(round.status.as_str())
        .bind(round.pot.as_i64())
        .bind(&round.commitment.server_seed_hash)
        .bind(&round.commitment.client_seed)
        .execute(&mut *self.tx)
        .await?;

        self.lock_round(round.round_id).await?.ok_or_else(|| {
            LedgerError::Internal(anyhow::anyhow!("round {} vanished after insert", round.round_id))
        })
    }

    async fn save_round(&mut self, round: &RoundRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE rounds
            SET status = $2, pot = $3, winner = $4, settled_at = $5
            WHERE round_id = $1
            "#,
        )
        .bind(round.round_id)
        .bind(round.status.as_str())
        .bind(round.pot.as_i64())
        .bind(round.winner.map(|w| w.as_i64()))
        .bind(round.settled_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("round {}", round.round_id)));
        }
        Ok(())
    }

    async fn save_seed_pair(&mut self, round_id: RoundId, seed: &SeedPair) -> Result<()> {
        if self.lock_round(round_id).await?.is_none() {
            return Err(LedgerError::NotFound(format!("round {}", round_id)));
        }

        sqlx::query(
            r#"
            INSERT INTO round_seeds (round_id, server_seed, server_seed_hash, client_seed)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (round_id) DO UPDATE SET
                server_seed = EXCLUDED.server_seed,
                server_seed_hash = EXCLUDED.server_seed_hash,
                client_seed = EXCLUDED.client_seed
            "#,
        )
        .bind(round_id)
        .bind(&seed.server_seed)
        .bind(&seed.server_seed_hash)
        .bind(&seed.client_seed)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn load_seed_pair(&mut self, round_id: RoundId) -> Result<Option<SeedPair>> {
        let row = sqlx::query(
            "SELECT server_seed, server_seed_hash, client_seed FROM round_seeds WHERE round_id = $1 FOR UPDATE",
        )
        .bind(round_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(SeedPair {
            server_seed: row.try_get("server_seed")?,
            server_seed_hash: row.try_get("server_seed_hash")?,
            client_seed: row.try_get("client_seed")?,
        }))
    }

    async fn lock_nfts(&mut self, mints: &[String]) -> Result<Vec<OwnedNft>> {
        let mut ordered: Vec<String> = mints.to_vec();
        ordered.sort();
        ordered.dedup();

        let rows = sqlx::query(
            r#"
            SELECT mint_address, owner_id, price
            FROM nfts
            WHERE mint_address = ANY($1)
            ORDER BY mint_address
            FOR UPDATE
            "#,
        )
        .bind(&ordered)
        .fetch_all(&mut *self.tx)
        .await?;

        let locked = rows.iter().map(nft_from_row).collect::<Result<Vec<_>>>()?;
        if locked.len() != ordered.len() {
            let missing = ordered
                .iter()
                .find(|mint| !locked.iter().any(|nft| &nft.asset.mint_address == *mint))
                .cloned()
                .unwrap_or_default();
            return Err(LedgerError::NotFound(format!("NFT {}", missing)));
        }

        Ok(locked)
    }

    async fn save_nft(&mut self, nft: &OwnedNft) -> Result<()> {
        reject_negative(nft.asset.price)?;

        sqlx::query(
            r#"
            INSERT INTO nfts (mint_address, owner_id, price)
            VALUES ($1, $2, $3)
            ON CONFLICT (mint_address) DO UPDATE SET
                owner_id = EXCLUDED.owner_id,
                price = EXCLUDED.price
            "#,
        )
        .bind(&nft.asset.mint_address)
        .bind(nft.owner.as_i64())
        .bind(nft.asset.price.as_i64())
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn transfer_nft(&mut self, mint_address: &str, to: UserId) -> Result<()> {
        let result = sqlx::query("UPDATE nfts SET owner_id = $2 WHERE mint_address = $1")
            .bind(mint_address)
            .bind(to.as_i64())
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound(format!("NFT {}", mint_address)));
        }
        Ok(())
    }

    async fn lock_statistics(&mut self, user_id: UserId) -> Result<Statistics> {
        sqlx::query("INSERT INTO user_statistics (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.as_i64())
            .execute(&mut *self.tx)
            .await?;

        let row = sqlx::query(
            r#"
            SELECT total_wagered, total_win, total_loss, total_profit,
                   win_streaks, lose_streaks, best_streak, worst_streak, max_profit
            FROM user_statistics
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_one(&mut *self.tx)
        .await?;

        let mut stats = Statistics {
            user_id,
            total_wagered: Money::from_scaled(row.try_get("total_wagered")?),
            total_win: Money::from_scaled(row.try_get("total_win")?),
            total_loss: Money::from_scaled(row.try_get("total_loss")?),
            total_profit: Money::from_scaled(row.try_get("total_profit")?),
            win_streaks: row.try_get("win_streaks")?,
            lose_streaks: row.try_get("lose_streaks")?,
            best_streak: row.try_get("best_streak")?,
            worst_streak: row.try_get("worst_streak")?,
            max_profit: Money::from_scaled(row.try_get("max_profit")?),
            games: Default::default(),
        };

        let game_rows = sqlx::query(
            r#"
            SELECT game_type, rounds, wins, losses, wagered, profit, loss
            FROM user_game_statistics
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_i64())
        .fetch_all(&mut *self.tx)
        .await?;

        for row in game_rows {
            let game_type: String = row.try_get("game_type")?;
            stats.games.insert(
                GameType::try_from(game_type.as_str())?,
                GameStatistics {
                    rounds: row.try_get("rounds")?,
                    wins: row.try_get("wins")?,
                    losses: row.try_get("losses")?,
                    wagered: Money::from_scaled(row.try_get("wagered")?),
                    profit: Money::from_scaled(row.try_get("profit")?),
                    loss: Money::from_scaled(row.try_get("loss")?),
                },
            );
        }

        Ok(stats)
    }

    async fn save_statistics(&mut self, stats: &Statistics) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_statistics (
                user_id, total_wagered, total_win, total_loss, total_profit,
                win_streaks, lose_streaks, best_streak, worst_streak, max_profit
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (user_id) DO UPDATE SET
                total_wagered = EXCLUDED.total_wagered,
                total_win = EXCLUDED.total_win,
                total_loss = EXCLUDED.total_loss,
                total_profit = EXCLUDED.total_profit,
                win_streaks = EXCLUDED.win_streaks,
                lose_streaks = EXCLUDED.lose_streaks,
                best_streak = EXCLUDED.best_streak,
                worst_streak = EXCLUDED.worst_streak,
                max_profit = EXCLUDED.max_profit
            "#,
        )
        .bind(stats.user_id.as_i64())
        .bind(stats.total_wagered.as_i64())
        .bind(stats.total_win.as_i64())
        .bind(stats.total_loss.as_i64())
        .bind(stats.total_profit.as_i64())
        .bind(stats.win_streaks)
        .bind(stats.lose_streaks)
        .bind(stats.best_streak)
        .bind(stats.worst_streak)
        .bind(stats.max_profit.as_i64())
        .execute(&mut *self.tx)
        .await?;

        for (game_type, game) in &stats.games {
            sqlx::query(
                r#"
                INSERT INTO user_game_statistics (
                    user_id, game_type, rounds, wins, losses, wagered, profit, loss
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (user_id, game_type) DO UPDATE SET
                    rounds = EXCLUDED.rounds,
                    wins = EXCLUDED.wins,
                    losses = EXCLUDED.losses,
                    wagered = EXCLUDED.wagered,
                    profit = EXCLUDED.profit,
                    loss = EXCLUDED.loss
                "#,
            )
            .bind(stats.user_id.as_i64())
            .bind(game_type.as_str())
            .bind(game.rounds)
            .bind(game.wins)
            .bind(game.losses)
            .bind(game.wagered.as_i64())
            .bind(game.profit.as_i64())
            .bind(game.loss.as_i64())
            .execute(&mut *self.tx)
            .await?;
        }

        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
