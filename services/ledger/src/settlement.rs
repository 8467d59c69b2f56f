//! Round settlement
//!
//! Every money movement of a round happens inside one session: the round
//! row is locked first, so bet placement and settlement of the same round
//! serialize, and a second settlement finds the round already settled.
//! The wager pipeline runs only after the commit.
//!
//! A round is opened with its seed commitment. Settlement only accepts the
//! seed pair that commitment names, so the seed cannot be chosen after the
//! bets are known.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::constants::{MAX_HOUSE_FEE_BPS, MAX_POT_NFTS, MAX_SETTLEMENT_RETRIES};
use shared::types::{GameType, UserId};
use shared::Money;
use tracing::Instrument;

use crate::domain::{NftAsset, RoundId, RoundRecord, RoundStatus, WagerOutcome};
use crate::errors::{LedgerError, Result};
use crate::fairness::{
    select_winner, CandidateCount, Draw, RandomClient, SeedCommitment, SeedPair, WinnerCandidate,
};
use crate::fees::select_nfts_for_fee;
use crate::session::{SessionAggregator, SessionId};
use crate::wager::{PipelineReport, WagerPipeline};

/// Ticket total the display counts of a pot are scaled to
pub const DISPLAY_TICKET_COUNT: u64 = 100;

#[derive(Debug, Clone)]
pub struct SettlementPolicy {
    pub house_fee_bps: u32,
    /// Account that receives fees and banks house games
    pub house_user_id: UserId,
    pub display_ticket_count: u64,
    /// Total tries of one settlement, the first included
    pub max_attempts: u32,
    pub retry_initial_interval: Duration,
    pub retry_max_interval: Duration,
}

impl SettlementPolicy {
    pub fn new(house_fee_bps: u32, house_user_id: UserId) -> Result<Self> {
        if house_fee_bps > MAX_HOUSE_FEE_BPS {
            return Err(LedgerError::InvalidInput(format!(
                "house fee {} bps exceeds {} bps",
                house_fee_bps, MAX_HOUSE_FEE_BPS
            )));
        }
        Ok(Self {
            house_fee_bps,
            house_user_id,
            display_ticket_count: DISPLAY_TICKET_COUNT,
            max_attempts: MAX_SETTLEMENT_RETRIES + 1,
            retry_initial_interval: Duration::from_millis(50),
            retry_max_interval: Duration::from_secs(2),
        })
    }

    /// `retries` extra tries after the first
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.max_attempts = retries.saturating_add(1);
        self
    }
}

/// One player's stake in a pot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotEntry {
    pub user_id: UserId,
    /// Coins escrowed through `place_bet`
    pub coins: Money,
    /// NFTs still owned by the player until settlement
    pub nfts: Vec<String>,
}

/// Player-vs-player pot round ready to settle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PotRound {
    pub round_id: RoundId,
    pub game_type: GameType,
    pub is_house_game: bool,
    pub seed: SeedPair,
    pub nonce: u64,
    pub entries: Vec<PotEntry>,
}

/// Single player against the house. The game computed `payout` from
/// `seed.outcome(nonce)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseRound {
    pub round_id: RoundId,
    pub game_type: GameType,
    pub user_id: UserId,
    pub bet_amount: Money,
    pub payout: Money,
    pub seed: SeedPair,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReceipt {
    pub round_id: RoundId,
    pub winner: UserId,
    pub outcome: u64,
    pub pot_value: Money,
    pub fee: Money,
    pub fee_coins: Money,
    pub fee_nfts: Vec<NftAsset>,
    pub payout_coins: Money,
    pub payout_nfts: Vec<NftAsset>,
    pub counts: Vec<CandidateCount>,
    pub outcomes: Vec<WagerOutcome>,
    /// Revealed seed; anyone can recheck `outcome` against it
    pub seed: SeedPair,
    /// Provider draw that decided `outcome` when a random provider is wired
    pub draw: Option<Draw>,
    pub pipeline: Option<PipelineReport>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HouseSettlement {
    pub round_id: RoundId,
    pub outcome: u64,
    pub wager: WagerOutcome,
    pub seed: SeedPair,
    pub pipeline: Option<PipelineReport>,
}

pub struct RoundSettler {
    sessions: Arc<SessionAggregator>,
    pipeline: Arc<WagerPipeline>,
    policy: SettlementPolicy,
    random: Option<Arc<RandomClient>>,
}

fn validate_pot(round: &PotRound) -> Result<()> {
    if round.entries.is_empty() {
        return Err(LedgerError::InvalidInput(format!("round {} has no entries", round.round_id)));
    }

    let mut users = HashSet::new();
    let mut mints = HashSet::new();
    for entry in &round.entries {
        if !users.insert(entry.user_id) {
            return Err(LedgerError::InvalidInput(format!("user {} entered twice", entry.user_id)));
        }
        if entry.coins.is_negative() {
            return Err(LedgerError::InvalidInput(format!(
                "negative coins for user {}",
                entry.user_id
            )));
        }
        for mint in &entry.nfts {
            if !mints.insert(mint.as_str()) {
                return Err(LedgerError::InvalidInput(format!("NFT {} entered twice", mint)));
            }
        }
    }

    if mints.len() > MAX_POT_NFTS {
        return Err(LedgerError::InvalidInput(format!(
            "pot holds {} NFTs, at most {} allowed",
            mints.len(),
            MAX_POT_NFTS
        )));
    }
    Ok(())
}

fn verify_seed(seed: &SeedPair) -> Result<()> {
    if !seed.verify() {
        return Err(LedgerError::InvalidInput(
            "server seed does not match its commitment".to_string(),
        ));
    }
    Ok(())
}

fn open_round_for_settlement(
    record: Option<RoundRecord>,
    round_id: RoundId,
    game_type: GameType,
    seed: &SeedPair,
) -> Result<RoundRecord> {
    let record = record.ok_or_else(|| LedgerError::NotFound(format!("round {}", round_id)))?;
    if record.is_settled() {
        return Err(LedgerError::AlreadySettled(format!("round {}", round_id)));
    }
    if record.game_type != game_type {
        return Err(LedgerError::InvalidInput(format!(
            "round {} is {}, not {}",
            round_id, record.game_type, game_type
        )));
    }
    if !seed.is_committed_by(&record.commitment) {
        return Err(LedgerError::InvalidInput(format!(
            "seed for round {} is not the one committed when it opened",
            round_id
        )));
    }
    Ok(record)
}

impl RoundSettler {
    pub fn new(sessions: Arc<SessionAggregator>, pipeline: Arc<WagerPipeline>, policy: SettlementPolicy) -> Self {
        Self {
            sessions,
            pipeline,
            policy,
            random: None,
        }
    }

    /// Decide pot outcomes with the signed-random provider instead of the
    /// round seed alone.
    pub fn with_random_client(mut self, client: Arc<RandomClient>) -> Self {
        self.random = Some(client);
        self
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    /// Create the round row with its seed commitment. Opening a round that
    /// is already open with the same game and commitment returns it
    /// unchanged.
    pub async fn open_round(
        &self,
        round_id: RoundId,
        game_type: GameType,
        commitment: &SeedCommitment,
    ) -> Result<RoundRecord> {
        if commitment.server_seed_hash.is_empty() {
            return Err(LedgerError::InvalidInput("empty server seed hash".to_string()));
        }

        let id = self.sessions.start_session().await?;
        let result: Result<RoundRecord> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            let wanted = RoundRecord::open(round_id, game_type, commitment.clone());
            let stored = txn.create_round(&wanted).await?;

            if stored.is_settled() {
                return Err(LedgerError::AlreadySettled(format!("round {}", round_id)));
            }
            if stored.game_type != game_type || stored.commitment != *commitment {
                return Err(LedgerError::InvalidInput(format!(
                    "round {} already exists with another game or seed commitment",
                    round_id
                )));
            }
            Ok(stored)
        }
        .await;

        let record = self.sessions.finish(id, result).await?;
        tracing::info!(
            round_id = %round_id,
            game_type = %game_type,
            server_seed_hash = %record.commitment.server_seed_hash,
            "Round opened"
        );
        Ok(record)
    }

    /// Move `amount` from the user's balance into the round's escrow.
    ///
    /// Returns the new pot.
    pub async fn place_bet(&self, round_id: RoundId, user_id: UserId, amount: Money) -> Result<Money> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidInput(format!("bet must be positive, got {}", amount)));
        }

        let id = self.sessions.start_session().await?;
        let result: Result<Money> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            let mut record = txn
                .lock_round(round_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("round {}", round_id)))?;
            if record.status != RoundStatus::Open {
                return Err(LedgerError::AlreadySettled(format!("round {} is closed for bets", round_id)));
            }

            txn.debit(user_id, amount).await?;
            record.pot = record.pot.checked_add(amount)?;
            txn.save_round(&record).await?;
            Ok(record.pot)
        }
        .await;

        let pot = self.sessions.finish(id, result).await?;
        tracing::info!(round_id = %round_id, user_id = %user_id, amount = %amount, pot = %pot, "Bet placed");
        Ok(pot)
    }

    /// Settle a pot round: pick the winner, take the house fee and pay out,
    /// all or nothing.
    pub async fn settle_pot_round(&self, round: &PotRound) -> Result<SettlementReceipt> {
        validate_pot(round)?;
        verify_seed(&round.seed)?;
        let (outcome, draw) = self.draw_outcome(round).await?;
        self.settle_drawn(round, outcome, draw).await
    }

    /// Outcome of a pot round, from the provider when one is wired.
    async fn draw_outcome(&self, round: &PotRound) -> Result<(u64, Option<Draw>)> {
        match &self.random {
            Some(client) => {
                let draw = client.draw(&round.seed.commitment()).await?;
                Ok((draw.outcome, Some(draw)))
            }
            None => Ok((round.seed.outcome(round.nonce), None)),
        }
    }

    async fn settle_drawn(&self, round: &PotRound, outcome: u64, draw: Option<Draw>) -> Result<SettlementReceipt> {
        let span = tracing::info_span!(
            "settle_round",
            round_id = %round.round_id,
            game_type = %round.game_type
        );

        async {
            let id = self.sessions.start_session().await?;
            let result = self.apply_pot_settlement(id, round, outcome).await;
            let mut receipt = match self.sessions.finish(id, result).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    metrics::counter!("settlement_failures_total").increment(1);
                    tracing::warn!(error = %e, "Settlement rolled back");
                    return Err(e);
                }
            };

            metrics::counter!("rounds_settled_total").increment(1);
            tracing::info!(
                winner = %receipt.winner,
                pot = %receipt.pot_value,
                fee = %receipt.fee,
                request_id = ?draw.as_ref().map(|d| d.request_id),
                "Round settled"
            );

            receipt.draw = draw;
            receipt.pipeline = self.run_pipeline(&receipt.outcomes, round.game_type, round.is_house_game).await;
            Ok(receipt)
        }
        .instrument(span)
        .await
    }

    async fn apply_pot_settlement(&self, id: SessionId, round: &PotRound, outcome: u64) -> Result<SettlementReceipt> {
        let handle = self.sessions.get_session(id)?;
        let mut txn = handle.txn().await;

        let mut record = open_round_for_settlement(
            txn.lock_round(round.round_id).await?,
            round.round_id,
            round.game_type,
            &round.seed,
        )?;

        let coin_pot = Money::checked_sum(round.entries.iter().map(|e| e.coins))?;
        if coin_pot != record.pot {
            return Err(LedgerError::InvalidInput(format!(
                "entries stake {} but round escrow holds {}",
                coin_pot, record.pot
            )));
        }

        let mints: Vec<String> = round.entries.iter().flat_map(|e| e.nfts.iter().cloned()).collect();
        let locked: HashMap<String, _> = txn
            .lock_nfts(&mints)
            .await?
            .into_iter()
            .map(|nft| (nft.asset.mint_address.clone(), nft))
            .collect();

        // Entry order is kept for the pot's NFT list
        let mut pot_nfts = Vec::with_capacity(mints.len());
        let mut stakes = Vec::with_capacity(round.entries.len());
        let mut candidates = Vec::with_capacity(round.entries.len());
        for entry in &round.entries {
            let mut stake = entry.coins;
            for mint in &entry.nfts {
                let nft = locked
                    .get(mint)
                    .ok_or_else(|| LedgerError::NotFound(format!("NFT {}", mint)))?;
                if nft.owner != entry.user_id {
                    return Err(LedgerError::InvalidInput(format!(
                        "NFT {} is not owned by user {}",
                        mint, entry.user_id
                    )));
                }
                stake = stake.checked_add(nft.asset.price)?;
                pot_nfts.push(nft.asset.clone());
            }

            stakes.push((entry.user_id, stake));
            candidates.push(WinnerCandidate {
                weight: u64::try_from(stake.as_i64()).unwrap_or(0),
                id: u64::try_from(entry.user_id.as_i64()).unwrap_or(0),
                entity: entry.user_id,
            });
        }

        let selection = select_winner(candidates, outcome, self.policy.display_ticket_count)?;
        let winner = selection.winner.entity;

        let nft_pot = Money::checked_sum(pot_nfts.iter().map(|nft| nft.price))?;
        let pot_value = coin_pot.checked_add(nft_pot)?;
        let fee = pot_value.apply_bps(self.policy.house_fee_bps)?;

        let fee_selection = select_nfts_for_fee(&pot_nfts, fee)?;
        let fee_nft_value = fee_selection.selected_value()?;
        let fee_coins = fee.checked_sub(fee_nft_value)?.min(coin_pot);
        let payout_coins = coin_pot.checked_sub(fee_coins)?;

        let house = self.policy.house_user_id;
        let mut payees = vec![winner, house];
        payees.sort();
        payees.dedup();
        for user_id in payees {
            txn.lock_balance(user_id).await?;
        }

        txn.credit(winner, payout_coins).await?;
        if fee_coins.is_positive() {
            txn.credit(house, fee_coins).await?;
        }
        for nft in &fee_selection.selected {
            txn.transfer_nft(&nft.mint_address, house).await?;
        }
        for nft in &fee_selection.remaining {
            txn.transfer_nft(&nft.mint_address, winner).await?;
        }

        record.status = RoundStatus::Settled;
        record.winner = Some(winner);
        record.settled_at = Some(Utc::now());
        txn.save_round(&record).await?;
        txn.save_seed_pair(round.round_id, &round.seed).await?;

        let payout_value = Money::checked_sum(
            std::iter::once(payout_coins).chain(fee_selection.remaining.iter().map(|nft| nft.price)),
        )?;
        let outcomes = stakes
            .into_iter()
            .map(|(user_id, stake)| {
                let profit = if user_id == winner {
                    payout_value.checked_sub(stake)?
                } else {
                    stake.checked_neg()?
                };
                Ok(WagerOutcome {
                    user_id,
                    bet_amount: stake,
                    profit,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(SettlementReceipt {
            round_id: round.round_id,
            winner,
            outcome,
            pot_value,
            fee,
            fee_coins,
            fee_nfts: fee_selection.selected,
            payout_coins,
            payout_nfts: fee_selection.remaining,
            counts: selection.counts,
            outcomes,
            seed: round.seed.clone(),
            draw: None,
            pipeline: None,
        })
    }

    /// Settle a house game. The escrowed bet goes to the house account and
    /// the house pays `payout` to the player.
    pub async fn settle_house_round(&self, round: &HouseRound) -> Result<HouseSettlement> {
        let span = tracing::info_span!(
            "settle_round",
            round_id = %round.round_id,
            game_type = %round.game_type
        );

        async {
            if round.bet_amount.is_negative() || round.payout.is_negative() {
                return Err(LedgerError::InvalidInput("negative bet or payout".to_string()));
            }
            verify_seed(&round.seed)?;
            let outcome = round.seed.outcome(round.nonce);

            let id = self.sessions.start_session().await?;
            let result = self.apply_house_settlement(id, round).await;
            let wager = match self.sessions.finish(id, result).await {
                Ok(wager) => wager,
                Err(e) => {
                    metrics::counter!("settlement_failures_total").increment(1);
                    tracing::warn!(error = %e, "Settlement rolled back");
                    return Err(e);
                }
            };

            metrics::counter!("rounds_settled_total").increment(1);
            tracing::info!(user_id = %round.user_id, payout = %round.payout, "House round settled");

            let pipeline = self.run_pipeline(&[wager], round.game_type, true).await;
            Ok(HouseSettlement {
                round_id: round.round_id,
                outcome,
                wager,
                seed: round.seed.clone(),
                pipeline,
            })
        }
        .instrument(span)
        .await
    }

    async fn apply_house_settlement(&self, id: SessionId, round: &HouseRound) -> Result<WagerOutcome> {
        let handle = self.sessions.get_session(id)?;
        let mut txn = handle.txn().await;

        let mut record = open_round_for_settlement(
            txn.lock_round(round.round_id).await?,
            round.round_id,
            round.game_type,
            &round.seed,
        )?;
        if record.pot != round.bet_amount {
            return Err(LedgerError::InvalidInput(format!(
                "bet {} but round escrow holds {}",
                round.bet_amount, record.pot
            )));
        }

        let house = self.policy.house_user_id;
        let mut accounts = vec![round.user_id, house];
        accounts.sort();
        accounts.dedup();
        for user_id in accounts {
            txn.lock_balance(user_id).await?;
        }

        // Escrow to the house first so the house can pay out of it
        txn.credit(house, record.pot).await?;
        txn.debit(house, round.payout).await?;
        txn.credit(round.user_id, round.payout).await?;

        record.status = RoundStatus::Settled;
        record.winner = round.payout.is_positive().then_some(round.user_id);
        record.settled_at = Some(Utc::now());
        txn.save_round(&record).await?;
        txn.save_seed_pair(round.round_id, &round.seed).await?;

        Ok(WagerOutcome {
            user_id: round.user_id,
            bet_amount: round.bet_amount,
            profit: round.payout.checked_sub(round.bet_amount)?,
        })
    }

    /// `settle_pot_round`, repeated with exponential backoff while it fails
    /// on contention. The outcome is drawn once and reused by every try.
    pub async fn settle_with_retry(&self, round: &PotRound) -> Result<SettlementReceipt> {
        validate_pot(round)?;
        verify_seed(&round.seed)?;
        let (outcome, draw) = self.draw_outcome(round).await?;

        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.retry_initial_interval)
            .with_max_interval(self.policy.retry_max_interval)
            .with_max_elapsed_time(None)
            .build();
        let max_attempts = self.policy.max_attempts.max(1);
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let draw = &draw;

        backoff::future::retry(backoff, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.settle_drawn(round, outcome, draw.clone()).await {
                Ok(receipt) => Ok(receipt),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(
                        round_id = %round.round_id,
                        attempt,
                        error = %e,
                        "Settlement contended, retrying"
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    /// The seed of a settled round; unsettled rounds keep theirs secret.
    pub async fn revealed_seed(&self, round_id: RoundId) -> Result<SeedPair> {
        let id = self.sessions.start_session().await?;
        let result: Result<SeedPair> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            txn.load_seed_pair(round_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("seed for round {}", round_id)))
        }
        .await;

        // Read only
        if let Err(e) = self.sessions.rollback_session(id).await {
            tracing::warn!(session_id = %id, error = %e, "Rollback failed");
        }
        result
    }

    async fn run_pipeline(
        &self,
        outcomes: &[WagerOutcome],
        game_type: GameType,
        is_house_game: bool,
    ) -> Option<PipelineReport> {
        match self.pipeline.after_wager(outcomes, game_type, is_house_game).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "Wager pipeline rejected settled round");
                None
            }
        }
    }
}
