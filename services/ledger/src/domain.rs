use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::types::{GameType, UserId, ValidationError};
use shared::Money;
use uuid::Uuid;

use crate::fairness::SeedCommitment;

pub type RoundId = Uuid;

/// Priced NFT used as bet or fee material
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NftAsset {
    pub mint_address: String,
    pub price: Money,
}

impl NftAsset {
    pub fn new(mint_address: impl Into<String>, price: Money) -> Self {
        Self {
            mint_address: mint_address.into(),
            price,
        }
    }
}

/// One player's result in a settled round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WagerOutcome {
    pub user_id: UserId,
    pub bet_amount: Money,
    /// Net result; zero or negative is a loss
    pub profit: Money,
}

impl WagerOutcome {
    pub fn is_win(&self) -> bool {
        self.profit.is_positive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    Open,
    Settled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Open => "open",
            RoundStatus::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(RoundStatus::Open),
            "settled" => Some(RoundStatus::Settled),
            _ => None,
        }
    }
}

/// Row that serializes bet placement and settlement for one round
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub round_id: RoundId,
    pub game_type: GameType,
    pub status: RoundStatus,
    /// Coins collected from bets placed through the ledger
    pub pot: Money,
    /// Seed commitment published before the first bet
    pub commitment: SeedCommitment,
    pub winner: Option<UserId>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl RoundRecord {
    pub fn open(round_id: RoundId, game_type: GameType, commitment: SeedCommitment) -> Self {
        Self {
            round_id,
            game_type,
            status: RoundStatus::Open,
            pot: Money::ZERO,
            commitment,
            winner: None,
            settled_at: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status == RoundStatus::Settled
    }
}

/// Per-game breakdown inside [`Statistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameStatistics {
    pub rounds: i64,
    pub wins: i64,
    pub losses: i64,
    pub wagered: Money,
    pub profit: Money,
    pub loss: Money,
}

/// Cumulative per-user wager statistics
///
/// Invariants kept by [`Statistics::record`]:
/// `total_profit == total_win - total_loss`, and at most one of
/// `win_streaks` / `lose_streaks` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub user_id: UserId,
    pub total_wagered: Money,
    pub total_win: Money,
    pub total_loss: Money,
    pub total_profit: Money,
    pub win_streaks: i32,
    pub lose_streaks: i32,
    pub best_streak: i32,
    pub worst_streak: i32,
    pub max_profit: Money,
    pub games: BTreeMap<GameType, GameStatistics>,
}

impl Statistics {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_wagered: Money::ZERO,
            total_win: Money::ZERO,
            total_loss: Money::ZERO,
            total_profit: Money::ZERO,
            win_streaks: 0,
            lose_streaks: 0,
            best_streak: 0,
            worst_streak: 0,
            max_profit: Money::ZERO,
            games: BTreeMap::new(),
        }
    }

    /// Fold one settled wager into the counters.
    pub fn record(&mut self, game_type: GameType, outcome: &WagerOutcome) -> Result<(), ValidationError> {
        if outcome.bet_amount.is_negative() {
            return Err(ValidationError::NegativeAmount(outcome.bet_amount.as_i64()));
        }

        let game = self.games.entry(game_type).or_default();
        game.rounds += 1;
        game.wagered = game.wagered.checked_add(outcome.bet_amount)?;
        self.total_wagered = self.total_wagered.checked_add(outcome.bet_amount)?;

        if outcome.is_win() {
            let profit = outcome.profit;
            game.wins += 1;
            game.profit = game.profit.checked_add(profit)?;

            self.total_win = self.total_win.checked_add(profit)?;
            self.total_profit = self.total_profit.checked_add(profit)?;
            self.win_streaks = self.win_streaks.saturating_add(1);
            self.lose_streaks = 0;
            self.best_streak = self.best_streak.max(self.win_streaks);
            self.max_profit = self.max_profit.max(profit);
        } else {
            let loss = outcome.profit.checked_neg()?;
            game.losses += 1;
            game.loss = game.loss.checked_add(loss)?;

            self.total_loss = self.total_loss.checked_add(loss)?;
            self.total_profit = self.total_profit.checked_sub(loss)?;
            self.lose_streaks = self.lose_streaks.saturating_add(1);
            self.win_streaks = 0;
            self.worst_streak = self.worst_streak.max(self.lose_streaks);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(bet: i64, profit: i64) -> WagerOutcome {
        WagerOutcome {
            user_id: UserId::new(7).unwrap(),
            bet_amount: Money::from_scaled(bet),
            profit: Money::from_scaled(profit),
        }
    }

    #[test]
    fn test_win_then_loss_streaks() {
        let mut stats = Statistics::new(UserId::new(7).unwrap());

        stats.record(GameType::Coinflip, &outcome(100, 90)).unwrap();
        stats.record(GameType::Coinflip, &outcome(100, 150)).unwrap();
        assert_eq!(stats.win_streaks, 2);
        assert_eq!(stats.best_streak, 2);
        assert_eq!(stats.max_profit.as_i64(), 150);

        stats.record(GameType::Jackpot, &outcome(50, -50)).unwrap();
        assert_eq!(stats.win_streaks, 0);
        assert_eq!(stats.lose_streaks, 1);
        assert_eq!(stats.worst_streak, 1);
        assert_eq!(stats.best_streak, 2);

        assert_eq!(stats.total_wagered.as_i64(), 250);
        assert_eq!(stats.total_win.as_i64(), 240);
        assert_eq!(stats.total_loss.as_i64(), 50);
        assert_eq!(stats.total_profit.as_i64(), 190);
    }

    #[test]
    fn test_zero_profit_counts_as_loss() {
        let mut stats = Statistics::new(UserId::new(7).unwrap());
        stats.record(GameType::Crash, &outcome(100, 0)).unwrap();

        let crash = stats.games[&GameType::Crash];
        assert_eq!(crash.losses, 1);
        assert_eq!(crash.wins, 0);
        assert_eq!(stats.lose_streaks, 1);
        assert_eq!(stats.total_loss, Money::ZERO);
    }

    #[test]
    fn test_per_game_breakdown() {
        let mut stats = Statistics::new(UserId::new(7).unwrap());
        stats.record(GameType::Dreamtower, &outcome(10, 20)).unwrap();
        stats.record(GameType::Dreamtower, &outcome(10, -10)).unwrap();
        stats.record(GameType::Crash, &outcome(5, -5)).unwrap();

        let tower = stats.games[&GameType::Dreamtower];
        assert_eq!(tower.rounds, 2);
        assert_eq!(tower.wins, 1);
        assert_eq!(tower.losses, 1);
        assert_eq!(tower.wagered.as_i64(), 20);
        assert_eq!(tower.profit.as_i64(), 20);
        assert_eq!(tower.loss.as_i64(), 10);
        assert_eq!(stats.games[&GameType::Crash].rounds, 1);
    }

    #[test]
    fn test_profit_invariant_over_sequence() {
        let mut stats = Statistics::new(UserId::new(7).unwrap());
        let results = [30, -10, -10, 0, 5, 70, -100, 1, -3];
        for (i, profit) in results.into_iter().enumerate() {
            stats
                .record(GameType::ALL[i % GameType::ALL.len()], &outcome(25, profit))
                .unwrap();
            assert_eq!(
                stats.total_profit.as_i64(),
                stats.total_win.as_i64() - stats.total_loss.as_i64()
            );
            assert!(stats.win_streaks == 0 || stats.lose_streaks == 0);
        }
        assert_eq!(stats.worst_streak, 3);
    }

    #[test]
    fn test_negative_bet_rejected() {
        let mut stats = Statistics::new(UserId::new(7).unwrap());
        assert!(stats.record(GameType::Crash, &outcome(-1, 0)).is_err());
        assert_eq!(stats.games.len(), 0);
    }
}
