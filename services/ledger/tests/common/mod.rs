//! Common test utilities and fixtures for integration tests
#![allow(dead_code)]

use std::sync::Arc;

use ledger::config::Config;
use ledger::repository::{LedgerStore, MemoryLedgerStore, MemoryRankingStore, RankingStore};
use ledger::settlement::{PotEntry, PotRound};
use ledger::state::AppState;
use ledger::fairness::SeedPair;
use shared::types::{GameType, UserId};
use shared::Money;
use uuid::Uuid;

pub const HOUSE: i64 = 1;

/// Ledger wired over the in-memory stores
pub struct TestContext {
    pub store: MemoryLedgerStore,
    pub rankings: Arc<MemoryRankingStore>,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_vars(&[])
    }

    /// Build with extra configuration variables on top of the test defaults
    pub fn with_vars(vars: &[(&str, &str)]) -> Self {
        let config = test_config(vars);
        let store = MemoryLedgerStore::new(config.lock_timeout());
        let rankings = Arc::new(MemoryRankingStore::new(
            config.ticket_thresholds().expect("Invalid test thresholds"),
        ));

        let state = AppState::new(
            config,
            Arc::new(store.clone()) as Arc<dyn LedgerStore>,
            rankings.clone() as Arc<dyn RankingStore>,
            None,
        )
        .expect("Failed to build app state");

        Self {
            store,
            rankings,
            state,
        }
    }

    pub async fn deposit(&self, user_id: i64, amount: i64) {
        self.state
            .accounts
            .deposit(user(user_id), money(amount))
            .await
            .expect("Deposit failed");
    }

    /// Open a jackpot round and escrow each player's coins
    pub async fn staked_jackpot(&self, stakes: &[(i64, i64)]) -> PotRound {
        let round_id = Uuid::new_v4();
        let seed = SeedPair::generate(format!("client-{}", round_id));
        self.state
            .settler
            .open_round(round_id, GameType::Jackpot, &seed.commitment())
            .await
            .expect("Failed to open round");

        for &(user_id, amount) in stakes {
            self.state
                .settler
                .place_bet(round_id, user(user_id), money(amount))
                .await
                .expect("Failed to place bet");
        }

        PotRound {
            round_id,
            game_type: GameType::Jackpot,
            is_house_game: false,
            seed,
            nonce: 0,
            entries: stakes
                .iter()
                .map(|&(user_id, amount)| PotEntry {
                    user_id: user(user_id),
                    coins: money(amount),
                    nfts: Vec::new(),
                })
                .collect(),
        }
    }

    /// Sum of committed balances over the given users
    pub fn total_balance(&self, users: &[i64]) -> i64 {
        users
            .iter()
            .map(|&id| self.store.balance(user(id)).as_i64())
            .sum()
    }
}

pub fn test_config(vars: &[(&str, &str)]) -> Config {
    let mut all: Vec<(String, String)> = vec![
        ("DATABASE_URL".to_string(), "postgres://localhost/ledger_test".to_string()),
        ("LOCK_TIMEOUT_MS".to_string(), "200".to_string()),
        ("HOUSE_USER_ID".to_string(), HOUSE.to_string()),
    ];
    all.extend(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())));

    Config::from_lookup(|name: &str| {
        all.iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    })
    .expect("Invalid test configuration")
}

pub fn user(id: i64) -> UserId {
    UserId::new(id).expect("Invalid user id")
}

pub fn money(amount: i64) -> Money {
    Money::from_scaled(amount)
}
