//! After-wager pipeline
//!
//! Runs once per settled round. The money has already moved, so nothing
//! here may fail the caller: each step logs its own failures and the
//! report says what happened.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use shared::types::GameType;

use crate::domain::WagerOutcome;
use crate::errors::{LedgerError, Result};
use crate::repository::{RankingKind, RankingStore};
use crate::session::SessionAggregator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub statistics_updated: usize,
    pub statistics_failed: usize,
    pub recent_recorded: usize,
    pub recent_failed: usize,
    pub ranking_updates: usize,
    pub ranking_failed: usize,
    pub tickets_issued: u64,
}

impl PipelineReport {
    pub fn failures(&self) -> usize {
        self.statistics_failed + self.recent_failed + self.ranking_failed
    }
}

#[derive(Default)]
struct StepTally {
    ok: usize,
    failed: usize,
    tickets: u64,
}

pub struct WagerPipeline {
    sessions: Arc<SessionAggregator>,
    rankings: Arc<dyn RankingStore>,
}

fn log_step_failure(step: &'static str, outcome: &WagerOutcome, e: &LedgerError) {
    metrics::counter!("wager_pipeline_failures_total", "step" => step).increment(1);
    tracing::error!(
        step,
        user_id = %outcome.user_id,
        amount = %outcome.bet_amount,
        error = %e,
        "Wager pipeline step failed"
    );
}

impl WagerPipeline {
    pub fn new(sessions: Arc<SessionAggregator>, rankings: Arc<dyn RankingStore>) -> Self {
        Self { sessions, rankings }
    }

    pub async fn after_wager(
        &self,
        players: &[WagerOutcome],
        game_type: GameType,
        is_house_game: bool,
    ) -> Result<PipelineReport> {
        self.after_wager_at(players, game_type, is_house_game, Utc::now()).await
    }

    /// `after_wager` with an explicit clock for the recent feed and the
    /// ranking periods.
    pub async fn after_wager_at(
        &self,
        players: &[WagerOutcome],
        game_type: GameType,
        is_house_game: bool,
        now: DateTime<Utc>,
    ) -> Result<PipelineReport> {
        if let Some(bad) = players.iter().find(|p| p.bet_amount.is_negative()) {
            return Err(LedgerError::InvalidInput(format!(
                "negative bet {} for user {}",
                bad.bet_amount, bad.user_id
            )));
        }

        let (statistics, recent, rankings) = tokio::join!(
            self.update_statistics(players, game_type),
            self.record_recent(players, now),
            self.update_rankings(players, is_house_game, now),
        );

        let report = PipelineReport {
            statistics_updated: statistics.ok,
            statistics_failed: statistics.failed,
            recent_recorded: recent.ok,
            recent_failed: recent.failed,
            ranking_updates: rankings.ok,
            ranking_failed: rankings.failed,
            tickets_issued: rankings.tickets,
        };

        tracing::debug!(
            game_type = %game_type,
            players = players.len(),
            failures = report.failures(),
            tickets = report.tickets_issued,
            "Wager pipeline finished"
        );

        Ok(report)
    }

    async fn update_statistics(&self, players: &[WagerOutcome], game_type: GameType) -> StepTally {
        let results = join_all(players.iter().map(|p| self.record_statistics(p, game_type))).await;

        let mut tally = StepTally::default();
        for (outcome, result) in players.iter().zip(results) {
            match result {
                Ok(()) => tally.ok += 1,
                Err(e) => {
                    tally.failed += 1;
                    log_step_failure("statistics", outcome, &e);
                }
            }
        }
        tally
    }

    async fn record_statistics(&self, outcome: &WagerOutcome, game_type: GameType) -> Result<()> {
        let id = self.sessions.start_session().await?;
        let result: Result<()> = async {
            let handle = self.sessions.get_session(id)?;
            let mut txn = handle.txn().await;
            let mut stats = txn.lock_statistics(outcome.user_id).await?;
            stats.record(game_type, outcome)?;
            txn.save_statistics(&stats).await
        }
        .await;
        self.sessions.finish(id, result).await
    }

    async fn record_recent(&self, players: &[WagerOutcome], now: DateTime<Utc>) -> StepTally {
        let mut tally = StepTally::default();
        for outcome in players {
            match self.rankings.record_recent(outcome.user_id, now).await {
                Ok(()) => tally.ok += 1,
                Err(e) => {
                    tally.failed += 1;
                    log_step_failure("recent", outcome, &e);
                }
            }
        }
        tally
    }

    async fn update_rankings(&self, players: &[WagerOutcome], is_house_game: bool, now: DateTime<Utc>) -> StepTally {
        let mut tally = StepTally::default();
        if !is_house_game {
            return tally;
        }

        for outcome in players {
            for (kind, step) in [
                (RankingKind::DailyRace, "daily_race"),
                (RankingKind::WeeklyRaffle, "weekly_raffle"),
            ] {
                let period = kind.period_at(now);
                match self
                    .rankings
                    .increment_wager(kind, outcome.user_id, outcome.bet_amount, period)
                    .await
                {
                    Ok(tickets) => {
                        tally.ok += 1;
                        tally.tickets += tickets;
                        if tickets > 0 {
                            metrics::counter!("raffle_tickets_issued_total", "kind" => kind.as_str())
                                .increment(tickets);
                        }
                    }
                    Err(e) => {
                        tally.failed += 1;
                        log_step_failure(step, outcome, &e);
                    }
                }
            }
        }
        tally
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{LedgerStore, MemoryLedgerStore, MemoryRankingStore, TicketThresholds};
    use shared::types::UserId;
    use shared::Money;
    use std::time::Duration;

    fn user(id: i64) -> UserId {
        UserId::new(id).unwrap()
    }

    fn wager(id: i64, bet: i64, profit: i64) -> WagerOutcome {
        WagerOutcome {
            user_id: user(id),
            bet_amount: Money::from_scaled(bet),
            profit: Money::from_scaled(profit),
        }
    }

    fn setup() -> (MemoryLedgerStore, Arc<MemoryRankingStore>, WagerPipeline) {
        let store = MemoryLedgerStore::new(Duration::from_millis(200));
        let sessions = Arc::new(SessionAggregator::new(Arc::new(store.clone())));
        let thresholds = TicketThresholds::new(Money::from_scaled(100), Money::from_scaled(50)).unwrap();
        let rankings = Arc::new(MemoryRankingStore::new(thresholds));
        let pipeline = WagerPipeline::new(sessions, rankings.clone());
        (store, rankings, pipeline)
    }

    #[tokio::test]
    async fn test_updates_statistics_for_every_player() {
        let (store, _rankings, pipeline) = setup();
        let players = [wager(1, 100, 90), wager(2, 100, -100)];

        let report = pipeline.after_wager(&players, GameType::Jackpot, false).await.unwrap();
        assert_eq!(report.statistics_updated, 2);
        assert_eq!(report.failures(), 0);

        let winner = store.statistics(user(1)).unwrap();
        assert_eq!(winner.total_win, Money::from_scaled(90));
        assert_eq!(winner.win_streaks, 1);

        let loser = store.statistics(user(2)).unwrap();
        assert_eq!(loser.total_loss, Money::from_scaled(100));
        assert_eq!(loser.lose_streaks, 1);
        assert_eq!(loser.games[&GameType::Jackpot].losses, 1);
    }

    #[tokio::test]
    async fn test_rankings_only_for_house_games() {
        let (_store, rankings, pipeline) = setup();
        let now = Utc::now();
        let players = [wager(1, 120, -120)];

        let report = pipeline
            .after_wager_at(&players, GameType::Jackpot, false, now)
            .await
            .unwrap();
        assert_eq!(report.ranking_updates, 0);
        let day = RankingKind::DailyRace.period_at(now);
        assert!(rankings.top_n(RankingKind::DailyRace, 10, day).await.unwrap().is_empty());

        let report = pipeline
            .after_wager_at(&players, GameType::Crash, true, now)
            .await
            .unwrap();
        assert_eq!(report.ranking_updates, 2);
        // 120 crosses one daily (100) and two weekly (50) thresholds
        assert_eq!(report.tickets_issued, 3);
        assert_eq!(rankings.rank(RankingKind::DailyRace, user(1), day).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recent_feed_updated() {
        let (_store, rankings, pipeline) = setup();
        let now = Utc::now();
        pipeline
            .after_wager_at(&[wager(4, 10, 5)], GameType::Coinflip, false, now)
            .await
            .unwrap();
        let recent = rankings.recent(Duration::from_secs(60), now).await.unwrap();
        assert_eq!(recent, vec![user(4)]);
    }

    #[tokio::test]
    async fn test_negative_bet_rejected_before_any_step() {
        let (store, _rankings, pipeline) = setup();
        let result = pipeline
            .after_wager(&[wager(1, 10, 5), wager(2, -1, 0)], GameType::Coinflip, true)
            .await;
        assert!(matches!(result, Err(LedgerError::InvalidInput(_))));
        assert!(store.statistics(user(1)).is_none());
    }

    #[tokio::test]
    async fn test_step_failure_is_reported_not_propagated() {
        let (store, _rankings, pipeline) = setup();

        // Hold user 1's statistics row so the pipeline's lock wait times out
        let mut blocker = store.begin().await.unwrap();
        blocker.lock_statistics(user(1)).await.unwrap();

        let report = pipeline
            .after_wager(&[wager(1, 10, 5), wager(2, 10, -10)], GameType::Dreamtower, false)
            .await
            .unwrap();
        assert_eq!(report.statistics_failed, 1);
        assert_eq!(report.statistics_updated, 1);
        assert_eq!(report.recent_recorded, 2);
        drop(blocker);

        assert!(store.statistics(user(1)).is_none());
        assert!(store.statistics(user(2)).is_some());
    }
}
