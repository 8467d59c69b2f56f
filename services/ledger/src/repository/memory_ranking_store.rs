use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use shared::types::UserId;
use shared::Money;

use super::ranking_store::{
    reject_negative_wager, tickets_crossed, RankingEntry, RankingKind, RankingStore, TicketThresholds,
};
use crate::errors::{LedgerError, Result};

type Board = (RankingKind, i64);

#[derive(Default)]
struct Boards {
    scores: HashMap<Board, HashMap<UserId, Money>>,
    tickets: HashMap<Board, HashMap<UserId, u64>>,
    recent: HashMap<UserId, DateTime<Utc>>,
}

/// RankingStore kept in process memory
pub struct MemoryRankingStore {
    boards: Mutex<Boards>,
    thresholds: TicketThresholds,
}

impl MemoryRankingStore {
    pub fn new(thresholds: TicketThresholds) -> Self {
        Self {
            boards: Mutex::new(Boards::default()),
            thresholds,
        }
    }

    /// Highest total first; equal totals by descending user id
    fn ordered(&self, board: Board) -> Vec<RankingEntry> {
        let boards = self.boards.lock();
        let mut entries: Vec<RankingEntry> = boards
            .scores
            .get(&board)
            .map(|scores| {
                scores
                    .iter()
                    .map(|(user_id, wagered)| RankingEntry {
                        user_id: *user_id,
                        wagered: *wagered,
                    })
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| b.wagered.cmp(&a.wagered).then_with(|| b.user_id.cmp(&a.user_id)));
        entries
    }
}

#[async_trait]
impl RankingStore for MemoryRankingStore {
    async fn increment_wager(&self, kind: RankingKind, user_id: UserId, amount: Money, period: i64) -> Result<u64> {
        reject_negative_wager(amount)?;

        let mut boards = self.boards.lock();
        let total = boards
            .scores
            .entry((kind, period))
            .or_default()
            .entry(user_id)
            .or_insert(Money::ZERO);
        let old = *total;
        *total = old.checked_add(amount)?;
        let issued = tickets_crossed(old, *total, self.thresholds.for_kind(kind));

        if issued > 0 {
            *boards
                .tickets
                .entry((kind, period))
                .or_default()
                .entry(user_id)
                .or_insert(0) += issued;
        }
        Ok(issued)
    }

    async fn top_n(&self, kind: RankingKind, n: usize, period: i64) -> Result<Vec<RankingEntry>> {
        let mut entries = self.ordered((kind, period));
        entries.truncate(n);
        Ok(entries)
    }

    async fn rank(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64> {
        self.ordered((kind, period))
            .iter()
            .position(|entry| entry.user_id == user_id)
            .map(|index| index as u64 + 1)
            .ok_or_else(|| LedgerError::NotFound(format!("user {} in {} {}", user_id, kind.as_str(), period)))
    }

    async fn tickets(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64> {
        let boards = self.boards.lock();
        Ok(boards
            .tickets
            .get(&(kind, period))
            .and_then(|tickets| tickets.get(&user_id))
            .copied()
            .unwrap_or(0))
    }

    async fn clear_period(&self, kind: RankingKind, period: i64) -> Result<()> {
        let mut boards = self.boards.lock();
        boards.scores.remove(&(kind, period));
        boards.tickets.remove(&(kind, period));
        Ok(())
    }

    async fn record_recent(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        self.boards.lock().recent.insert(user_id, at);
        Ok(())
    }

    async fn recent(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<UserId>> {
        let window = chrono::Duration::from_std(window)
            .map_err(|_| LedgerError::InvalidInput("recent window out of range".to_string()))?;
        let cutoff = now - window;

        let mut boards = self.boards.lock();
        boards.recent.retain(|_, at| *at >= cutoff);

        let mut users: Vec<(DateTime<Utc>, UserId)> =
            boards.recent.iter().map(|(user_id, at)| (*at, *user_id)).collect();
        users.sort();
        Ok(users.into_iter().map(|(_, user_id)| user_id).collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
