use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::constants::{DAILY_RACE_TICKET_THRESHOLD, WEEKLY_RAFFLE_TICKET_THRESHOLD};
use shared::types::UserId;
use shared::Money;

use crate::errors::{LedgerError, Result};
use crate::periods::{day_index, week_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingKind {
    DailyRace,
    WeeklyRaffle,
}

impl RankingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankingKind::DailyRace => "daily-race",
            RankingKind::WeeklyRaffle => "weekly-raffle",
        }
    }

    /// Period index this kind uses at `at`
    pub fn period_at(&self, at: DateTime<Utc>) -> i64 {
        match self {
            RankingKind::DailyRace => day_index(at),
            RankingKind::WeeklyRaffle => week_index(at),
        }
    }

    /// How long a period's board is kept after its last write
    pub fn retention(&self) -> Duration {
        match self {
            RankingKind::DailyRace => Duration::from_secs(2 * 86_400),
            RankingKind::WeeklyRaffle => Duration::from_secs(14 * 86_400),
        }
    }
}

/// Wager volume needed for one ticket, per ranking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicketThresholds {
    daily_race: Money,
    weekly_raffle: Money,
}

impl TicketThresholds {
    pub fn new(daily_race: Money, weekly_raffle: Money) -> Result<Self> {
        if !daily_race.is_positive() || !weekly_raffle.is_positive() {
            return Err(LedgerError::InvalidInput(
                "ticket thresholds must be positive".to_string(),
            ));
        }
        Ok(Self {
            daily_race,
            weekly_raffle,
        })
    }

    pub fn for_kind(&self, kind: RankingKind) -> Money {
        match kind {
            RankingKind::DailyRace => self.daily_race,
            RankingKind::WeeklyRaffle => self.weekly_raffle,
        }
    }
}

impl Default for TicketThresholds {
    fn default() -> Self {
        Self {
            daily_race: Money::from_scaled(DAILY_RACE_TICKET_THRESHOLD),
            weekly_raffle: Money::from_scaled(WEEKLY_RAFFLE_TICKET_THRESHOLD),
        }
    }
}

/// Tickets issued when a running total moves from `old` to `new`
pub fn tickets_crossed(old: Money, new: Money, threshold: Money) -> u64 {
    let threshold = threshold.as_i64();
    if threshold <= 0 {
        return 0;
    }
    let crossed = new.as_i64().div_euclid(threshold) - old.as_i64().div_euclid(threshold);
    u64::try_from(crossed).unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub user_id: UserId,
    pub wagered: Money,
}

/// Leaderboards for the daily race, the weekly raffle and the
/// recently-wagered feed
#[async_trait]
pub trait RankingStore: Send + Sync {
    /// Add `amount` to the user's total for `period` and return the number
    /// of tickets this increment earned. Atomic per call.
    async fn increment_wager(&self, kind: RankingKind, user_id: UserId, amount: Money, period: i64) -> Result<u64>;

    /// Highest totals first
    async fn top_n(&self, kind: RankingKind, n: usize, period: i64) -> Result<Vec<RankingEntry>>;

    /// 1-based position; `NotFound` when the user has not wagered this period
    async fn rank(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64>;

    async fn tickets(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64>;

    async fn clear_period(&self, kind: RankingKind, period: i64) -> Result<()>;

    async fn record_recent(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()>;

    /// Users who wagered within `window` of `now`, oldest first. Older
    /// entries are dropped.
    async fn recent(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<UserId>>;

    async fn ping(&self) -> Result<()>;
}

pub(crate) fn reject_negative_wager(amount: Money) -> Result<()> {
    if amount.is_negative() {
        return Err(LedgerError::InvalidInput(format!("negative wager: {}", amount)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn m(v: i64) -> Money {
        Money::from_scaled(v)
    }

    #[test]
    fn test_tickets_crossed() {
        assert_eq!(tickets_crossed(m(0), m(99), m(100)), 0);
        assert_eq!(tickets_crossed(m(99), m(100), m(100)), 1);
        assert_eq!(tickets_crossed(m(50), m(350), m(100)), 3);
        assert_eq!(tickets_crossed(m(100), m(199), m(100)), 0);
        assert_eq!(tickets_crossed(m(0), m(500), m(0)), 0);
    }

    #[test]
    fn test_thresholds_validated() {
        assert!(TicketThresholds::new(m(0), m(1)).is_err());
        assert!(TicketThresholds::new(m(1), m(-1)).is_err());
        let thresholds = TicketThresholds::new(m(10), m(20)).unwrap();
        assert_eq!(thresholds.for_kind(RankingKind::DailyRace), m(10));
        assert_eq!(thresholds.for_kind(RankingKind::WeeklyRaffle), m(20));
    }

    #[test]
    fn test_period_selection() {
        let at = Utc.with_ymd_and_hms(2024, 1, 3, 8, 0, 0).unwrap();
        assert_eq!(RankingKind::DailyRace.period_at(at), day_index(at));
        assert_eq!(RankingKind::WeeklyRaffle.period_at(at), week_index(at));
    }
}
