//! Redis-based RankingStore implementation
//!
//! Leaderboards are sorted sets scored by scaled wager totals, with ticket
//! counts in a hash beside each board. Increment-and-issue runs as one Lua
//! script so concurrent wagers never double-issue a ticket.

mod keys;
mod lua_scripts;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use shared::types::UserId;
use shared::Money;

use super::ranking_store::{
    reject_negative_wager, RankingEntry, RankingKind, RankingStore, TicketThresholds,
};
use crate::errors::{LedgerError, Result};

pub use keys::*;
pub use lua_scripts::*;

pub struct RedisRankingStore {
    redis: ConnectionManager,
    thresholds: TicketThresholds,
}

impl RedisRankingStore {
    pub fn new(redis: ConnectionManager, thresholds: TicketThresholds) -> Self {
        Self { redis, thresholds }
    }
}

fn parse_member(member: &str) -> Result<UserId> {
    let id: i64 = member
        .parse()
        .map_err(|_| LedgerError::Internal(anyhow::anyhow!("malformed ranking member {:?}", member)))?;
    Ok(UserId::new(id)?)
}

#[async_trait]
impl RankingStore for RedisRankingStore {
    async fn increment_wager(&self, kind: RankingKind, user_id: UserId, amount: Money, period: i64) -> Result<u64> {
        reject_negative_wager(amount)?;
        if amount == Money::ZERO {
            return Ok(0);
        }

        let mut redis_conn = self.redis.clone();
        let script = Script::new(INCREMENT_WAGER_SCRIPT);
        let issued: i64 = script
            .key(ranking_key(kind, period))
            .key(tickets_key(kind, period))
            .arg(user_id.as_i64())
            .arg(amount.as_i64())
            .arg(self.thresholds.for_kind(kind).as_i64())
            .arg(kind.retention().as_secs())
            .invoke_async(&mut redis_conn)
            .await?;

        Ok(u64::try_from(issued).unwrap_or(0))
    }

    async fn top_n(&self, kind: RankingKind, n: usize, period: i64) -> Result<Vec<RankingEntry>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut redis_conn = self.redis.clone();
        let stop = isize::try_from(n).unwrap_or(isize::MAX) - 1;
        let entries: Vec<(String, f64)> = redis_conn
            .zrevrange_withscores(ranking_key(kind, period), 0, stop)
            .await?;

        entries
            .into_iter()
            .map(|(member, score)| {
                Ok(RankingEntry {
                    user_id: parse_member(&member)?,
                    // Integral totals stay exact below 2^53
                    wagered: Money::from_scaled(score.round() as i64),
                })
            })
            .collect()
    }

    async fn rank(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64> {
        let mut redis_conn = self.redis.clone();
        let position: Option<u64> = redis_conn
            .zrevrank(ranking_key(kind, period), user_id.as_i64())
            .await?;

        position
            .map(|index| index + 1)
            .ok_or_else(|| LedgerError::NotFound(format!("user {} in {} {}", user_id, kind.as_str(), period)))
    }

    async fn tickets(&self, kind: RankingKind, user_id: UserId, period: i64) -> Result<u64> {
        let mut redis_conn = self.redis.clone();
        let tickets: Option<u64> = redis_conn
            .hget(tickets_key(kind, period), user_id.as_i64())
            .await?;
        Ok(tickets.unwrap_or(0))
    }

    async fn clear_period(&self, kind: RankingKind, period: i64) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: () = redis_conn
            .del(vec![ranking_key(kind, period), tickets_key(kind, period)])
            .await?;
        Ok(())
    }

    async fn record_recent(&self, user_id: UserId, at: DateTime<Utc>) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: () = redis_conn
            .zadd(recently_wagered_key(), user_id.as_i64(), at.timestamp_millis())
            .await?;
        Ok(())
    }

    async fn recent(&self, window: Duration, now: DateTime<Utc>) -> Result<Vec<UserId>> {
        let window_ms = i64::try_from(window.as_millis())
            .map_err(|_| LedgerError::InvalidInput("recent window out of range".to_string()))?;
        let cutoff_ms = now.timestamp_millis().saturating_sub(window_ms);

        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.zrembyscore(recently_wagered_key(), "-inf", format!("({}", cutoff_ms))
            .ignore();
        pipe.zrangebyscore(recently_wagered_key(), cutoff_ms, "+inf");

        let mut redis_conn = self.redis.clone();
        let (members,): (Vec<String>,) = pipe.query_async(&mut redis_conn).await?;

        members.iter().map(String::as_str).map(parse_member).collect()
    }

    async fn ping(&self) -> Result<()> {
        let mut redis_conn = self.redis.clone();
        let _: Option<String> = redis_conn.get("_health_check").await?;
        Ok(())
    }
}
