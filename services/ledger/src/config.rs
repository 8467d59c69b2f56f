use anyhow::Context;
use serde::Deserialize;
use shared::constants::{
    DAILY_RACE_TICKET_THRESHOLD, DEFAULT_HOUSE_FEE_BPS, DEFAULT_RANDOM_REQUEST_ID_MODULUS,
    MAX_SETTLEMENT_RETRIES, RECENT_WAGER_WINDOW_SECS, WEEKLY_RAFFLE_TICKET_THRESHOLD,
};
use shared::money::to_display;
use shared::types::UserId;
use shared::Money;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::repository::TicketThresholds;
use crate::settlement::SettlementPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_port: u16,
    pub metrics_port: u16,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub sessions: SessionConfig,
    pub settlement: SettlementConfig,
    pub rankings: RankingConfig,
    pub random: RandomConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_ms: u64,
    pub lock_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub max_age_seconds: u64,
    pub reap_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    pub house_fee_bps: u32,
    pub house_user_id: i64,
    pub max_retries: u32,
}

/// Thresholds are in display units
#[derive(Debug, Clone, Deserialize)]
pub struct RankingConfig {
    pub daily_race_ticket_threshold: i64,
    pub weekly_raffle_ticket_threshold: i64,
    pub recent_window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RandomConfig {
    pub request_id_modulus: u64,
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} has an invalid value {:?}", name, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; `load` uses the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let config = Config {
            api_port: parse_or(&lookup, "API_PORT", 3001)?,
            metrics_port: parse_or(&lookup, "METRICS_PORT", 9090)?,
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").context("DATABASE_URL must be set")?,
                pool_size: parse_or(&lookup, "DATABASE_POOL_SIZE", 20)?,
                acquire_timeout_ms: parse_or(&lookup, "DATABASE_ACQUIRE_TIMEOUT_MS", 3_000)?,
                lock_timeout_ms: parse_or(&lookup, "LOCK_TIMEOUT_MS", 5_000)?,
            },
            redis: RedisConfig {
                url: lookup("REDIS_URL").unwrap_or_else(|| "redis://localhost:6379".to_string()),
            },
            sessions: SessionConfig {
                max_age_seconds: parse_or(&lookup, "SESSION_MAX_AGE_SECONDS", 60)?,
                reap_interval_seconds: parse_or(&lookup, "SESSION_REAP_INTERVAL_SECONDS", 15)?,
            },
            settlement: SettlementConfig {
                house_fee_bps: parse_or(&lookup, "HOUSE_FEE_BPS", DEFAULT_HOUSE_FEE_BPS)?,
                house_user_id: parse_or(&lookup, "HOUSE_USER_ID", 1)?,
                max_retries: parse_or(&lookup, "SETTLEMENT_MAX_RETRIES", MAX_SETTLEMENT_RETRIES)?,
            },
            rankings: RankingConfig {
                daily_race_ticket_threshold: parse_or(
                    &lookup,
                    "DAILY_RACE_TICKET_THRESHOLD",
                    to_display(DAILY_RACE_TICKET_THRESHOLD),
                )?,
                weekly_raffle_ticket_threshold: parse_or(
                    &lookup,
                    "WEEKLY_RAFFLE_TICKET_THRESHOLD",
                    to_display(WEEKLY_RAFFLE_TICKET_THRESHOLD),
                )?,
                recent_window_seconds: parse_or(
                    &lookup,
                    "RECENT_WAGER_WINDOW_SECONDS",
                    RECENT_WAGER_WINDOW_SECS as u64,
                )?,
            },
            random: RandomConfig {
                request_id_modulus: parse_or(
                    &lookup,
                    "RANDOM_REQUEST_ID_MODULUS",
                    DEFAULT_RANDOM_REQUEST_ID_MODULUS,
                )?,
            },
        };

        // Fail at startup rather than at the first settlement
        config.settlement_policy()?;
        config.ticket_thresholds()?;
        if config.random.request_id_modulus == 0 {
            anyhow::bail!("RANDOM_REQUEST_ID_MODULUS must be positive");
        }

        Ok(config)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.database.lock_timeout_ms)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.sessions.max_age_seconds)
    }

    pub fn recent_window(&self) -> Duration {
        Duration::from_secs(self.rankings.recent_window_seconds)
    }

    pub fn settlement_policy(&self) -> anyhow::Result<SettlementPolicy> {
        let house = UserId::new(self.settlement.house_user_id).context("HOUSE_USER_ID must be positive")?;
        Ok(SettlementPolicy::new(self.settlement.house_fee_bps, house)?.with_retries(self.settlement.max_retries))
    }

    pub fn ticket_thresholds(&self) -> anyhow::Result<TicketThresholds> {
        let daily = Money::from_display(self.rankings.daily_race_ticket_threshold)
            .context("DAILY_RACE_TICKET_THRESHOLD out of range")?;
        let weekly = Money::from_display(self.rankings.weekly_raffle_ticket_threshold)
            .context("WEEKLY_RAFFLE_TICKET_THRESHOLD out of range")?;
        Ok(TicketThresholds::new(daily, weekly)?)
    }
}
