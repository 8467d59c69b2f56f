//! Redis key generation functions
//!
//! Centralizes the key patterns used for leaderboards and ticket tallies.

use super::super::ranking_store::RankingKind;

/// Sorted set of users scored by last wager time (ms)
const RECENTLY_WAGERED: &str = "recently-wagered";

/// Suffix for the hash of ticket counts beside a leaderboard
const TICKETS_SUFFIX: &str = "-tickets";

/// Sorted set of period totals, e.g. `daily-race-19723`
pub fn ranking_key(kind: RankingKind, period: i64) -> String {
    format!("{}-{}", kind.as_str(), period)
}

/// Hash of user -> tickets for one leaderboard
pub fn tickets_key(kind: RankingKind, period: i64) -> String {
    format!("{}{}", ranking_key(kind, period), TICKETS_SUFFIX)
}

pub fn recently_wagered_key() -> &'static str {
    RECENTLY_WAGERED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_key_format() {
        assert_eq!(ranking_key(RankingKind::DailyRace, 19_723), "daily-race-19723");
        assert_eq!(ranking_key(RankingKind::WeeklyRaffle, 2_818), "weekly-raffle-2818");
    }

    #[test]
    fn test_tickets_key_format() {
        assert_eq!(
            tickets_key(RankingKind::WeeklyRaffle, 2_818),
            "weekly-raffle-2818-tickets"
        );
    }

    #[test]
    fn test_recent_key_is_constant() {
        assert_eq!(recently_wagered_key(), "recently-wagered");
    }
}
