/// Type-safe wrappers for domain primitives
///
/// These types reject malformed values at construction time so the ledger
/// never has to re-check them deep inside a settlement.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(i64),

    #[error("Amount overflow in operation")]
    AmountOverflow,

    #[error("Negative amount: {0}")]
    NegativeAmount(i64),

    #[error("Unknown game type: {0}")]
    UnknownGameType(String),
}

/// Positive user identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct UserId(i64);

impl UserId {
    pub fn new(id: i64) -> Result<Self, ValidationError> {
        if id <= 0 {
            return Err(ValidationError::InvalidUserId(id));
        }
        Ok(Self(id))
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl TryFrom<i64> for UserId {
    type Error = ValidationError;

    fn try_from(id: i64) -> Result<Self, Self::Error> {
        Self::new(id)
    }
}

impl From<UserId> for i64 {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Games that produce wagers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    Coinflip,
    Jackpot,
    GrandJackpot,
    Dreamtower,
    Crash,
}

impl GameType {
    pub const ALL: [GameType; 5] = [
        GameType::Coinflip,
        GameType::Jackpot,
        GameType::GrandJackpot,
        GameType::Dreamtower,
        GameType::Crash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::Coinflip => "coinflip",
            GameType::Jackpot => "jackpot",
            GameType::GrandJackpot => "grand_jackpot",
            GameType::Dreamtower => "dreamtower",
            GameType::Crash => "crash",
        }
    }
}

impl TryFrom<&str> for GameType {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        GameType::ALL
            .into_iter()
            .find(|game| game.as_str() == value)
            .ok_or_else(|| ValidationError::UnknownGameType(value.to_string()))
    }
}

impl std::fmt::Display for GameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_validation() {
        assert!(UserId::new(1).is_ok());
        assert_eq!(UserId::new(0), Err(ValidationError::InvalidUserId(0)));
        assert_eq!(UserId::new(-4), Err(ValidationError::InvalidUserId(-4)));
    }

    #[test]
    fn test_user_id_rejects_zero_when_deserializing() {
        assert!(serde_json::from_str::<UserId>("0").is_err());
        assert_eq!(serde_json::from_str::<UserId>("42").unwrap().as_i64(), 42);
    }

    #[test]
    fn test_game_type_strings() {
        for game in GameType::ALL {
            assert_eq!(GameType::try_from(game.as_str()), Ok(game));
        }
        assert!(GameType::try_from("roulette").is_err());
        assert_eq!(
            serde_json::to_string(&GameType::GrandJackpot).unwrap(),
            "\"grand_jackpot\""
        );
    }
}
