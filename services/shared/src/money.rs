//! Fixed-point money model
//!
//! Every balance, bet and fee is an `i64` scaled by `10^MONEY_DECIMALS`.
//! Nothing on a monetary path touches floating point: rates are applied in
//! basis points and truncate toward zero.

use serde::{Deserialize, Serialize};

use crate::constants::{BPS_DENOMINATOR, MONEY_SCALE};
use crate::types::ValidationError;

/// Convert a scaled amount to display units, discarding the remainder.
pub fn to_display(value: i64) -> i64 {
    value / MONEY_SCALE
}

/// Convert display units to the scaled domain.
pub fn to_scaled(value: i64) -> Result<i64, ValidationError> {
    value
        .checked_mul(MONEY_SCALE)
        .ok_or(ValidationError::AmountOverflow)
}

/// Scaled integer amount with checked arithmetic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Wrap an already scaled amount.
    pub const fn from_scaled(amount: i64) -> Self {
        Self(amount)
    }

    /// Build from whole display units.
    pub fn from_display(units: i64) -> Result<Self, ValidationError> {
        to_scaled(units).map(Self)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn to_display(&self) -> i64 {
        to_display(self.0)
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(&self, other: Money) -> Result<Self, ValidationError> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    pub fn checked_sub(&self, other: Money) -> Result<Self, ValidationError> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    pub fn checked_neg(&self) -> Result<Self, ValidationError> {
        self.0
            .checked_neg()
            .map(Self)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Apply a basis-point rate, truncating toward zero.
    ///
    /// The product is formed in `i128` so large pots cannot overflow before
    /// the division.
    pub fn apply_bps(&self, bps: u32) -> Result<Self, ValidationError> {
        let scaled = i128::from(self.0) * i128::from(bps) / i128::from(BPS_DENOMINATOR);
        i64::try_from(scaled)
            .map(Self)
            .map_err(|_| ValidationError::AmountOverflow)
    }

    /// Sum an iterator of amounts, failing on overflow.
    pub fn checked_sum<I>(amounts: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = Money>,
    {
        amounts
            .into_iter()
            .try_fold(Money::ZERO, |acc, amount| acc.checked_add(amount))
    }
}

impl From<Money> for i64 {
    fn from(amount: Money) -> Self {
        amount.0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let scale = MONEY_SCALE as u64;
        write!(f, "{}{}.{:05}", sign, abs / scale, abs % scale)
    }
}
