//! Period indices for the daily race and weekly raffle
//!
//! Both are whole numbers counted from the Unix epoch in UTC, so every
//! instance of the service agrees on the current period without
//! coordination.

use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: i64 = 86_400;

/// 1970-01-01 was a Thursday; shifting by three days puts week boundaries
/// on Monday 00:00 UTC.
const EPOCH_WEEKDAY_OFFSET: i64 = 3;

/// Days since 1970-01-01 UTC
pub fn day_index(at: DateTime<Utc>) -> i64 {
    at.timestamp().div_euclid(SECONDS_PER_DAY)
}

/// Weeks since the Monday before the epoch
pub fn week_index(at: DateTime<Utc>) -> i64 {
    (day_index(at) + EPOCH_WEEKDAY_OFFSET).div_euclid(7)
}
