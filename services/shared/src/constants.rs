/// Shared constants for the casino ledger
///
/// This module centralizes magic numbers used by the ledger service and
/// anything that reads its persisted state.

/// Number of decimal places in every stored balance.
///
/// Balances are integers scaled by `10^MONEY_DECIMALS`. Display units are
/// obtained by integer division only at I/O boundaries.
pub const MONEY_DECIMALS: u32 = 5;

/// `10^MONEY_DECIMALS`, precomputed.
pub const MONEY_SCALE: i64 = 100_000;

/// Denominator for rates expressed in basis points.
pub const BPS_DENOMINATOR: i64 = 10_000;

/// Default house fee taken from peer-vs-peer pots (5%).
pub const DEFAULT_HOUSE_FEE_BPS: u32 = 500;

/// Maximum house fee accepted from configuration (50%).
pub const MAX_HOUSE_FEE_BPS: u32 = 5_000;

/// Request ids sent to the signed-random provider wrap at this value.
pub const DEFAULT_RANDOM_REQUEST_ID_MODULUS: u64 = 1_000_000_000;

/// Length in bytes of a freshly generated server seed.
pub const SERVER_SEED_BYTES: usize = 32;

/// Maximum retries of a contended settlement, not counting the first try
pub const MAX_SETTLEMENT_RETRIES: u32 = 5;

/// Most NFTs one pot may hold. The fee subset search is exponential in
/// this and runs while the pot's rows are locked.
pub const MAX_POT_NFTS: usize = 16;

/// Window used by the "recently wagered" ranking (10 minutes).
pub const RECENT_WAGER_WINDOW_SECS: i64 = 600;

/// Daily race tickets are issued per this much wagered (100 display units).
pub const DAILY_RACE_TICKET_THRESHOLD: i64 = 100 * MONEY_SCALE;

/// Weekly raffle tickets are issued per this much wagered (50 display units).
pub const WEEKLY_RAFFLE_TICKET_THRESHOLD: i64 = 50 * MONEY_SCALE;
