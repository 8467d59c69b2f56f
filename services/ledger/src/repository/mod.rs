//! Storage seams
//!
//! `LedgerStore` owns money, rounds, NFTs and statistics behind row-locked
//! transactions. `RankingStore` owns the leaderboards, which tolerate
//! eventual consistency and never take part in a ledger transaction.

pub mod ledger_store;
pub mod memory_ledger_store;
pub mod memory_ranking_store;
pub mod postgres_ledger_store;
pub mod ranking_store;
pub mod redis_ranking_store;

pub use ledger_store::{LedgerStore, LedgerTxn, OwnedNft};
pub use memory_ledger_store::MemoryLedgerStore;
pub use memory_ranking_store::MemoryRankingStore;
pub use postgres_ledger_store::PostgresLedgerStore;
pub use ranking_store::{RankingEntry, RankingKind, RankingStore, TicketThresholds};
pub use redis_ranking_store::RedisRankingStore;
