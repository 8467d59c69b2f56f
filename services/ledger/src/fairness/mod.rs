//! Provably fair randomness and winner selection
//!
//! Everything here is pure or owns its own state; nothing touches the
//! ledger store.

mod outcome;
mod random_client;
mod selector;

pub use outcome::*;
pub use random_client::*;
pub use selector::*;
