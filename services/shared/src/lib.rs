pub mod constants;
pub mod errors;
pub mod money;
pub mod types;

pub use constants::*;
pub use money::Money;
pub use types::*;
