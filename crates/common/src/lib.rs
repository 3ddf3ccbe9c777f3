//! Shared building blocks for the Trickle faucet: coin amounts, duration
//! strings and logging setup.

pub mod coins;
pub mod duration;
pub mod error;
pub mod utils;

pub use coins::{Coin, CoinSet};
pub use duration::{format_duration, parse_duration, round_duration};
pub use error::{CoinError, DurationError, LoggingError};
pub use utils::logging;
