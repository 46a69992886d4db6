pub mod blockchain;
pub mod bot;
pub mod config;
pub mod credentials;
pub mod dex;
pub mod error;
pub mod types;

pub use config::{Config, TradeConfig};
pub use error::{TradeError, TradeResult};
pub use types::*;
