//! Marketplace assembly: one configuration wires the custody ledger,
//! stake registry, reputation store, reviewer pool, adjudication
//! managers, escrow engine, and event bus into a single facade.

pub mod config;
pub mod history;
pub mod logging;
pub mod market;

pub use config::{LoggingConfig, MarketConfig};
pub use history::ConversationLog;
pub use logging::init_logging;
pub use market::{MarketError, MarketStats, Marketplace, Result};
