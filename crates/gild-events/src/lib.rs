pub mod bridge;
pub mod bus;

pub use bridge::ReputationBridge;
pub use bus::{EventBus, EventPriority, MarketEvent};
