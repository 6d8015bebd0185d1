//! Escrow lifecycle engine: funded work agreements, milestone releases,
//! participation gates backed by stakes, and dispute handoff.

pub mod error;
pub mod escrow;
pub mod stake;
pub mod types;

pub use error::{EscrowError, Result};
pub use escrow::EscrowManager;
pub use stake::{StakeRecord, StakeRegistry, StakeStats};
pub use types::{
    Escrow, EscrowConfig, EscrowStats, FeePolicy, Milestone, MilestoneSpec,
};
