pub mod error;
pub mod events;
pub mod fraud;
pub mod score;
pub mod store;

pub use error::{ReputationError, Result};
pub use events::{EventLog, ReputationEvent, ReputationEventKind};
pub use fraud::FraudSignals;
pub use score::{DecayConfig, ScoreComponents, ScoreInputs, ScoreWeights};
pub use store::{
    PlatformTrustProvider, RecomputeOverrides, ReputationConfig, ReputationRecord,
    ReputationStats, ReputationStore,
};
