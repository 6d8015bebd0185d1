pub mod advisor;
pub mod claims;
pub mod disputes;
pub mod error;
pub mod pool;
pub mod types;

pub use advisor::{
    build_evidence, DisputeAdvisor, EvidenceConfig, HeuristicAdvisor, ProjectHistory,
};
pub use claims::{ClaimConfig, ClaimReviewManager, ClaimStats};
pub use disputes::{DisputeConfig, DisputeManager, DisputeStats};
pub use error::{DisputeError, Result};
pub use pool::{PoolStats, ReviewerPool, ReviewerProfile};
pub use types::{
    AdvisoryAnalysis, AdvisoryOutcome, Claim, ClaimStatus, Dispute, DisputeEvidence,
    DisputeResolution, DisputeStatus, ResolutionPath, ReviewVote,
};
