use gild_types::{ClaimId, DisputeId, ErrorKind};
use thiserror::Error;

/// Adjudication error types
#[derive(Error, Debug, Clone)]
pub enum DisputeError {
    #[error("Claim not found: {0}")]
    ClaimNotFound(ClaimId),

    #[error("Dispute not found: {0}")]
    DisputeNotFound(DisputeId),

    /// Malformed claim: zero amount or deductible above the claim amount
    #[error("Invalid claim: {0}")]
    InvalidClaim(String),

    #[error("Invalid dispute: {0}")]
    InvalidDispute(String),

    /// Caller is not on the assigned reviewer panel
    #[error("Not an assigned reviewer: {0}")]
    NotAReviewer(String),

    /// Each reviewer votes at most once
    #[error("Reviewer has already voted: {0}")]
    AlreadyVoted(String),

    #[error("Wrong status: expected {expected}, actual {actual}")]
    WrongStatus { expected: String, actual: String },

    /// Resolving twice is a no-op rejected as invalid state
    #[error("Already resolved")]
    AlreadyResolved,

    /// The review deadline has passed; the record was force-resolved
    #[error("Review window closed for {0}")]
    ReviewClosed(String),

    /// Only the mediation path may act on this dispute now
    #[error("Dispute requires mediation")]
    MediationRequired,

    /// Mediation applies only to disputes parked for it
    #[error("Dispute is not awaiting mediation")]
    NotAwaitingMediation,

    /// Too few eligible reviewers to fill a panel
    #[error("Reviewer panel unavailable: need {needed}, have {available}")]
    PanelUnavailable { needed: usize, available: usize },

    #[error("Reviewer already authorized: {0}")]
    AlreadyAuthorized(String),

    #[error("Unknown reviewer: {0}")]
    UnknownReviewer(String),

    /// Custody transfer for a payout or reward failed; state unchanged
    #[error("Payout failed: {0}")]
    PayoutFailed(String),

    /// Advisory analyzer failed; callers degrade to the heuristic fallback
    #[error("Advisory analysis failed: {0}")]
    AdvisoryFailed(String),
}

impl DisputeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DisputeError::ClaimNotFound(_)
            | DisputeError::DisputeNotFound(_)
            | DisputeError::InvalidClaim(_)
            | DisputeError::InvalidDispute(_)
            | DisputeError::UnknownReviewer(_) => ErrorKind::PreconditionViolation,
            DisputeError::NotAReviewer(_) => ErrorKind::AuthorizationFailure,
            DisputeError::AlreadyVoted(_)
            | DisputeError::WrongStatus { .. }
            | DisputeError::AlreadyResolved
            | DisputeError::ReviewClosed(_)
            | DisputeError::MediationRequired
            | DisputeError::NotAwaitingMediation
            | DisputeError::AlreadyAuthorized(_) => ErrorKind::StateConflict,
            DisputeError::PanelUnavailable { .. } => ErrorKind::ResourceExhausted,
            DisputeError::PayoutFailed(_) | DisputeError::AdvisoryFailed(_) => {
                ErrorKind::ExternalDependencyFailure
            }
        }
    }

    /// Stable machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            DisputeError::ClaimNotFound(_) => "claim_not_found",
            DisputeError::DisputeNotFound(_) => "dispute_not_found",
            DisputeError::InvalidClaim(_) => "invalid_claim",
            DisputeError::InvalidDispute(_) => "invalid_dispute",
            DisputeError::NotAReviewer(_) => "not_a_reviewer",
            DisputeError::AlreadyVoted(_) => "already_voted",
            DisputeError::WrongStatus { .. } => "wrong_status",
            DisputeError::AlreadyResolved => "already_resolved",
            DisputeError::ReviewClosed(_) => "review_closed",
            DisputeError::MediationRequired => "mediation_required",
            DisputeError::NotAwaitingMediation => "not_awaiting_mediation",
            DisputeError::PanelUnavailable { .. } => "panel_unavailable",
            DisputeError::AlreadyAuthorized(_) => "already_authorized",
            DisputeError::UnknownReviewer(_) => "unknown_reviewer",
            DisputeError::PayoutFailed(_) => "payout_failed",
            DisputeError::AdvisoryFailed(_) => "advisory_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, DisputeError>;
