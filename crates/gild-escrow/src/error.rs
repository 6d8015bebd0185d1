use chrono::{DateTime, Utc};
use gild_disputes::DisputeError;
use gild_ledger::Amount;
use gild_types::{DisputeId, ErrorKind, EscrowId, EscrowState};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum EscrowError {
    #[error("Escrow not found: {0}")]
    NotFound(EscrowId),

    /// The operation is not valid from the escrow's current state
    #[error("Cannot {operation} while escrow is {state}")]
    InvalidState {
        operation: &'static str,
        state: EscrowState,
    },

    /// Listing deadline passed before a counterparty was accepted
    #[error("Escrow {0} has expired")]
    Expired(EscrowId),

    #[error("Only the client may do this: {0}")]
    NotClient(String),

    #[error("Only the assignee may do this: {0}")]
    NotAssignee(String),

    #[error("Caller is not a party to this escrow: {0}")]
    NotParty(String),

    #[error("Escrow has no accepted assignee")]
    NoAssignee,

    #[error("Client and assignee must be different accounts")]
    SelfDeal,

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Milestone amounts must add up to the escrow total exactly
    #[error("Milestone amounts sum to {sum}, escrow total is {total}")]
    MilestoneSumMismatch { total: Amount, sum: Amount },

    #[error("Milestone index {index} out of range ({count} milestones)")]
    MilestoneOutOfRange { index: usize, count: usize },

    /// Each milestone disburses at most once
    #[error("Milestone {0} already completed")]
    MilestoneAlreadyCompleted(usize),

    #[error("No open dispute on this escrow")]
    NoOpenDispute,

    #[error("Escrow {0} already has an open dispute")]
    DisputeAlreadyOpen(EscrowId),

    /// The panel has not produced a binding outcome yet
    #[error("Dispute {0} is not resolved")]
    DisputeUnresolved(DisputeId),

    #[error("Stake requirement not met: need {required}, have {staked}")]
    InsufficientStake { required: Amount, staked: Amount },

    #[error("Insufficient unlocked funds: need {required}, have {available}")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("Active escrow limit reached ({limit})")]
    ActiveEscrowLimit { limit: usize },

    #[error("Creation cooldown active until {until}")]
    CooldownActive { until: DateTime<Utc> },

    /// Unverified accounts are capped on total escrow value
    #[error("Escrow value {requested} exceeds the unverified cap of {cap}")]
    ValueCapExceeded { cap: Amount, requested: Amount },

    /// Stake backing active escrows cannot drop below the minimum
    #[error("Stake is backing {active} active escrows and cannot be withdrawn")]
    StakeLocked { active: u32 },

    #[error("No stake record for account: {0}")]
    UnknownStaker(String),

    /// Custody transfer failed; escrow state was not advanced
    #[error("Custody failure: {0}")]
    Custody(String),

    #[error(transparent)]
    Dispute(#[from] DisputeError),
}

impl EscrowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EscrowError::NotFound(_)
            | EscrowError::NoAssignee
            | EscrowError::SelfDeal
            | EscrowError::InvalidAmount(_)
            | EscrowError::MilestoneSumMismatch { .. }
            | EscrowError::MilestoneOutOfRange { .. }
            | EscrowError::NoOpenDispute
            | EscrowError::InsufficientStake { .. }
            | EscrowError::InsufficientFunds { .. }
            | EscrowError::UnknownStaker(_) => ErrorKind::PreconditionViolation,
            EscrowError::InvalidState { .. }
            | EscrowError::Expired(_)
            | EscrowError::MilestoneAlreadyCompleted(_)
            | EscrowError::DisputeAlreadyOpen(_)
            | EscrowError::DisputeUnresolved(_) => ErrorKind::StateConflict,
            EscrowError::NotClient(_)
            | EscrowError::NotAssignee(_)
            | EscrowError::NotParty(_) => ErrorKind::AuthorizationFailure,
            EscrowError::ActiveEscrowLimit { .. }
            | EscrowError::CooldownActive { .. }
            | EscrowError::ValueCapExceeded { .. }
            | EscrowError::StakeLocked { .. } => ErrorKind::ResourceExhausted,
            EscrowError::Custody(_) => ErrorKind::ExternalDependencyFailure,
            EscrowError::Dispute(e) => e.kind(),
        }
    }

    /// Stable machine-readable reason string.
    pub fn reason(&self) -> &'static str {
        match self {
            EscrowError::NotFound(_) => "escrow_not_found",
            EscrowError::InvalidState { .. } => "invalid_state",
            EscrowError::Expired(_) => "escrow_expired",
            EscrowError::NotClient(_) => "not_client",
            EscrowError::NotAssignee(_) => "not_assignee",
            EscrowError::NotParty(_) => "not_party",
            EscrowError::NoAssignee => "no_assignee",
            EscrowError::SelfDeal => "self_deal",
            EscrowError::InvalidAmount(_) => "invalid_amount",
            EscrowError::MilestoneSumMismatch { .. } => "milestone_sum_mismatch",
            EscrowError::MilestoneOutOfRange { .. } => "milestone_out_of_range",
            EscrowError::MilestoneAlreadyCompleted(_) => "milestone_already_completed",
            EscrowError::NoOpenDispute => "no_open_dispute",
            EscrowError::DisputeAlreadyOpen(_) => "dispute_already_open",
            EscrowError::DisputeUnresolved(_) => "dispute_unresolved",
            EscrowError::InsufficientStake { .. } => "insufficient_stake",
            EscrowError::InsufficientFunds { .. } => "insufficient_funds",
            EscrowError::ActiveEscrowLimit { .. } => "active_escrow_limit",
            EscrowError::CooldownActive { .. } => "cooldown_active",
            EscrowError::ValueCapExceeded { .. } => "value_cap_exceeded",
            EscrowError::StakeLocked { .. } => "stake_locked",
            EscrowError::UnknownStaker(_) => "unknown_staker",
            EscrowError::Custody(_) => "custody_failure",
            EscrowError::Dispute(e) => e.reason(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EscrowError>;
