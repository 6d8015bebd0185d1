//! Shared vocabulary for the gild workspace: record identifiers, lifecycle
//! states, adjudication outcomes, and the five-way error taxonomy every
//! policy crate maps its errors onto.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Monotonic escrow identifier, assigned by the escrow ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EscrowId(pub u64);

impl fmt::Display for EscrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "escrow-{}", self.0)
    }
}

/// Content-hash identifier of a dispute record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisputeId(pub [u8; 32]);

impl fmt::Display for DisputeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

/// Content-hash identifier of an insurance-style claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimId(pub [u8; 32]);

impl fmt::Display for ClaimId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &hex::encode(self.0)[..16])
    }
}

/// Escrow lifecycle states.
///
/// `Open → InProgress → {Submitted} → Completed`, or `→ Disputed →
/// Completed`, or `→ Cancelled`. Terminal states are `Completed` and
/// `Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Open,
    InProgress,
    Submitted,
    Completed,
    Disputed,
    Cancelled,
}

impl EscrowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowState::Open => "open",
            EscrowState::InProgress => "in_progress",
            EscrowState::Submitted => "submitted",
            EscrowState::Completed => "completed",
            EscrowState::Disputed => "disputed",
            EscrowState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowState::Completed | EscrowState::Cancelled)
    }

    /// States that count toward a participant's active-escrow limit.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binding outcomes an adjudicated escrow dispute can settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    FullToClient,
    FullToAssignee,
    EvenSplit,
}

impl DisputeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeOutcome::FullToClient => "full_to_client",
            DisputeOutcome::FullToAssignee => "full_to_assignee",
            DisputeOutcome::EvenSplit => "even_split",
        }
    }
}

impl fmt::Display for DisputeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error categories shared across the workspace.
///
/// Every crate-level error maps onto one of these; callers branch on the
/// category (retry, degrade, surface) without matching crate-specific
/// variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input: negative/zero amount, mismatched milestone sum, malformed
    /// numbers.
    PreconditionViolation,
    /// Wrong lifecycle state or a concurrent mutation won the race.
    StateConflict,
    /// Caller is not the client/assignee/reviewer/admin the operation
    /// requires.
    AuthorizationFailure,
    /// A quota or floor was hit: stake below minimum, too many active
    /// escrows, cooldown in effect.
    ResourceExhausted,
    /// The custody primitive or an advisory call failed; the operation
    /// rolled back.
    ExternalDependencyFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PreconditionViolation => "precondition_violation",
            ErrorKind::StateConflict => "state_conflict",
            ErrorKind::AuthorizationFailure => "authorization_failure",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::ExternalDependencyFailure => "external_dependency_failure",
        }
    }

    /// Whether a caller should retry once on a fresh read before surfacing.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::StateConflict)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(EscrowState::Completed.is_terminal());
        assert!(EscrowState::Cancelled.is_terminal());
        assert!(!EscrowState::Disputed.is_terminal());
        assert!(EscrowState::Disputed.is_active());
    }

    #[test]
    fn test_state_names_stable() {
        assert_eq!(EscrowState::InProgress.as_str(), "in_progress");
        assert_eq!(DisputeOutcome::EvenSplit.as_str(), "even_split");
        assert_eq!(ErrorKind::ResourceExhausted.as_str(), "resource_exhausted");
    }

    #[test]
    fn test_only_state_conflict_retryable() {
        assert!(ErrorKind::StateConflict.is_retryable());
        assert!(!ErrorKind::PreconditionViolation.is_retryable());
        assert!(!ErrorKind::AuthorizationFailure.is_retryable());
        assert!(!ErrorKind::ResourceExhausted.is_retryable());
        assert!(!ErrorKind::ExternalDependencyFailure.is_retryable());
    }

    #[test]
    fn test_id_display_truncates() {
        let id = DisputeId([0xAB; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
        assert_eq!(format!("{}", EscrowId(7)), "escrow-7");
    }
}
