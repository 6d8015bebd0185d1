use chrono::{DateTime, Utc};
use gild_ledger::{AccountId, Amount};
use gild_types::{DisputeId, EscrowId, EscrowState};
use serde::{Deserialize, Serialize};

/// Caller-supplied milestone description at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub description: String,
    pub amount: Amount,
    pub deadline: Option<DateTime<Utc>>,
}

/// One deliverable tranche of an escrowed project. The client's release
/// marks the tranche completed and approved in the same commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub description: String,
    pub amount: Amount,
    pub deadline: Option<DateTime<Utc>>,
    pub completed: bool,
    pub approved: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Milestone {
    pub fn from_spec(spec: MilestoneSpec) -> Self {
        Self {
            description: spec.description,
            amount: spec.amount,
            deadline: spec.deadline,
            completed: false,
            approved: false,
            completed_at: None,
        }
    }
}

/// Platform fee schedule. A new version never rewrites in-flight escrows;
/// each escrow freezes the policy active at its creation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeePolicy {
    pub bps: u32,
    pub version: u32,
}

impl FeePolicy {
    pub fn fee_for(&self, amount: Amount) -> Amount {
        amount.bps(self.bps)
    }
}

impl Default for FeePolicy {
    fn default() -> Self {
        Self { bps: 250, version: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowConfig {
    /// Stake floor for creating or accepting escrows.
    pub min_stake: Amount,
    /// Concurrent non-terminal escrows per participant.
    pub max_active_escrows: usize,
    /// Pause between escrow creations by the same client.
    pub creation_cooldown_secs: i64,
    /// Total-value ceiling for accounts without verified status.
    pub unverified_value_cap: Amount,
    pub treasury: AccountId,
    /// Listing lifetime when no deadline is given.
    pub default_lifetime_hours: i64,
    pub fee: FeePolicy,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            min_stake: Amount::from_units(100),
            max_active_escrows: 5,
            creation_cooldown_secs: 60,
            unverified_value_cap: Amount::from_units(10_000),
            treasury: AccountId::treasury(),
            default_lifetime_hours: 24 * 30,
            fee: FeePolicy::default(),
        }
    }
}

/// An escrowed project. Funds equal to `total` sit in the custody vault
/// from creation until every unit has been disbursed exactly once;
/// `released` tracks how much has already left custody for this escrow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Escrow {
    pub id: EscrowId,
    pub client: AccountId,
    pub assignee: Option<AccountId>,
    pub description: String,
    pub total: Amount,
    pub released: Amount,
    pub milestones: Vec<Milestone>,
    pub state: EscrowState,
    pub dispute: Option<DisputeId>,
    /// Fee policy frozen at creation.
    pub fee: FeePolicy,
    /// Bumped on every mutation; lets callers detect lost races.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Escrow {
    /// Custodied funds not yet disbursed.
    pub fn remaining(&self) -> Amount {
        self.total.saturating_sub(self.released)
    }

    pub fn all_milestones_completed(&self) -> bool {
        !self.milestones.is_empty() && self.milestones.iter().all(|m| m.completed)
    }

    pub fn is_party(&self, account: &AccountId) -> bool {
        self.client == *account || self.assignee.as_ref() == Some(account)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowStats {
    pub total_escrows: usize,
    pub open: usize,
    pub in_progress: usize,
    pub submitted: usize,
    pub disputed: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Custodied value still awaiting disbursement.
    pub value_in_custody: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_policy_basis_points() {
        let fee = FeePolicy { bps: 250, version: 1 };
        assert_eq!(fee.fee_for(Amount::from_units(400)), Amount::from_units(10));
        assert_eq!(fee.fee_for(Amount::from_units(600)), Amount::from_units(15));
        assert_eq!(fee.fee_for(Amount::from_units(39)), Amount::ZERO);
    }

    #[test]
    fn test_remaining_tracks_released() {
        let mut escrow = Escrow {
            id: EscrowId(1),
            client: AccountId::from_bytes([1; 32]),
            assignee: None,
            description: "work".into(),
            total: Amount::from_units(1000),
            released: Amount::ZERO,
            milestones: Vec::new(),
            state: EscrowState::Open,
            dispute: None,
            fee: FeePolicy::default(),
            version: 0,
            created_at: Utc::now(),
            deadline: Utc::now(),
            last_activity: Utc::now(),
        };
        assert_eq!(escrow.remaining(), Amount::from_units(1000));
        escrow.released = Amount::from_units(400);
        assert_eq!(escrow.remaining(), Amount::from_units(600));
    }

    #[test]
    fn test_all_milestones_completed_requires_some() {
        let escrow = Escrow {
            id: EscrowId(1),
            client: AccountId::from_bytes([1; 32]),
            assignee: None,
            description: "work".into(),
            total: Amount::from_units(1000),
            released: Amount::ZERO,
            milestones: Vec::new(),
            state: EscrowState::Open,
            dispute: None,
            fee: FeePolicy::default(),
            version: 0,
            created_at: Utc::now(),
            deadline: Utc::now(),
            last_activity: Utc::now(),
        };
        // A milestone-less escrow completes via the project path only.
        assert!(!escrow.all_milestones_completed());
    }
}
