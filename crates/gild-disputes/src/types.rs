use chrono::{DateTime, Utc};
use gild_ledger::{AccountId, Amount};
use gild_types::{ClaimId, DisputeId, DisputeOutcome, EscrowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claim lifecycle: `Submitted → UnderReview → {Approved | Rejected} → Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Submitted,
    UnderReview,
    Approved,
    Rejected,
    Paid,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Submitted => "submitted",
            ClaimStatus::UnderReview => "under_review",
            ClaimStatus::Approved => "approved",
            ClaimStatus::Rejected => "rejected",
            ClaimStatus::Paid => "paid",
        }
    }
}

/// One reviewer's vote on a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewVote {
    Approve,
    Reject,
}

/// An evidence-based claim adjudicated by a reviewer panel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: ClaimId,
    /// Escrow the claim relates to, when it is escrow-linked.
    pub escrow: Option<EscrowId>,
    /// External policy reference for insurance-style claims.
    pub policy_ref: Option<String>,
    pub claimant: AccountId,
    pub amount: Amount,
    /// Subtracted from the payout when the claim is approved.
    pub deductible: Amount,
    pub evidence: String,
    pub status: ClaimStatus,
    pub reviewers: Vec<AccountId>,
    pub votes: HashMap<AccountId, ReviewVote>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Claim {
    pub fn new(
        claimant: AccountId,
        amount: Amount,
        deductible: Amount,
        evidence: String,
        escrow: Option<EscrowId>,
        policy_ref: Option<String>,
        deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let now_nanos = now.timestamp_nanos_opt().unwrap_or(0);
        let mut claim_data = Vec::new();
        claim_data.extend_from_slice(claimant.as_bytes());
        claim_data.extend_from_slice(&amount.as_units().to_le_bytes());
        claim_data.extend_from_slice(&now_nanos.to_le_bytes());
        claim_data.extend_from_slice(evidence.as_bytes());

        Self {
            id: ClaimId(*blake3::hash(&claim_data).as_bytes()),
            escrow,
            policy_ref,
            claimant,
            amount,
            deductible,
            evidence,
            status: ClaimStatus::Submitted,
            reviewers: Vec::new(),
            votes: HashMap::new(),
            deadline,
            created_at: now,
            resolved_at: None,
            paid_at: None,
        }
    }

    /// Net amount an approved claim pays out.
    pub fn payout(&self) -> Amount {
        self.amount.saturating_sub(self.deductible)
    }

    pub fn approvals(&self) -> usize {
        self.votes.values().filter(|v| **v == ReviewVote::Approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.votes.values().filter(|v| **v == ReviewVote::Reject).count()
    }
}

/// Dispute lifecycle. There is no silent terminal state: deadline expiry
/// parks the record in `NeedsMediation` rather than completing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    UnderReview,
    Resolved,
    NeedsMediation,
}

impl DisputeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeStatus::UnderReview => "under_review",
            DisputeStatus::Resolved => "resolved",
            DisputeStatus::NeedsMediation => "needs_mediation",
        }
    }
}

/// How a dispute reached its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPath {
    Panel,
    Mediation,
}

/// Binding result of an adjudicated dispute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeResolution {
    pub outcome: DisputeOutcome,
    pub votes_cast: usize,
    pub via: ResolutionPath,
    pub summary: String,
    pub resolved_at: DateTime<Utc>,
}

/// Redacted, truncated evidence bundle fed to advisory analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisputeEvidence {
    pub project_description: String,
    pub messages: Vec<String>,
    pub proposals: Vec<String>,
}

impl DisputeEvidence {
    /// All evidence text lowercased into one haystack for keyword scans.
    pub fn combined_text(&self) -> String {
        let mut text = self.project_description.to_lowercase();
        for m in &self.messages {
            text.push('\n');
            text.push_str(&m.to_lowercase());
        }
        for p in &self.proposals {
            text.push('\n');
            text.push_str(&p.to_lowercase());
        }
        text
    }
}

/// Recommended classification from pre-analysis. Advisory only; it never
/// moves funds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvisoryOutcome {
    RefundClient,
    ReleaseAssignee,
    PartialSplit,
    NeedsMediation,
}

impl AdvisoryOutcome {
    /// The binding outcome this recommendation corresponds to, if any.
    pub fn to_binding(&self) -> Option<DisputeOutcome> {
        match self {
            AdvisoryOutcome::RefundClient => Some(DisputeOutcome::FullToClient),
            AdvisoryOutcome::ReleaseAssignee => Some(DisputeOutcome::FullToAssignee),
            AdvisoryOutcome::PartialSplit => Some(DisputeOutcome::EvenSplit),
            AdvisoryOutcome::NeedsMediation => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdvisoryOutcome::RefundClient => "refund_client",
            AdvisoryOutcome::ReleaseAssignee => "release_assignee",
            AdvisoryOutcome::PartialSplit => "partial_split",
            AdvisoryOutcome::NeedsMediation => "needs_mediation",
        }
    }
}

/// Pre-analysis result attached to a dispute before voting opens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryAnalysis {
    pub outcome: AdvisoryOutcome,
    pub confidence: f64,
    pub reasoning: String,
}

/// An escrow dispute under panel adjudication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub escrow: EscrowId,
    pub claimant: AccountId,
    pub respondent: AccountId,
    pub reason: String,
    pub evidence: DisputeEvidence,
    /// Snapshot of the pre-analysis shown to reviewers.
    pub advisory: Option<AdvisoryAnalysis>,
    pub reviewers: Vec<AccountId>,
    pub votes: HashMap<AccountId, DisputeOutcome>,
    pub status: DisputeStatus,
    pub resolution: Option<DisputeResolution>,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Dispute {
    pub fn new(
        escrow: EscrowId,
        claimant: AccountId,
        respondent: AccountId,
        reason: String,
        evidence: DisputeEvidence,
        deadline: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        let now_nanos = now.timestamp_nanos_opt().unwrap_or(0);
        let mut dispute_data = Vec::new();
        dispute_data.extend_from_slice(&escrow.0.to_le_bytes());
        dispute_data.extend_from_slice(claimant.as_bytes());
        dispute_data.extend_from_slice(respondent.as_bytes());
        dispute_data.extend_from_slice(&now_nanos.to_le_bytes());
        dispute_data.extend_from_slice(reason.as_bytes());

        Self {
            id: DisputeId(*blake3::hash(&dispute_data).as_bytes()),
            escrow,
            claimant,
            respondent,
            reason,
            evidence,
            advisory: None,
            reviewers: Vec::new(),
            votes: HashMap::new(),
            status: DisputeStatus::UnderReview,
            resolution: None,
            deadline,
            created_at: now,
        }
    }
}
