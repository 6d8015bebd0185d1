use crate::error::{DisputeError, Result};
use crate::pool::ReviewerPool;
use crate::types::{Claim, ClaimStatus, ReviewVote};
use chrono::{DateTime, Duration, Utc};
use gild_ledger::{AccountId, Amount, CustodyLedger, TransferReason};
use gild_types::{ClaimId, EscrowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimConfig {
    /// Reviewers drawn per claim.
    pub panel_size: usize,
    /// Voting window before the claim is finalized from whatever votes exist.
    pub review_window_hours: i64,
    /// Flat reward per cast vote, paid whichever way the review goes.
    pub reviewer_reward: Amount,
    /// Votes required for a deadline-expiry tally to count as quorate.
    pub min_votes: usize,
    /// Account that funds approved payouts and reviewer rewards.
    pub pool_account: AccountId,
}

impl Default for ClaimConfig {
    fn default() -> Self {
        Self {
            panel_size: 3,
            review_window_hours: 72,
            reviewer_reward: Amount::from_units(5),
            min_votes: 2,
            pool_account: AccountId::insurance_pool(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimStats {
    pub total_claims: usize,
    pub under_review: usize,
    pub approved: usize,
    pub rejected: usize,
    pub paid: usize,
}

/// Panel-based claim adjudication. Each claim gets a randomly drawn
/// reviewer panel; every reviewer votes once; ties and under-voted
/// expiries reject. Rejection is the fail-safe direction because an
/// unpaid valid claim can be resubmitted while a paid invalid one is
/// unrecoverable.
pub struct ClaimReviewManager {
    config: ClaimConfig,
    pool: Arc<ReviewerPool>,
    ledger: Arc<CustodyLedger>,
    claims: Arc<RwLock<HashMap<ClaimId, Claim>>>,
    metrics_submitted: Option<Arc<prometheus::IntCounter>>,
    metrics_approved: Option<Arc<prometheus::IntCounter>>,
    metrics_rejected: Option<Arc<prometheus::IntCounter>>,
    metrics_paid: Option<Arc<prometheus::IntCounter>>,
}

impl ClaimReviewManager {
    pub fn new(config: ClaimConfig, pool: Arc<ReviewerPool>, ledger: Arc<CustodyLedger>) -> Self {
        Self {
            config,
            pool,
            ledger,
            claims: Arc::new(RwLock::new(HashMap::new())),
            metrics_submitted: None,
            metrics_approved: None,
            metrics_rejected: None,
            metrics_paid: None,
        }
    }

    pub fn set_metrics(
        &mut self,
        submitted: Arc<prometheus::IntCounter>,
        approved: Arc<prometheus::IntCounter>,
        rejected: Arc<prometheus::IntCounter>,
        paid: Arc<prometheus::IntCounter>,
    ) {
        self.metrics_submitted = Some(submitted);
        self.metrics_approved = Some(approved);
        self.metrics_rejected = Some(rejected);
        self.metrics_paid = Some(paid);
    }

    /// Submits a claim and draws its review panel. The claimant is never
    /// eligible for their own panel.
    pub async fn submit_claim(
        &self,
        claimant: AccountId,
        amount: Amount,
        deductible: Amount,
        evidence: String,
        escrow: Option<EscrowId>,
        policy_ref: Option<String>,
    ) -> Result<ClaimId> {
        if amount.is_zero() {
            return Err(DisputeError::InvalidClaim("amount must be positive".into()));
        }
        if deductible > amount {
            return Err(DisputeError::InvalidClaim(
                "deductible exceeds claim amount".into(),
            ));
        }
        if evidence.trim().is_empty() {
            return Err(DisputeError::InvalidClaim("evidence is required".into()));
        }

        let panel = self
            .pool
            .select_panel(self.config.panel_size, &[claimant])
            .await?;

        let deadline = Utc::now() + Duration::hours(self.config.review_window_hours);
        let mut claim = Claim::new(
            claimant, amount, deductible, evidence, escrow, policy_ref, deadline,
        );
        claim.reviewers = panel;
        claim.status = ClaimStatus::UnderReview;
        let claim_id = claim.id;

        info!(
            "📋 Claim {} submitted by {} for {} ({} reviewers)",
            claim_id,
            claimant,
            amount,
            claim.reviewers.len()
        );

        self.claims.write().await.insert(claim_id, claim);
        if let Some(m) = &self.metrics_submitted {
            m.inc();
        }
        Ok(claim_id)
    }

    /// Records one reviewer's vote. When the last panel member votes the
    /// claim is finalized immediately.
    pub async fn cast_vote(
        &self,
        claim_id: ClaimId,
        reviewer: AccountId,
        vote: ReviewVote,
    ) -> Result<ClaimStatus> {
        let mut claims = self.claims.write().await;
        let claim = claims
            .get_mut(&claim_id)
            .ok_or(DisputeError::ClaimNotFound(claim_id))?;

        match claim.status {
            ClaimStatus::UnderReview => {}
            _ => return Err(DisputeError::AlreadyResolved),
        }

        // Deadline passed but not yet swept: finalize from existing votes
        // and refuse the late ballot.
        if Utc::now() > claim.deadline {
            let status = Self::finalize_expired(claim, self.config.min_votes);
            self.note_resolution(claim, status);
            self.pay_reviewer_rewards(claim).await;
            return Err(DisputeError::ReviewClosed(claim_id.to_string()));
        }

        if !claim.reviewers.contains(&reviewer) {
            return Err(DisputeError::NotAReviewer(reviewer.to_string()));
        }
        if claim.votes.contains_key(&reviewer) {
            return Err(DisputeError::AlreadyVoted(reviewer.to_string()));
        }

        claim.votes.insert(reviewer, vote);
        self.pool.note_completed(&reviewer).await;
        info!(
            "🗳️ Vote on claim {}: {:?} ({}/{})",
            claim_id,
            vote,
            claim.votes.len(),
            claim.reviewers.len()
        );

        if claim.votes.len() == claim.reviewers.len() {
            let status = Self::tally(claim);
            self.note_resolution(claim, status);
            self.pay_reviewer_rewards(claim).await;
        }

        Ok(claim.status)
    }

    /// Strict majority approves; anything else, including an exact tie,
    /// rejects.
    fn tally(claim: &mut Claim) -> ClaimStatus {
        if claim.approvals() > claim.rejections() {
            ClaimStatus::Approved
        } else {
            ClaimStatus::Rejected
        }
    }

    fn finalize_expired(claim: &mut Claim, min_votes: usize) -> ClaimStatus {
        if claim.votes.len() < min_votes {
            ClaimStatus::Rejected
        } else {
            Self::tally(claim)
        }
    }

    fn note_resolution(&self, claim: &mut Claim, status: ClaimStatus) {
        claim.status = status;
        claim.resolved_at = Some(Utc::now());
        info!(
            "⚖️ Claim {} resolved: {} ({} approve / {} reject)",
            claim.id,
            status.as_str(),
            claim.approvals(),
            claim.rejections()
        );
        match status {
            ClaimStatus::Approved => {
                if let Some(m) = &self.metrics_approved {
                    m.inc();
                }
            }
            ClaimStatus::Rejected => {
                if let Some(m) = &self.metrics_rejected {
                    m.inc();
                }
            }
            _ => {}
        }
    }

    /// Pays the flat reward to every reviewer who cast a vote. A reward
    /// transfer failure is logged and swallowed so it can never undo a
    /// finished review.
    async fn pay_reviewer_rewards(&self, claim: &Claim) {
        if self.config.reviewer_reward.is_zero() {
            return;
        }
        let legs: Vec<(AccountId, Amount, TransferReason)> = claim
            .votes
            .keys()
            .map(|r| (*r, self.config.reviewer_reward, TransferReason::ReviewerReward))
            .collect();
        if legs.is_empty() {
            return;
        }
        if let Err(e) = self.ledger.disburse(self.config.pool_account, &legs).await {
            warn!("Reviewer reward payout for claim {} failed: {}", claim.id, e);
        }
    }

    /// Disburses an approved claim. Status moves to `Paid` only after the
    /// transfer commits, so a custody failure leaves the claim approved
    /// and payable.
    pub async fn pay_claim(&self, claim_id: ClaimId) -> Result<Amount> {
        let mut claims = self.claims.write().await;
        let claim = claims
            .get_mut(&claim_id)
            .ok_or(DisputeError::ClaimNotFound(claim_id))?;

        match claim.status {
            ClaimStatus::Approved => {}
            ClaimStatus::Paid => return Err(DisputeError::AlreadyResolved),
            other => {
                return Err(DisputeError::WrongStatus {
                    expected: ClaimStatus::Approved.as_str().to_string(),
                    actual: other.as_str().to_string(),
                })
            }
        }

        let payout = claim.payout();
        if !payout.is_zero() {
            self.ledger
                .transfer(
                    self.config.pool_account,
                    claim.claimant,
                    payout,
                    TransferReason::ClaimPayout,
                )
                .await
                .map_err(|e| DisputeError::PayoutFailed(e.to_string()))?;
        }

        claim.status = ClaimStatus::Paid;
        claim.paid_at = Some(Utc::now());
        info!("💸 Claim {} paid: {} to {}", claim_id, payout, claim.claimant);
        if let Some(m) = &self.metrics_paid {
            m.inc();
        }
        Ok(payout)
    }

    /// Finalizes every claim whose deadline has passed. Quorate tallies
    /// stand; under-voted claims reject.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut claims = self.claims.write().await;
        let mut swept = 0;
        let mut reward_targets = Vec::new();

        for claim in claims.values_mut() {
            if claim.status == ClaimStatus::UnderReview && now > claim.deadline {
                let status = Self::finalize_expired(claim, self.config.min_votes);
                self.note_resolution(claim, status);
                if !claim.votes.is_empty() {
                    reward_targets.push(claim.clone());
                }
                swept += 1;
            }
        }
        drop(claims);

        for claim in &reward_targets {
            self.pay_reviewer_rewards(claim).await;
        }

        if swept > 0 {
            warn!("Swept {} expired claims", swept);
        }
        swept
    }

    pub async fn get_claim(&self, claim_id: &ClaimId) -> Option<Claim> {
        self.claims.read().await.get(claim_id).cloned()
    }

    pub async fn stats(&self) -> ClaimStats {
        let claims = self.claims.read().await;
        let mut stats = ClaimStats {
            total_claims: claims.len(),
            under_review: 0,
            approved: 0,
            rejected: 0,
            paid: 0,
        };
        for claim in claims.values() {
            match claim.status {
                ClaimStatus::UnderReview | ClaimStatus::Submitted => stats.under_review += 1,
                ClaimStatus::Approved => stats.approved += 1,
                ClaimStatus::Rejected => stats.rejected += 1,
                ClaimStatus::Paid => stats.paid += 1,
            }
        }
        stats
    }
}
