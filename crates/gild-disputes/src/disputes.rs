use crate::advisor::{DisputeAdvisor, HeuristicAdvisor};
use crate::error::{DisputeError, Result};
use crate::pool::ReviewerPool;
use crate::types::{
    Dispute, DisputeEvidence, DisputeResolution, DisputeStatus, ResolutionPath,
};
use chrono::{DateTime, Duration, Utc};
use gild_ledger::AccountId;
use gild_types::{DisputeId, DisputeOutcome, EscrowId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeConfig {
    /// Reviewers drawn per dispute.
    pub panel_size: usize,
    /// Voting window before the dispute is finalized or parked.
    pub vote_window_hours: i64,
    /// Votes required for a deadline-expiry tally to count as quorate.
    pub min_votes: usize,
}

impl Default for DisputeConfig {
    fn default() -> Self {
        Self {
            panel_size: 3,
            vote_window_hours: 72,
            min_votes: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeStats {
    pub total_disputes: usize,
    pub under_review: usize,
    pub resolved: usize,
    pub needs_mediation: usize,
    pub resolved_to_client: usize,
    pub resolved_to_assignee: usize,
    pub even_splits: usize,
}

/// Panel adjudication for escrow disputes. Evidence is pre-analyzed into a
/// non-binding recommendation; the reviewer vote is the only thing that
/// produces a binding outcome. This manager never touches custody; the
/// escrow side reads the resolution and moves the funds.
pub struct DisputeManager {
    config: DisputeConfig,
    pool: Arc<ReviewerPool>,
    advisor: Arc<dyn DisputeAdvisor>,
    fallback: HeuristicAdvisor,
    disputes: Arc<RwLock<HashMap<DisputeId, Dispute>>>,
    escrow_index: Arc<RwLock<HashMap<EscrowId, Vec<DisputeId>>>>,
    metrics_opened: Option<Arc<prometheus::IntCounter>>,
    metrics_resolved: Option<Arc<prometheus::IntCounter>>,
    metrics_fallbacks: Option<Arc<prometheus::IntCounter>>,
}

impl DisputeManager {
    pub fn new(
        config: DisputeConfig,
        pool: Arc<ReviewerPool>,
        advisor: Arc<dyn DisputeAdvisor>,
    ) -> Self {
        Self {
            config,
            pool,
            advisor,
            fallback: HeuristicAdvisor,
            disputes: Arc::new(RwLock::new(HashMap::new())),
            escrow_index: Arc::new(RwLock::new(HashMap::new())),
            metrics_opened: None,
            metrics_resolved: None,
            metrics_fallbacks: None,
        }
    }

    pub fn with_default_advisor(config: DisputeConfig, pool: Arc<ReviewerPool>) -> Self {
        Self::new(config, pool, Arc::new(HeuristicAdvisor))
    }

    pub fn set_metrics(
        &mut self,
        opened: Arc<prometheus::IntCounter>,
        resolved: Arc<prometheus::IntCounter>,
        fallbacks: Arc<prometheus::IntCounter>,
    ) {
        self.metrics_opened = Some(opened);
        self.metrics_resolved = Some(resolved);
        self.metrics_fallbacks = Some(fallbacks);
    }

    /// Opens a dispute, draws its panel, and attaches the advisory
    /// recommendation. Advisor failure degrades to the deterministic
    /// heuristic rather than blocking the dispute.
    pub async fn open_dispute(
        &self,
        escrow: EscrowId,
        claimant: AccountId,
        respondent: AccountId,
        reason: String,
        evidence: DisputeEvidence,
    ) -> Result<DisputeId> {
        if reason.trim().is_empty() {
            return Err(DisputeError::InvalidDispute("reason is required".into()));
        }
        if claimant == respondent {
            return Err(DisputeError::InvalidDispute(
                "claimant and respondent must differ".into(),
            ));
        }

        let panel = self
            .pool
            .select_panel(self.config.panel_size, &[claimant, respondent])
            .await?;

        let advisory = match self.advisor.analyze(&evidence).await {
            Ok(analysis) => Some(analysis),
            Err(e) => {
                warn!(
                    "Advisor '{}' failed ({}), falling back to heuristic",
                    self.advisor.name(),
                    e
                );
                if let Some(m) = &self.metrics_fallbacks {
                    m.inc();
                }
                self.fallback.analyze(&evidence).await.ok()
            }
        };

        let deadline = Utc::now() + Duration::hours(self.config.vote_window_hours);
        let mut dispute = Dispute::new(escrow, claimant, respondent, reason, evidence, deadline);
        dispute.reviewers = panel;
        dispute.advisory = advisory;
        let dispute_id = dispute.id;

        info!(
            "⚖️ Dispute {} opened on {} by {} ({} reviewers, advisory: {})",
            dispute_id,
            escrow,
            claimant,
            dispute.reviewers.len(),
            dispute
                .advisory
                .as_ref()
                .map(|a| a.outcome.as_str())
                .unwrap_or("none")
        );

        self.disputes.write().await.insert(dispute_id, dispute);
        self.escrow_index
            .write()
            .await
            .entry(escrow)
            .or_default()
            .push(dispute_id);
        if let Some(m) = &self.metrics_opened {
            m.inc();
        }
        Ok(dispute_id)
    }

    /// Records one reviewer's outcome vote. A full panel triggers an
    /// immediate tally: a unique plurality binds, a tie parks the dispute
    /// for mediation.
    pub async fn cast_vote(
        &self,
        dispute_id: DisputeId,
        reviewer: AccountId,
        outcome: DisputeOutcome,
    ) -> Result<DisputeStatus> {
        let mut disputes = self.disputes.write().await;
        let dispute = disputes
            .get_mut(&dispute_id)
            .ok_or(DisputeError::DisputeNotFound(dispute_id))?;

        match dispute.status {
            DisputeStatus::UnderReview => {}
            DisputeStatus::Resolved => return Err(DisputeError::AlreadyResolved),
            DisputeStatus::NeedsMediation => return Err(DisputeError::MediationRequired),
        }

        if Utc::now() > dispute.deadline {
            Self::finalize_expired(dispute, self.config.min_votes);
            self.bump_resolved_metric(dispute);
            return Err(DisputeError::ReviewClosed(dispute_id.to_string()));
        }

        if !dispute.reviewers.contains(&reviewer) {
            return Err(DisputeError::NotAReviewer(reviewer.to_string()));
        }
        if dispute.votes.contains_key(&reviewer) {
            return Err(DisputeError::AlreadyVoted(reviewer.to_string()));
        }

        dispute.votes.insert(reviewer, outcome);
        self.pool.note_completed(&reviewer).await;
        info!(
            "🗳️ Vote on dispute {}: {} ({}/{})",
            dispute_id,
            outcome.as_str(),
            dispute.votes.len(),
            dispute.reviewers.len()
        );

        if dispute.votes.len() == dispute.reviewers.len() {
            match Self::plurality(&dispute.votes) {
                Some(winner) => {
                    Self::resolve(dispute, winner, ResolutionPath::Panel);
                    self.bump_resolved_metric(dispute);
                }
                None => {
                    dispute.status = DisputeStatus::NeedsMediation;
                    info!("🤝 Dispute {} tied, parked for mediation", dispute_id);
                }
            }
        }

        Ok(dispute.status)
    }

    /// The outcome with strictly more votes than any other, if one exists.
    fn plurality(votes: &HashMap<AccountId, DisputeOutcome>) -> Option<DisputeOutcome> {
        let mut counts: HashMap<DisputeOutcome, usize> = HashMap::new();
        for outcome in votes.values() {
            *counts.entry(*outcome).or_insert(0) += 1;
        }
        let best = counts.values().copied().max()?;
        let mut leaders = counts.iter().filter(|(_, c)| **c == best);
        let (winner, _) = leaders.next()?;
        if leaders.next().is_some() {
            return None;
        }
        Some(*winner)
    }

    fn resolve(dispute: &mut Dispute, outcome: DisputeOutcome, via: ResolutionPath) {
        dispute.status = DisputeStatus::Resolved;
        dispute.resolution = Some(DisputeResolution {
            outcome,
            votes_cast: dispute.votes.len(),
            via,
            summary: format!(
                "{} by {} ({} of {} votes cast)",
                outcome.as_str(),
                match via {
                    ResolutionPath::Panel => "panel vote",
                    ResolutionPath::Mediation => "mediation",
                },
                dispute.votes.len(),
                dispute.reviewers.len()
            ),
            resolved_at: Utc::now(),
        });
        info!("✅ Dispute {} resolved: {}", dispute.id, outcome.as_str());
    }

    fn finalize_expired(dispute: &mut Dispute, min_votes: usize) {
        if dispute.votes.len() >= min_votes {
            if let Some(winner) = Self::plurality(&dispute.votes) {
                Self::resolve(dispute, winner, ResolutionPath::Panel);
                return;
            }
        }
        dispute.status = DisputeStatus::NeedsMediation;
        warn!(
            "Dispute {} expired without a usable tally ({} votes), parked for mediation",
            dispute.id,
            dispute.votes.len()
        );
    }

    fn bump_resolved_metric(&self, dispute: &Dispute) {
        if dispute.status == DisputeStatus::Resolved {
            if let Some(m) = &self.metrics_resolved {
                m.inc();
            }
        }
    }

    /// Finalizes every dispute whose voting window has passed.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut disputes = self.disputes.write().await;
        let mut swept = 0;
        for dispute in disputes.values_mut() {
            if dispute.status == DisputeStatus::UnderReview && now > dispute.deadline {
                Self::finalize_expired(dispute, self.config.min_votes);
                self.bump_resolved_metric(dispute);
                swept += 1;
            }
        }
        if swept > 0 {
            warn!("Swept {} expired disputes", swept);
        }
        swept
    }

    /// Applies a mediated outcome to a dispute the panel could not decide.
    pub async fn mediate(
        &self,
        dispute_id: DisputeId,
        outcome: DisputeOutcome,
        summary: String,
    ) -> Result<()> {
        let mut disputes = self.disputes.write().await;
        let dispute = disputes
            .get_mut(&dispute_id)
            .ok_or(DisputeError::DisputeNotFound(dispute_id))?;

        match dispute.status {
            DisputeStatus::NeedsMediation => {}
            DisputeStatus::Resolved => return Err(DisputeError::AlreadyResolved),
            DisputeStatus::UnderReview => return Err(DisputeError::NotAwaitingMediation),
        }

        Self::resolve(dispute, outcome, ResolutionPath::Mediation);
        if let Some(r) = dispute.resolution.as_mut() {
            r.summary = summary;
        }
        self.bump_resolved_metric(dispute);
        Ok(())
    }

    /// Binding resolution for a dispute, once one exists.
    pub async fn resolution_of(&self, dispute_id: &DisputeId) -> Option<DisputeResolution> {
        self.disputes
            .read()
            .await
            .get(dispute_id)
            .and_then(|d| d.resolution.clone())
    }

    pub async fn get_dispute(&self, dispute_id: &DisputeId) -> Option<Dispute> {
        self.disputes.read().await.get(dispute_id).cloned()
    }

    pub async fn disputes_for_escrow(&self, escrow: EscrowId) -> Vec<Dispute> {
        let index = self.escrow_index.read().await;
        let disputes = self.disputes.read().await;
        index
            .get(&escrow)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| disputes.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> DisputeStats {
        let disputes = self.disputes.read().await;
        let mut stats = DisputeStats {
            total_disputes: disputes.len(),
            under_review: 0,
            resolved: 0,
            needs_mediation: 0,
            resolved_to_client: 0,
            resolved_to_assignee: 0,
            even_splits: 0,
        };
        for dispute in disputes.values() {
            match dispute.status {
                DisputeStatus::UnderReview => stats.under_review += 1,
                DisputeStatus::NeedsMediation => stats.needs_mediation += 1,
                DisputeStatus::Resolved => {
                    stats.resolved += 1;
                    if let Some(r) = &dispute.resolution {
                        match r.outcome {
                            DisputeOutcome::FullToClient => stats.resolved_to_client += 1,
                            DisputeOutcome::FullToAssignee => stats.resolved_to_assignee += 1,
                            DisputeOutcome::EvenSplit => stats.even_splits += 1,
                        }
                    }
                }
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(b: u8) -> AccountId {
        AccountId::from_bytes([b; 32])
    }

    fn evidence(messages: &[&str]) -> DisputeEvidence {
        DisputeEvidence {
            project_description: "build a widget".into(),
            messages: messages.iter().map(|m| m.to_string()).collect(),
            proposals: Vec::new(),
        }
    }

    async fn setup(panel_size: usize) -> DisputeManager {
        let pool = Arc::new(ReviewerPool::new(0.0));
        for b in 10..20u8 {
            pool.authorize(acct(b), 80.0).await.unwrap();
        }
        DisputeManager::with_default_advisor(
            DisputeConfig {
                panel_size,
                ..Default::default()
            },
            pool,
        )
    }

    #[tokio::test]
    async fn test_open_attaches_advisory() {
        let manager = setup(3).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "work not delivered".into(),
                evidence(&["everything is missing", "i want a refund"]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        assert_eq!(dispute.status, DisputeStatus::UnderReview);
        let advisory = dispute.advisory.unwrap();
        assert_eq!(advisory.outcome, crate::types::AdvisoryOutcome::RefundClient);
        assert!(!dispute.reviewers.contains(&acct(1)));
        assert!(!dispute.reviewers.contains(&acct(2)));
    }

    #[tokio::test]
    async fn test_plurality_binds() {
        let manager = setup(3).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "quality".into(),
                evidence(&[]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        let r = &dispute.reviewers;
        manager
            .cast_vote(id, r[0], DisputeOutcome::FullToClient)
            .await
            .unwrap();
        manager
            .cast_vote(id, r[1], DisputeOutcome::FullToClient)
            .await
            .unwrap();
        let status = manager
            .cast_vote(id, r[2], DisputeOutcome::EvenSplit)
            .await
            .unwrap();

        assert_eq!(status, DisputeStatus::Resolved);
        let resolution = manager.resolution_of(&id).await.unwrap();
        assert_eq!(resolution.outcome, DisputeOutcome::FullToClient);
        assert_eq!(resolution.votes_cast, 3);
        assert_eq!(resolution.via, ResolutionPath::Panel);
    }

    #[tokio::test]
    async fn test_three_way_tie_parks_for_mediation() {
        let manager = setup(3).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "quality".into(),
                evidence(&[]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        let r = &dispute.reviewers;
        manager
            .cast_vote(id, r[0], DisputeOutcome::FullToClient)
            .await
            .unwrap();
        manager
            .cast_vote(id, r[1], DisputeOutcome::FullToAssignee)
            .await
            .unwrap();
        let status = manager
            .cast_vote(id, r[2], DisputeOutcome::EvenSplit)
            .await
            .unwrap();

        assert_eq!(status, DisputeStatus::NeedsMediation);
        assert!(manager.resolution_of(&id).await.is_none());

        // Votes are closed once parked.
        let late = manager
            .cast_vote(id, r[0], DisputeOutcome::FullToClient)
            .await;
        assert!(matches!(late, Err(DisputeError::MediationRequired)));
    }

    #[tokio::test]
    async fn test_mediation_resolves_parked_dispute() {
        let manager = setup(2).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "quality".into(),
                evidence(&[]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        manager
            .cast_vote(id, dispute.reviewers[0], DisputeOutcome::FullToClient)
            .await
            .unwrap();
        manager
            .cast_vote(id, dispute.reviewers[1], DisputeOutcome::FullToAssignee)
            .await
            .unwrap();

        // Mediation on a dispute still under review is refused.
        let premature_target = manager
            .open_dispute(
                EscrowId(2),
                acct(1),
                acct(2),
                "other".into(),
                evidence(&[]),
            )
            .await
            .unwrap();
        let premature = manager
            .mediate(premature_target, DisputeOutcome::EvenSplit, "x".into())
            .await;
        assert!(matches!(premature, Err(DisputeError::NotAwaitingMediation)));

        manager
            .mediate(id, DisputeOutcome::EvenSplit, "split after review".into())
            .await
            .unwrap();
        let resolution = manager.resolution_of(&id).await.unwrap();
        assert_eq!(resolution.outcome, DisputeOutcome::EvenSplit);
        assert_eq!(resolution.via, ResolutionPath::Mediation);

        let again = manager
            .mediate(id, DisputeOutcome::FullToClient, "again".into())
            .await;
        assert!(matches!(again, Err(DisputeError::AlreadyResolved)));
    }

    #[tokio::test]
    async fn test_expired_quorate_dispute_resolves_on_sweep() {
        let manager = setup(3).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "quality".into(),
                evidence(&[]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        manager
            .cast_vote(id, dispute.reviewers[0], DisputeOutcome::FullToAssignee)
            .await
            .unwrap();
        manager
            .cast_vote(id, dispute.reviewers[1], DisputeOutcome::FullToAssignee)
            .await
            .unwrap();

        let swept = manager
            .sweep_expired(Utc::now() + Duration::hours(100))
            .await;
        assert_eq!(swept, 1);
        let resolution = manager.resolution_of(&id).await.unwrap();
        assert_eq!(resolution.outcome, DisputeOutcome::FullToAssignee);
    }

    #[tokio::test]
    async fn test_expired_underquorate_dispute_parks() {
        let manager = setup(3).await;
        let id = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(2),
                "quality".into(),
                evidence(&[]),
            )
            .await
            .unwrap();

        let dispute = manager.get_dispute(&id).await.unwrap();
        manager
            .cast_vote(id, dispute.reviewers[0], DisputeOutcome::FullToAssignee)
            .await
            .unwrap();

        manager
            .sweep_expired(Utc::now() + Duration::hours(100))
            .await;
        let parked = manager.get_dispute(&id).await.unwrap();
        assert_eq!(parked.status, DisputeStatus::NeedsMediation);
    }

    #[tokio::test]
    async fn test_parties_cannot_self_dispute() {
        let manager = setup(3).await;
        let result = manager
            .open_dispute(
                EscrowId(1),
                acct(1),
                acct(1),
                "reason".into(),
                evidence(&[]),
            )
            .await;
        assert!(matches!(result, Err(DisputeError::InvalidDispute(_))));
    }

    #[tokio::test]
    async fn test_escrow_index_tracks_history() {
        let manager = setup(3).await;
        manager
            .open_dispute(EscrowId(5), acct(1), acct(2), "a".into(), evidence(&[]))
            .await
            .unwrap();
        manager
            .open_dispute(EscrowId(5), acct(2), acct(1), "b".into(), evidence(&[]))
            .await
            .unwrap();

        let history = manager.disputes_for_escrow(EscrowId(5)).await;
        assert_eq!(history.len(), 2);
        assert!(manager.disputes_for_escrow(EscrowId(9)).await.is_empty());
    }
}
