use crate::config::MarketConfig;
use crate::history::ConversationLog;
use chrono::{DateTime, Utc};
use gild_disputes::{
    Claim, ClaimReviewManager, ClaimStats, ClaimStatus, Dispute, DisputeAdvisor, DisputeError,
    DisputeManager, DisputeStats, DisputeStatus, PoolStats, ReviewVote, ReviewerPool,
};
use gild_escrow::{
    Escrow, EscrowError, EscrowManager, EscrowStats, MilestoneSpec, StakeRegistry, StakeStats,
};
use gild_events::{EventBus, MarketEvent, ReputationBridge};
use gild_ledger::{AccountId, Amount, CustodyLedger, MemoryLedgerStorage};
use gild_reputation::{ReputationError, ReputationStats, ReputationStore};
use gild_types::{ClaimId, DisputeId, DisputeOutcome, ErrorKind, EscrowId};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum MarketError {
    #[error(transparent)]
    Escrow(#[from] EscrowError),
    #[error(transparent)]
    Dispute(#[from] DisputeError),
    #[error(transparent)]
    Reputation(#[from] ReputationError),
    #[error("Custody operation failed: {0}")]
    Custody(String),
}

impl MarketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Escrow(e) => e.kind(),
            Self::Dispute(e) => e.kind(),
            Self::Reputation(e) => e.kind(),
            Self::Custody(_) => ErrorKind::ExternalDependencyFailure,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Escrow(e) => e.reason(),
            Self::Dispute(e) => e.reason(),
            Self::Reputation(e) => e.reason(),
            Self::Custody(_) => "custody_failure",
        }
    }
}

pub type Result<T> = std::result::Result<T, MarketError>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStats {
    pub escrows: EscrowStats,
    pub stakes: StakeStats,
    pub disputes: DisputeStats,
    pub claims: ClaimStats,
    pub reputation: ReputationStats,
    pub reviewer_pool: PoolStats,
    pub events_emitted: u64,
}

fn register_counter(
    registry: &prometheus::Registry,
    name: &str,
    help: &str,
) -> anyhow::Result<Arc<prometheus::IntCounter>> {
    let counter = prometheus::IntCounter::new(name.to_string(), help.to_string())?;
    registry.register(Box::new(counter.clone()))?;
    Ok(Arc::new(counter))
}

/// The assembled marketplace: custody ledger, stake registry, reputation
/// store, reviewer pool, adjudication managers, escrow engine, and the
/// event bus, wired together from one configuration.
///
/// Component handles are public so embedders can reach past the facade;
/// the methods here add error unification and a one-shot retry on
/// transient state conflicts.
pub struct Marketplace {
    pub config: MarketConfig,
    pub ledger: Arc<CustodyLedger>,
    pub stakes: Arc<StakeRegistry>,
    pub reputation: Arc<ReputationStore>,
    pub pool: Arc<ReviewerPool>,
    pub disputes: Arc<DisputeManager>,
    pub claims: Arc<ClaimReviewManager>,
    pub escrows: Arc<EscrowManager>,
    pub bus: Arc<EventBus>,
    pub history: Arc<ConversationLog>,
    registry: prometheus::Registry,
    bridge: JoinHandle<()>,
}

impl Marketplace {
    /// Builds the marketplace with the keyword advisor.
    pub async fn new(config: MarketConfig) -> anyhow::Result<Self> {
        Self::build(config, None).await
    }

    /// Builds the marketplace with a caller-supplied dispute advisor.
    pub async fn with_advisor(
        config: MarketConfig,
        advisor: Arc<dyn DisputeAdvisor>,
    ) -> anyhow::Result<Self> {
        Self::build(config, Some(advisor)).await
    }

    async fn build(
        config: MarketConfig,
        advisor: Option<Arc<dyn DisputeAdvisor>>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let registry = prometheus::Registry::new();
        let escrows_created = register_counter(
            &registry,
            "gild_escrows_created_total",
            "Escrows created",
        )?;
        let escrows_completed = register_counter(
            &registry,
            "gild_escrows_completed_total",
            "Escrows completed",
        )?;
        let escrows_cancelled = register_counter(
            &registry,
            "gild_escrows_cancelled_total",
            "Escrows cancelled",
        )?;
        let escrows_disputed = register_counter(
            &registry,
            "gild_escrows_disputed_total",
            "Escrows escalated to adjudication",
        )?;
        let disputes_opened =
            register_counter(&registry, "gild_disputes_opened_total", "Disputes opened")?;
        let disputes_resolved = register_counter(
            &registry,
            "gild_disputes_resolved_total",
            "Disputes resolved",
        )?;
        let advisor_fallbacks = register_counter(
            &registry,
            "gild_advisor_fallbacks_total",
            "Advisory analyses served by the heuristic fallback",
        )?;
        let claims_submitted =
            register_counter(&registry, "gild_claims_submitted_total", "Claims submitted")?;
        let claims_approved =
            register_counter(&registry, "gild_claims_approved_total", "Claims approved")?;
        let claims_rejected =
            register_counter(&registry, "gild_claims_rejected_total", "Claims rejected")?;
        let claims_paid =
            register_counter(&registry, "gild_claims_paid_total", "Claim payouts executed")?;

        let ledger = Arc::new(CustodyLedger::new(Arc::new(MemoryLedgerStorage::new())));
        let stakes = Arc::new(StakeRegistry::new(ledger.clone(), config.escrow.min_stake));

        let reputation = Arc::new(ReputationStore::new(config.reputation.clone()));
        reputation.set_platform_provider(stakes.clone()).await;

        let pool = Arc::new(ReviewerPool::new(config.reviewer_floor));

        let mut disputes = match advisor {
            Some(advisor) => DisputeManager::new(config.disputes.clone(), pool.clone(), advisor),
            None => DisputeManager::with_default_advisor(config.disputes.clone(), pool.clone()),
        };
        disputes.set_metrics(disputes_opened, disputes_resolved, advisor_fallbacks);
        let disputes = Arc::new(disputes);

        let mut claims =
            ClaimReviewManager::new(config.claims.clone(), pool.clone(), ledger.clone());
        claims.set_metrics(
            claims_submitted,
            claims_approved,
            claims_rejected,
            claims_paid,
        );
        let claims = Arc::new(claims);

        let bus = Arc::new(EventBus::new());
        let history = Arc::new(ConversationLog::new());

        let mut escrows = EscrowManager::new(
            config.escrow.clone(),
            ledger.clone(),
            stakes.clone(),
            disputes.clone(),
            bus.clone(),
        );
        escrows.set_history(history.clone());
        escrows.set_metrics(
            escrows_created,
            escrows_completed,
            escrows_cancelled,
            escrows_disputed,
        );
        let escrows = Arc::new(escrows);

        let bridge = ReputationBridge::new(reputation.clone(), bus.clone()).start();

        info!(
            "🏛️ Marketplace assembled (fee {} bps, panel {} reviewers)",
            config.escrow.fee.bps, config.disputes.panel_size
        );

        Ok(Self {
            config,
            ledger,
            stakes,
            reputation,
            pool,
            disputes,
            claims,
            escrows,
            bus,
            history,
            registry,
            bridge,
        })
    }

    /// Runs the operation, retrying exactly once when it fails with a
    /// transient state conflict.
    async fn with_retry<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match op().await {
            Err(e) if e.kind().is_retryable() => {
                debug!("🔄 Retrying after transient conflict: {}", e);
                op().await
            }
            other => other,
        }
    }

    // Funding and stakes.

    pub async fn fund_account(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.ledger
            .credit(account, amount)
            .await
            .map_err(|e| MarketError::Custody(e.to_string()))
    }

    pub async fn balance_of(&self, account: AccountId) -> Result<Amount> {
        self.ledger
            .balance_of(account)
            .await
            .map_err(|e| MarketError::Custody(e.to_string()))
    }

    pub async fn deposit_stake(&self, account: AccountId, amount: Amount) -> Result<Amount> {
        let total = self.stakes.deposit(account, amount).await?;
        self.bus.emit(MarketEvent::StakeDeposited {
            account: account.to_hex(),
            amount: amount.as_units(),
            total_staked: total.as_units(),
            timestamp: Utc::now(),
        });
        Ok(total)
    }

    pub async fn withdraw_stake(&self, account: AccountId, amount: Amount) -> Result<Amount> {
        let remaining = self.stakes.withdraw(account, amount).await?;
        self.bus.emit(MarketEvent::StakeWithdrawn {
            account: account.to_hex(),
            amount: amount.as_units(),
            remaining: remaining.as_units(),
            timestamp: Utc::now(),
        });
        Ok(remaining)
    }

    pub async fn verify_account(&self, account: AccountId, verified: bool) {
        self.stakes.set_verified(account, verified).await;
    }

    // Escrow lifecycle.

    pub async fn create_escrow(
        &self,
        client: AccountId,
        description: String,
        total: Amount,
        milestones: Vec<MilestoneSpec>,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<EscrowId> {
        self.with_retry(|| async {
            self.escrows
                .create_escrow(
                    client,
                    description.clone(),
                    total,
                    milestones.clone(),
                    deadline,
                )
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn accept_party(
        &self,
        escrow: EscrowId,
        caller: AccountId,
        assignee: AccountId,
    ) -> Result<()> {
        self.with_retry(|| async {
            self.escrows
                .accept_party(escrow, caller, assignee)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn submit_work(&self, escrow: EscrowId, caller: AccountId) -> Result<()> {
        self.with_retry(|| async {
            self.escrows
                .submit_work(escrow, caller)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn complete_milestone(
        &self,
        escrow: EscrowId,
        caller: AccountId,
        index: usize,
    ) -> Result<Amount> {
        self.with_retry(|| async {
            self.escrows
                .complete_milestone(escrow, caller, index)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn complete_project(&self, escrow: EscrowId, caller: AccountId) -> Result<Amount> {
        self.with_retry(|| async {
            self.escrows
                .complete_project(escrow, caller)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn cancel_escrow(&self, escrow: EscrowId, caller: AccountId) -> Result<Amount> {
        self.with_retry(|| async {
            self.escrows
                .cancel_escrow(escrow, caller)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    // Adjudication.

    pub async fn raise_dispute(
        &self,
        escrow: EscrowId,
        caller: AccountId,
        reason: String,
    ) -> Result<DisputeId> {
        self.with_retry(|| async {
            self.escrows
                .raise_dispute(escrow, caller, reason.clone())
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    pub async fn cast_dispute_vote(
        &self,
        dispute: DisputeId,
        reviewer: AccountId,
        outcome: DisputeOutcome,
    ) -> Result<DisputeStatus> {
        Ok(self.disputes.cast_vote(dispute, reviewer, outcome).await?)
    }

    pub async fn mediate_dispute(
        &self,
        dispute: DisputeId,
        outcome: DisputeOutcome,
        summary: String,
    ) -> Result<()> {
        Ok(self.disputes.mediate(dispute, outcome, summary).await?)
    }

    /// Moves the funds a decided dispute assigned and completes the
    /// escrow.
    pub async fn resolve_dispute(&self, escrow: EscrowId) -> Result<DisputeOutcome> {
        self.with_retry(|| async {
            self.escrows
                .resolve_dispute(escrow)
                .await
                .map_err(MarketError::from)
        })
        .await
    }

    // Insurance claims.

    pub async fn submit_claim(
        &self,
        claimant: AccountId,
        amount: Amount,
        deductible: Amount,
        evidence: String,
        escrow: Option<EscrowId>,
        policy_ref: Option<String>,
    ) -> Result<ClaimId> {
        let claim_id = self
            .claims
            .submit_claim(claimant, amount, deductible, evidence, escrow, policy_ref)
            .await?;
        self.bus.emit(MarketEvent::ClaimSubmitted {
            claim_id: claim_id.to_string(),
            claimant: claimant.to_hex(),
            amount: amount.as_units(),
            timestamp: Utc::now(),
        });
        Ok(claim_id)
    }

    pub async fn cast_claim_vote(
        &self,
        claim: ClaimId,
        reviewer: AccountId,
        vote: ReviewVote,
    ) -> Result<ClaimStatus> {
        let status = self.claims.cast_vote(claim, reviewer, vote).await?;
        if matches!(status, ClaimStatus::Approved | ClaimStatus::Rejected) {
            if let Some(record) = self.claims.get_claim(&claim).await {
                self.bus.emit(MarketEvent::ClaimResolved {
                    claim_id: claim.to_string(),
                    claimant: record.claimant.to_hex(),
                    approved: status == ClaimStatus::Approved,
                    timestamp: Utc::now(),
                });
            }
        }
        Ok(status)
    }

    pub async fn pay_claim(&self, claim: ClaimId) -> Result<Amount> {
        Ok(self.claims.pay_claim(claim).await?)
    }

    // Reviewer roster.

    /// Authorizes a reviewer at their current reputation score.
    pub async fn authorize_reviewer(&self, account: AccountId) -> Result<()> {
        let score = self.reputation.score_of(account).await;
        Ok(self.pool.authorize(account, score as f64).await?)
    }

    pub async fn revoke_reviewer(&self, account: AccountId) -> Result<()> {
        Ok(self.pool.revoke(&account).await?)
    }

    /// Re-syncs a reviewer's pool eligibility with the reputation store.
    pub async fn refresh_reviewer(&self, account: AccountId) -> Result<()> {
        let score = self.reputation.score_of(account).await;
        Ok(self.pool.set_reputation(&account, score as f64).await?)
    }

    // Reputation and history.

    pub async fn rate_user(&self, user: AccountId, rating: u8) -> Result<u8> {
        let record = self.reputation.record_rating(user, rating).await?;
        Ok(record.score)
    }

    pub async fn score_of(&self, user: AccountId) -> u8 {
        self.reputation.score_of(user).await
    }

    pub async fn post_message(&self, escrow: EscrowId, text: String) {
        self.history.add_message(escrow, text).await;
    }

    pub async fn post_proposal(&self, escrow: EscrowId, text: String) {
        self.history.add_proposal(escrow, text).await;
    }

    // Introspection.

    pub async fn get_escrow(&self, id: EscrowId) -> Option<Escrow> {
        self.escrows.get_escrow(id).await
    }

    pub async fn get_dispute(&self, id: &DisputeId) -> Option<Dispute> {
        self.disputes.get_dispute(id).await
    }

    pub async fn get_claim(&self, id: &ClaimId) -> Option<Claim> {
        self.claims.get_claim(id).await
    }

    pub async fn market_stats(&self) -> MarketStats {
        MarketStats {
            escrows: self.escrows.stats().await,
            stakes: self.stakes.stats().await,
            disputes: self.disputes.stats().await,
            claims: self.claims.stats().await,
            reputation: self.reputation.stats().await,
            reviewer_pool: self.pool.stats().await,
            events_emitted: self.bus.emitted_count(),
        }
    }

    /// Prometheus exposition text for every counter this marketplace owns.
    pub fn metrics_text(&self) -> anyhow::Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Spawns the background sweeper that expires stale escrows, claims,
    /// and dispute review windows. The caller owns the handle.
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let escrows = self.escrows.clone();
        let claims = self.claims.clone();
        let disputes = self.disputes.clone();
        let period = std::time::Duration::from_secs(self.config.sweep_interval_secs.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = Utc::now();
                let expired_escrows = escrows.sweep_expired(now).await;
                let expired_claims = claims.sweep_expired(now).await;
                let expired_disputes = disputes.sweep_expired(now).await;
                if expired_escrows + expired_claims + expired_disputes > 0 {
                    debug!(
                        "🧹 Sweep: {} escrows, {} claims, {} disputes expired",
                        expired_escrows, expired_claims, expired_disputes
                    );
                }
            }
        })
    }

    /// Stops the reputation bridge. Pending escrows and balances survive;
    /// only event-driven scoring halts.
    pub fn shutdown(&self) {
        self.bridge.abort();
        info!("🛑 Marketplace background tasks stopped");
    }
}
