use crate::error::{EscrowError, Result};
use crate::stake::StakeRegistry;
use crate::types::{Escrow, EscrowConfig, EscrowStats, FeePolicy, Milestone, MilestoneSpec};
use chrono::{DateTime, Duration, Utc};
use gild_disputes::advisor::redact;
use gild_disputes::{build_evidence, DisputeEvidence, DisputeManager, EvidenceConfig, ProjectHistory};
use gild_events::{EventBus, MarketEvent};
use gild_ledger::{AccountId, Amount, CustodyLedger, TransferReason};
use gild_types::{DisputeId, DisputeOutcome, EscrowId, EscrowState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Escrow lifecycle manager.
///
/// Every mutation follows validate, move custody, commit: the record only
/// advances after the custody leg has committed, and a custody failure
/// leaves the record untouched. Each escrow is serialized behind its own
/// lock so two operations on the same record never interleave.
pub struct EscrowManager {
    config: RwLock<EscrowConfig>,
    ledger: Arc<CustodyLedger>,
    stakes: Arc<StakeRegistry>,
    disputes: Arc<DisputeManager>,
    bus: Arc<EventBus>,
    history: Option<Arc<dyn ProjectHistory>>,
    evidence_config: EvidenceConfig,
    escrows: Arc<RwLock<HashMap<EscrowId, Arc<Mutex<Escrow>>>>>,
    next_id: AtomicU64,
    metrics_created: Option<Arc<prometheus::IntCounter>>,
    metrics_completed: Option<Arc<prometheus::IntCounter>>,
    metrics_cancelled: Option<Arc<prometheus::IntCounter>>,
    metrics_disputed: Option<Arc<prometheus::IntCounter>>,
}

impl EscrowManager {
    pub fn new(
        config: EscrowConfig,
        ledger: Arc<CustodyLedger>,
        stakes: Arc<StakeRegistry>,
        disputes: Arc<DisputeManager>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            ledger,
            stakes,
            disputes,
            bus,
            history: None,
            evidence_config: EvidenceConfig::default(),
            escrows: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            metrics_created: None,
            metrics_completed: None,
            metrics_cancelled: None,
            metrics_disputed: None,
        }
    }

    /// Wires the conversation source used to assemble dispute evidence.
    pub fn set_history(&mut self, history: Arc<dyn ProjectHistory>) {
        self.history = Some(history);
    }

    pub fn set_metrics(
        &mut self,
        created: Arc<prometheus::IntCounter>,
        completed: Arc<prometheus::IntCounter>,
        cancelled: Arc<prometheus::IntCounter>,
        disputed: Arc<prometheus::IntCounter>,
    ) {
        self.metrics_created = Some(created);
        self.metrics_completed = Some(completed);
        self.metrics_cancelled = Some(cancelled);
        self.metrics_disputed = Some(disputed);
    }

    /// Swaps in a new fee schedule. In-flight escrows keep the version
    /// they were created under.
    pub async fn set_fee_policy(&self, fee: FeePolicy) {
        let mut config = self.config.write().await;
        info!(
            "Fee policy updated: {} bps (v{}) -> {} bps (v{})",
            config.fee.bps, config.fee.version, fee.bps, fee.version
        );
        config.fee = fee;
    }

    pub async fn set_treasury(&self, treasury: AccountId) {
        let mut config = self.config.write().await;
        info!("Treasury account updated to {}", treasury);
        config.treasury = treasury;
    }

    pub async fn fee_policy(&self) -> FeePolicy {
        self.config.read().await.fee
    }

    /// Creates an escrow and moves the full amount into custody.
    pub async fn create_escrow(
        &self,
        client: AccountId,
        description: String,
        total: Amount,
        milestones: Vec<MilestoneSpec>,
        deadline: Option<DateTime<Utc>>,
    ) -> Result<EscrowId> {
        let config = self.config.read().await.clone();
        let now = Utc::now();

        if total.is_zero() {
            return Err(EscrowError::InvalidAmount(
                "escrow total must be positive".into(),
            ));
        }
        if !self.stakes.meets_requirement(client).await {
            return Err(EscrowError::InsufficientStake {
                required: self.stakes.min_stake(),
                staked: self.stakes.stake_of(client).await,
            });
        }
        if let Some(until) = self.stakes.in_cooldown(client, now).await {
            return Err(EscrowError::CooldownActive { until });
        }
        if self.stakes.active_count(client).await as usize >= config.max_active_escrows {
            return Err(EscrowError::ActiveEscrowLimit {
                limit: config.max_active_escrows,
            });
        }
        if !self.stakes.is_verified(client).await && total > config.unverified_value_cap {
            return Err(EscrowError::ValueCapExceeded {
                cap: config.unverified_value_cap,
                requested: total,
            });
        }
        if !milestones.is_empty() {
            if milestones.iter().any(|m| m.amount.is_zero()) {
                return Err(EscrowError::InvalidAmount(
                    "milestone amounts must be positive".into(),
                ));
            }
            let sum: Amount = milestones.iter().map(|m| m.amount).sum();
            if sum != total {
                return Err(EscrowError::MilestoneSumMismatch { total, sum });
            }
        }

        let available = self
            .ledger
            .unlocked_balance(client)
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;
        if available < total {
            return Err(EscrowError::InsufficientFunds {
                required: total,
                available,
            });
        }
        self.ledger
            .transfer(
                client,
                AccountId::custody_vault(),
                total,
                TransferReason::EscrowFunding,
            )
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;

        let id = EscrowId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let escrow = Escrow {
            id,
            client,
            assignee: None,
            description,
            total,
            released: Amount::ZERO,
            milestones: milestones.into_iter().map(Milestone::from_spec).collect(),
            state: EscrowState::Open,
            dispute: None,
            fee: config.fee,
            version: 0,
            created_at: now,
            deadline: deadline
                .unwrap_or_else(|| now + Duration::hours(config.default_lifetime_hours)),
            last_activity: now,
        };
        let milestone_count = escrow.milestones.len();

        self.escrows
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(escrow)));
        self.stakes.note_escrow_opened(client).await;
        self.stakes
            .start_cooldown(client, now + Duration::seconds(config.creation_cooldown_secs))
            .await;

        info!(
            "🤝 Escrow {} created by {} for {} ({} milestones)",
            id, client, total, milestone_count
        );
        self.bus.emit(MarketEvent::EscrowCreated {
            escrow_id: id.to_string(),
            client: client.to_hex(),
            total: total.as_units(),
            milestones: milestone_count,
            timestamp: now,
        });
        if let Some(m) = &self.metrics_created {
            m.inc();
        }
        Ok(id)
    }

    async fn record(&self, id: EscrowId) -> Result<Arc<Mutex<Escrow>>> {
        self.escrows
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(EscrowError::NotFound(id))
    }

    /// Client accepts a counterparty onto an open escrow.
    pub async fn accept_party(
        &self,
        id: EscrowId,
        caller: AccountId,
        assignee: AccountId,
    ) -> Result<()> {
        let config = self.config.read().await.clone();
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if escrow.state != EscrowState::Open {
            return Err(EscrowError::InvalidState {
                operation: "accept a party",
                state: escrow.state,
            });
        }
        if Utc::now() > escrow.deadline {
            return Err(EscrowError::Expired(id));
        }
        if caller != escrow.client {
            return Err(EscrowError::NotClient(caller.to_string()));
        }
        if assignee == escrow.client {
            return Err(EscrowError::SelfDeal);
        }
        if !self.stakes.meets_requirement(assignee).await {
            return Err(EscrowError::InsufficientStake {
                required: self.stakes.min_stake(),
                staked: self.stakes.stake_of(assignee).await,
            });
        }
        if self.stakes.active_count(assignee).await as usize >= config.max_active_escrows {
            return Err(EscrowError::ActiveEscrowLimit {
                limit: config.max_active_escrows,
            });
        }

        escrow.assignee = Some(assignee);
        escrow.state = EscrowState::InProgress;
        escrow.version += 1;
        escrow.last_activity = Utc::now();
        self.stakes.note_escrow_opened(assignee).await;

        info!("👷 Escrow {}: {} accepted as assignee", id, assignee);
        self.emit_state_change(&escrow, EscrowState::Open, caller);
        Ok(())
    }

    /// Assignee marks the work as delivered.
    pub async fn submit_work(&self, id: EscrowId, caller: AccountId) -> Result<()> {
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if escrow.state != EscrowState::InProgress {
            return Err(EscrowError::InvalidState {
                operation: "submit work",
                state: escrow.state,
            });
        }
        if escrow.assignee != Some(caller) {
            return Err(EscrowError::NotAssignee(caller.to_string()));
        }

        escrow.state = EscrowState::Submitted;
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        info!("📤 Escrow {}: work submitted by {}", id, caller);
        self.emit_state_change(&escrow, EscrowState::InProgress, caller);
        Ok(())
    }

    /// Releases one milestone: amount minus fee to the assignee, fee to
    /// the treasury. The final milestone completes the escrow.
    pub async fn complete_milestone(
        &self,
        id: EscrowId,
        caller: AccountId,
        index: usize,
    ) -> Result<Amount> {
        let treasury = self.config.read().await.treasury;
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if !matches!(
            escrow.state,
            EscrowState::InProgress | EscrowState::Submitted
        ) {
            return Err(EscrowError::InvalidState {
                operation: "complete a milestone",
                state: escrow.state,
            });
        }
        if caller != escrow.client {
            return Err(EscrowError::NotClient(caller.to_string()));
        }
        let assignee = escrow.assignee.ok_or(EscrowError::NoAssignee)?;
        let count = escrow.milestones.len();
        let milestone = escrow
            .milestones
            .get(index)
            .ok_or(EscrowError::MilestoneOutOfRange { index, count })?;
        if milestone.completed {
            return Err(EscrowError::MilestoneAlreadyCompleted(index));
        }

        let amount = milestone.amount;
        let fee = escrow.fee.fee_for(amount);
        let net = amount.saturating_sub(fee);
        self.ledger
            .disburse(
                AccountId::custody_vault(),
                &[
                    (assignee, net, TransferReason::MilestoneRelease),
                    (treasury, fee, TransferReason::PlatformFee),
                ],
            )
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;

        let milestone = &mut escrow.milestones[index];
        milestone.completed = true;
        milestone.approved = true;
        milestone.completed_at = Some(Utc::now());
        escrow.released = escrow.released.saturating_add(amount);
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        info!(
            "💰 Escrow {}: milestone {} released, {} to {} ({} fee)",
            id, index, net, assignee, fee
        );

        if escrow.all_milestones_completed() {
            self.finalize_complete(&mut escrow).await;
        }
        Ok(net)
    }

    /// Releases everything still in custody and completes the escrow.
    pub async fn complete_project(&self, id: EscrowId, caller: AccountId) -> Result<Amount> {
        let treasury = self.config.read().await.treasury;
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if !matches!(
            escrow.state,
            EscrowState::InProgress | EscrowState::Submitted
        ) {
            return Err(EscrowError::InvalidState {
                operation: "complete the project",
                state: escrow.state,
            });
        }
        if caller != escrow.client {
            return Err(EscrowError::NotClient(caller.to_string()));
        }
        let assignee = escrow.assignee.ok_or(EscrowError::NoAssignee)?;

        let remaining = escrow.remaining();
        let fee = escrow.fee.fee_for(remaining);
        let net = remaining.saturating_sub(fee);
        if !remaining.is_zero() {
            self.ledger
                .disburse(
                    AccountId::custody_vault(),
                    &[
                        (assignee, net, TransferReason::ProjectRelease),
                        (treasury, fee, TransferReason::PlatformFee),
                    ],
                )
                .await
                .map_err(|e| EscrowError::Custody(e.to_string()))?;
        }

        escrow.released = escrow.total;
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        info!(
            "💰 Escrow {}: project completed, {} to {} ({} fee)",
            id, net, assignee, fee
        );
        self.finalize_complete(&mut escrow).await;
        Ok(net)
    }

    /// Cancels an escrow before delivery. The client gets everything not
    /// yet released back, with no fee taken.
    pub async fn cancel_escrow(&self, id: EscrowId, caller: AccountId) -> Result<Amount> {
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if !matches!(escrow.state, EscrowState::Open | EscrowState::InProgress) {
            return Err(EscrowError::InvalidState {
                operation: "cancel",
                state: escrow.state,
            });
        }
        if caller != escrow.client {
            return Err(EscrowError::NotClient(caller.to_string()));
        }

        let refund = escrow.remaining();
        if !refund.is_zero() {
            self.ledger
                .transfer(
                    AccountId::custody_vault(),
                    escrow.client,
                    refund,
                    TransferReason::Refund,
                )
                .await
                .map_err(|e| EscrowError::Custody(e.to_string()))?;
        }

        escrow.released = escrow.total;
        escrow.state = EscrowState::Cancelled;
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        self.stakes.note_escrow_closed(escrow.client, false).await;
        if let Some(assignee) = escrow.assignee {
            self.stakes.note_escrow_closed(assignee, false).await;
        }

        info!("🚫 Escrow {} cancelled, {} refunded to {}", id, refund, escrow.client);
        self.bus.emit(MarketEvent::EscrowCancelled {
            escrow_id: id.to_string(),
            client: escrow.client.to_hex(),
            refunded: refund.as_units(),
            timestamp: Utc::now(),
        });
        if let Some(m) = &self.metrics_cancelled {
            m.inc();
        }
        Ok(refund)
    }

    /// Either party escalates to adjudication. The escrow freezes in
    /// `Disputed` until the panel (or a mediator) produces an outcome.
    pub async fn raise_dispute(
        &self,
        id: EscrowId,
        caller: AccountId,
        reason: String,
    ) -> Result<DisputeId> {
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if !matches!(
            escrow.state,
            EscrowState::InProgress | EscrowState::Submitted
        ) {
            return Err(EscrowError::InvalidState {
                operation: "raise a dispute",
                state: escrow.state,
            });
        }
        if !escrow.is_party(&caller) {
            return Err(EscrowError::NotParty(caller.to_string()));
        }
        if escrow.dispute.is_some() {
            return Err(EscrowError::DisputeAlreadyOpen(id));
        }
        let assignee = escrow.assignee.ok_or(EscrowError::NoAssignee)?;
        let respondent = if caller == escrow.client {
            assignee
        } else {
            escrow.client
        };

        let evidence = self.gather_evidence(&escrow).await;
        let dispute_id = self
            .disputes
            .open_dispute(id, caller, respondent, reason, evidence)
            .await?;

        escrow.state = EscrowState::Disputed;
        escrow.dispute = Some(dispute_id);
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        info!("⚖️ Escrow {} disputed by {} (dispute {})", id, caller, dispute_id);
        self.bus.emit(MarketEvent::DisputeOpened {
            escrow_id: id.to_string(),
            dispute_id: dispute_id.to_string(),
            claimant: caller.to_hex(),
            respondent: respondent.to_hex(),
            timestamp: Utc::now(),
        });
        if let Some(m) = &self.metrics_disputed {
            m.inc();
        }
        Ok(dispute_id)
    }

    /// Evidence bundle for adjudication. A history outage degrades to a
    /// description-only bundle rather than blocking the dispute.
    async fn gather_evidence(&self, escrow: &Escrow) -> DisputeEvidence {
        let description_only = DisputeEvidence {
            project_description: redact(&escrow.description),
            messages: Vec::new(),
            proposals: Vec::new(),
        };
        match &self.history {
            Some(history) => {
                match build_evidence(
                    history.as_ref(),
                    escrow.id,
                    &escrow.description,
                    &self.evidence_config,
                )
                .await
                {
                    Ok(bundle) => bundle,
                    Err(e) => {
                        warn!("Evidence assembly for {} degraded: {}", escrow.id, e);
                        description_only
                    }
                }
            }
            None => description_only,
        }
    }

    /// Executes the binding outcome of a resolved dispute: the platform
    /// fee comes off the remainder, the rest goes where the panel said,
    /// and the escrow completes.
    pub async fn resolve_dispute(&self, id: EscrowId) -> Result<DisputeOutcome> {
        let treasury = self.config.read().await.treasury;
        let record = self.record(id).await?;
        let mut escrow = record.lock().await;

        if escrow.state != EscrowState::Disputed {
            return Err(EscrowError::InvalidState {
                operation: "resolve a dispute",
                state: escrow.state,
            });
        }
        let dispute_id = escrow.dispute.ok_or(EscrowError::NoOpenDispute)?;
        let assignee = escrow.assignee.ok_or(EscrowError::NoAssignee)?;
        let resolution = self
            .disputes
            .resolution_of(&dispute_id)
            .await
            .ok_or(EscrowError::DisputeUnresolved(dispute_id))?;

        let remaining = escrow.remaining();
        let fee = escrow.fee.fee_for(remaining);
        let distributable = remaining.saturating_sub(fee);

        let mut legs: Vec<(AccountId, Amount, TransferReason)> = match resolution.outcome {
            DisputeOutcome::FullToClient => {
                vec![(escrow.client, distributable, TransferReason::DisputeSplit)]
            }
            DisputeOutcome::FullToAssignee => {
                vec![(assignee, distributable, TransferReason::DisputeSplit)]
            }
            DisputeOutcome::EvenSplit => {
                // The odd unit goes to the client.
                let assignee_share = distributable.half();
                let client_share = distributable.saturating_sub(assignee_share);
                vec![
                    (escrow.client, client_share, TransferReason::DisputeSplit),
                    (assignee, assignee_share, TransferReason::DisputeSplit),
                ]
            }
        };
        legs.push((treasury, fee, TransferReason::PlatformFee));

        self.ledger
            .disburse(AccountId::custody_vault(), &legs)
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;

        escrow.released = escrow.total;
        escrow.state = EscrowState::Completed;
        escrow.version += 1;
        escrow.last_activity = Utc::now();

        self.stakes.note_escrow_closed(escrow.client, false).await;
        self.stakes.note_escrow_closed(assignee, false).await;

        info!(
            "✅ Escrow {} dispute executed: {} ({} distributed, {} fee)",
            id,
            resolution.outcome.as_str(),
            distributable,
            fee
        );
        self.bus.emit(MarketEvent::DisputeResolved {
            escrow_id: id.to_string(),
            dispute_id: dispute_id.to_string(),
            outcome: resolution.outcome.as_str().to_string(),
            client: escrow.client.to_hex(),
            assignee: assignee.to_hex(),
            timestamp: Utc::now(),
        });
        if let Some(m) = &self.metrics_completed {
            m.inc();
        }
        Ok(resolution.outcome)
    }

    /// Cancels listings nobody accepted before their deadline, refunding
    /// the client in full.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let records: Vec<Arc<Mutex<Escrow>>> =
            self.escrows.read().await.values().cloned().collect();
        let mut swept = 0;

        for record in records {
            let mut escrow = record.lock().await;
            if escrow.state != EscrowState::Open || now <= escrow.deadline {
                continue;
            }
            let refund = escrow.remaining();
            if !refund.is_zero() {
                if let Err(e) = self
                    .ledger
                    .transfer(
                        AccountId::custody_vault(),
                        escrow.client,
                        refund,
                        TransferReason::Refund,
                    )
                    .await
                {
                    warn!("Refund for expired escrow {} failed: {}", escrow.id, e);
                    continue;
                }
            }
            escrow.released = escrow.total;
            escrow.state = EscrowState::Cancelled;
            escrow.version += 1;
            self.stakes.note_escrow_closed(escrow.client, false).await;

            self.bus.emit(MarketEvent::EscrowCancelled {
                escrow_id: escrow.id.to_string(),
                client: escrow.client.to_hex(),
                refunded: refund.as_units(),
                timestamp: now,
            });
            if let Some(m) = &self.metrics_cancelled {
                m.inc();
            }
            swept += 1;
        }

        if swept > 0 {
            warn!("Swept {} expired escrow listings", swept);
        }
        swept
    }

    async fn finalize_complete(&self, escrow: &mut Escrow) {
        escrow.state = EscrowState::Completed;
        escrow.version += 1;

        self.stakes.note_escrow_closed(escrow.client, true).await;
        let assignee_hex = match escrow.assignee {
            Some(assignee) => {
                self.stakes.note_escrow_closed(assignee, true).await;
                assignee.to_hex()
            }
            None => String::new(),
        };

        info!("🎉 Escrow {} completed ({} released)", escrow.id, escrow.released);
        self.bus.emit(MarketEvent::EscrowCompleted {
            escrow_id: escrow.id.to_string(),
            client: escrow.client.to_hex(),
            assignee: assignee_hex,
            total: escrow.total.as_units(),
            timestamp: Utc::now(),
        });
        if let Some(m) = &self.metrics_completed {
            m.inc();
        }
    }

    fn emit_state_change(&self, escrow: &Escrow, from: EscrowState, actor: AccountId) {
        self.bus.emit(MarketEvent::EscrowStateChanged {
            escrow_id: escrow.id.to_string(),
            from_state: from.as_str().to_string(),
            to_state: escrow.state.as_str().to_string(),
            actor: actor.to_hex(),
            timestamp: Utc::now(),
        });
    }

    pub async fn get_escrow(&self, id: EscrowId) -> Option<Escrow> {
        let record = self.escrows.read().await.get(&id).cloned()?;
        let escrow = record.lock().await;
        Some(escrow.clone())
    }

    pub async fn escrows_for(&self, account: AccountId) -> Vec<Escrow> {
        let records: Vec<Arc<Mutex<Escrow>>> =
            self.escrows.read().await.values().cloned().collect();
        let mut result = Vec::new();
        for record in records {
            let escrow = record.lock().await;
            if escrow.is_party(&account) {
                result.push(escrow.clone());
            }
        }
        result.sort_by_key(|e| e.id);
        result
    }

    pub async fn stats(&self) -> EscrowStats {
        let records: Vec<Arc<Mutex<Escrow>>> =
            self.escrows.read().await.values().cloned().collect();
        let mut stats = EscrowStats {
            total_escrows: records.len(),
            open: 0,
            in_progress: 0,
            submitted: 0,
            disputed: 0,
            completed: 0,
            cancelled: 0,
            value_in_custody: Amount::ZERO,
        };
        for record in records {
            let escrow = record.lock().await;
            match escrow.state {
                EscrowState::Open => stats.open += 1,
                EscrowState::InProgress => stats.in_progress += 1,
                EscrowState::Submitted => stats.submitted += 1,
                EscrowState::Disputed => stats.disputed += 1,
                EscrowState::Completed => stats.completed += 1,
                EscrowState::Cancelled => stats.cancelled += 1,
            }
            stats.value_in_custody = stats.value_in_custody.saturating_add(escrow.remaining());
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gild_disputes::{DisputeConfig, ReviewerPool};
    use gild_ledger::MemoryLedgerStorage;

    fn acct(b: u8) -> AccountId {
        AccountId::from_bytes([b; 32])
    }

    struct Harness {
        manager: EscrowManager,
        ledger: Arc<CustodyLedger>,
        stakes: Arc<StakeRegistry>,
        disputes: Arc<DisputeManager>,
    }

    async fn harness(config: EscrowConfig) -> Harness {
        let ledger = Arc::new(CustodyLedger::new(Arc::new(MemoryLedgerStorage::new())));
        let stakes = Arc::new(StakeRegistry::new(ledger.clone(), config.min_stake));

        let pool = Arc::new(ReviewerPool::new(0.0));
        for b in 200..=205u8 {
            pool.authorize(acct(b), 80.0).await.unwrap();
        }
        let disputes = Arc::new(DisputeManager::with_default_advisor(
            DisputeConfig::default(),
            pool,
        ));

        let manager = EscrowManager::new(
            config,
            ledger.clone(),
            stakes.clone(),
            disputes.clone(),
            Arc::new(EventBus::new()),
        );
        Harness {
            manager,
            ledger,
            stakes,
            disputes,
        }
    }

    async fn fund_and_stake(h: &Harness, account: AccountId, balance: u64, stake: u64) {
        h.ledger
            .credit(account, Amount::from_units(balance))
            .await
            .unwrap();
        h.stakes
            .deposit(account, Amount::from_units(stake))
            .await
            .unwrap();
    }

    fn no_cooldown() -> EscrowConfig {
        EscrowConfig {
            creation_cooldown_secs: 0,
            ..Default::default()
        }
    }

    fn milestones_400_600() -> Vec<MilestoneSpec> {
        vec![
            MilestoneSpec {
                description: "first deliverable".into(),
                amount: Amount::from_units(400),
                deadline: None,
            },
            MilestoneSpec {
                description: "final deliverable".into(),
                amount: Amount::from_units(600),
                deadline: None,
            },
        ]
    }

    #[tokio::test]
    async fn test_create_moves_funds_to_custody() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        fund_and_stake(&h, client, 5_000, 100).await;

        let id = h
            .manager
            .create_escrow(client, "logo".into(), Amount::from_units(1_000), vec![], None)
            .await
            .unwrap();

        assert_eq!(
            h.ledger.balance_of(AccountId::custody_vault()).await.unwrap(),
            Amount::from_units(1_000)
        );
        let escrow = h.manager.get_escrow(id).await.unwrap();
        assert_eq!(escrow.state, EscrowState::Open);
        assert_eq!(escrow.remaining(), Amount::from_units(1_000));
        assert_eq!(h.stakes.active_count(client).await, 1);
    }

    #[tokio::test]
    async fn test_create_requires_stake_or_verified() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        h.ledger
            .credit(client, Amount::from_units(5_000))
            .await
            .unwrap();

        let bare = h
            .manager
            .create_escrow(client, "x".into(), Amount::from_units(500), vec![], None)
            .await;
        assert!(matches!(bare, Err(EscrowError::InsufficientStake { .. })));

        h.stakes.set_verified(client, true).await;
        h.manager
            .create_escrow(client, "x".into(), Amount::from_units(500), vec![], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_milestone_sum_must_match_total() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        fund_and_stake(&h, client, 5_000, 100).await;

        let result = h
            .manager
            .create_escrow(
                client,
                "x".into(),
                Amount::from_units(1_001),
                milestones_400_600(),
                None,
            )
            .await;
        assert!(matches!(
            result,
            Err(EscrowError::MilestoneSumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_creation_cooldown_enforced() {
        let h = harness(EscrowConfig::default()).await;
        let client = acct(1);
        fund_and_stake(&h, client, 5_000, 100).await;

        h.manager
            .create_escrow(client, "a".into(), Amount::from_units(100), vec![], None)
            .await
            .unwrap();
        let second = h
            .manager
            .create_escrow(client, "b".into(), Amount::from_units(100), vec![], None)
            .await;
        assert!(matches!(second, Err(EscrowError::CooldownActive { .. })));
    }

    #[tokio::test]
    async fn test_active_escrow_limit() {
        let h = harness(EscrowConfig {
            max_active_escrows: 2,
            ..no_cooldown()
        })
        .await;
        let client = acct(1);
        fund_and_stake(&h, client, 10_000, 100).await;

        for label in ["a", "b"] {
            h.manager
                .create_escrow(client, label.into(), Amount::from_units(100), vec![], None)
                .await
                .unwrap();
        }
        let third = h
            .manager
            .create_escrow(client, "c".into(), Amount::from_units(100), vec![], None)
            .await;
        assert!(matches!(
            third,
            Err(EscrowError::ActiveEscrowLimit { limit: 2 })
        ));
    }

    #[tokio::test]
    async fn test_unverified_value_cap() {
        let h = harness(EscrowConfig {
            unverified_value_cap: Amount::from_units(1_000),
            ..no_cooldown()
        })
        .await;
        let client = acct(1);
        fund_and_stake(&h, client, 50_000, 100).await;

        let capped = h
            .manager
            .create_escrow(client, "big".into(), Amount::from_units(2_000), vec![], None)
            .await;
        assert!(matches!(capped, Err(EscrowError::ValueCapExceeded { .. })));

        h.stakes.set_verified(client, true).await;
        h.manager
            .create_escrow(client, "big".into(), Amount::from_units(2_000), vec![], None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_milestone_flow_completes_escrow() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(
                client,
                "site build".into(),
                Amount::from_units(1_000),
                milestones_400_600(),
                None,
            )
            .await
            .unwrap();

        h.manager.accept_party(id, client, worker).await.unwrap();
        h.manager.submit_work(id, worker).await.unwrap();

        let first = h.manager.complete_milestone(id, client, 0).await.unwrap();
        assert_eq!(first, Amount::from_units(390));
        assert_eq!(
            h.manager.get_escrow(id).await.unwrap().state,
            EscrowState::Submitted
        );

        let second = h.manager.complete_milestone(id, client, 1).await.unwrap();
        assert_eq!(second, Amount::from_units(585));

        let escrow = h.manager.get_escrow(id).await.unwrap();
        assert_eq!(escrow.state, EscrowState::Completed);
        assert_eq!(escrow.remaining(), Amount::ZERO);
        assert_eq!(
            h.ledger.balance_of(worker).await.unwrap(),
            Amount::from_units(200 + 390 + 585)
        );
        assert_eq!(
            h.ledger.balance_of(AccountId::treasury()).await.unwrap(),
            Amount::from_units(25)
        );
        assert_eq!(
            h.ledger.balance_of(AccountId::custody_vault()).await.unwrap(),
            Amount::ZERO
        );
        // Clean completion feeds the authoritative counters.
        assert_eq!(
            h.stakes.record_of(client).await.unwrap().completed_escrows,
            1
        );
        assert_eq!(
            h.stakes.record_of(worker).await.unwrap().completed_escrows,
            1
        );
        assert_eq!(h.stakes.active_count(client).await, 0);
    }

    #[tokio::test]
    async fn test_milestone_releases_exactly_once() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(
                client,
                "x".into(),
                Amount::from_units(1_000),
                milestones_400_600(),
                None,
            )
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();

        h.manager.complete_milestone(id, client, 0).await.unwrap();
        // A partial release pays out without advancing the lifecycle.
        let record = h.manager.get_escrow(id).await.unwrap();
        assert_eq!(record.state, EscrowState::InProgress);
        assert!(record.milestones[0].completed && record.milestones[0].approved);
        assert!(!record.milestones[1].completed);
        let repeat = h.manager.complete_milestone(id, client, 0).await;
        assert!(matches!(
            repeat,
            Err(EscrowError::MilestoneAlreadyCompleted(0))
        ));
        assert_eq!(
            h.ledger.balance_of(worker).await.unwrap(),
            Amount::from_units(200 + 390)
        );
    }

    #[tokio::test]
    async fn test_authorization_checks() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        let stranger = acct(3);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(client, "x".into(), Amount::from_units(500), vec![], None)
            .await
            .unwrap();

        let not_client = h.manager.accept_party(id, worker, worker).await;
        assert!(matches!(not_client, Err(EscrowError::NotClient(_))));

        h.manager.accept_party(id, client, worker).await.unwrap();

        let not_assignee = h.manager.submit_work(id, client).await;
        assert!(matches!(not_assignee, Err(EscrowError::NotAssignee(_))));

        let not_party = h.manager.raise_dispute(id, stranger, "why".into()).await;
        assert!(matches!(not_party, Err(EscrowError::NotParty(_))));
    }

    #[tokio::test]
    async fn test_cancel_refunds_in_full() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(client, "x".into(), Amount::from_units(1_000), vec![], None)
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();

        let refund = h.manager.cancel_escrow(id, client).await.unwrap();
        assert_eq!(refund, Amount::from_units(1_000));
        // No fee on cancellation.
        assert_eq!(
            h.ledger.balance_of(AccountId::treasury()).await.unwrap(),
            Amount::ZERO
        );
        assert_eq!(
            h.ledger.balance_of(client).await.unwrap(),
            Amount::from_units(5_000)
        );
        assert_eq!(h.stakes.active_count(client).await, 0);
        assert_eq!(h.stakes.active_count(worker).await, 0);
        assert_eq!(
            h.stakes.record_of(client).await.unwrap().completed_escrows,
            0
        );
    }

    #[tokio::test]
    async fn test_cancel_after_submission_refused() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(client, "x".into(), Amount::from_units(500), vec![], None)
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();
        h.manager.submit_work(id, worker).await.unwrap();

        let result = h.manager.cancel_escrow(id, client).await;
        assert!(matches!(result, Err(EscrowError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_dispute_flow_even_split() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(client, "app".into(), Amount::from_units(1_000), vec![], None)
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();
        h.manager.submit_work(id, worker).await.unwrap();

        let dispute_id = h
            .manager
            .raise_dispute(id, client, "half the screens are missing".into())
            .await
            .unwrap();
        assert_eq!(
            h.manager.get_escrow(id).await.unwrap().state,
            EscrowState::Disputed
        );

        let duplicate = h.manager.raise_dispute(id, worker, "countersuit".into()).await;
        assert!(matches!(duplicate, Err(EscrowError::InvalidState { .. })));

        // Execution before the panel decides is refused.
        let premature = h.manager.resolve_dispute(id).await;
        assert!(matches!(premature, Err(EscrowError::DisputeUnresolved(_))));

        let dispute = h.disputes.get_dispute(&dispute_id).await.unwrap();
        for reviewer in &dispute.reviewers {
            h.disputes
                .cast_vote(dispute_id, *reviewer, DisputeOutcome::EvenSplit)
                .await
                .unwrap();
        }

        let outcome = h.manager.resolve_dispute(id).await.unwrap();
        assert_eq!(outcome, DisputeOutcome::EvenSplit);

        // 1000 remaining: 25 fee, 975 split as 488 client / 487 assignee.
        assert_eq!(
            h.ledger.balance_of(client).await.unwrap(),
            Amount::from_units(4_000 + 488)
        );
        assert_eq!(
            h.ledger.balance_of(worker).await.unwrap(),
            Amount::from_units(200 + 487)
        );
        assert_eq!(
            h.ledger.balance_of(AccountId::treasury()).await.unwrap(),
            Amount::from_units(25)
        );
        assert_eq!(
            h.ledger.balance_of(AccountId::custody_vault()).await.unwrap(),
            Amount::ZERO
        );

        let escrow = h.manager.get_escrow(id).await.unwrap();
        assert_eq!(escrow.state, EscrowState::Completed);
        // Adjudicated endings carry no completion credit.
        assert_eq!(
            h.stakes.record_of(client).await.unwrap().completed_escrows,
            0
        );
    }

    #[tokio::test]
    async fn test_dispute_after_partial_release_covers_remainder_only() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(
                client,
                "site".into(),
                Amount::from_units(1_000),
                milestones_400_600(),
                None,
            )
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();
        h.manager.complete_milestone(id, client, 0).await.unwrap();

        let dispute_id = h
            .manager
            .raise_dispute(id, worker, "client refuses the final milestone".into())
            .await
            .unwrap();
        let dispute = h.disputes.get_dispute(&dispute_id).await.unwrap();
        for reviewer in &dispute.reviewers {
            h.disputes
                .cast_vote(dispute_id, *reviewer, DisputeOutcome::FullToAssignee)
                .await
                .unwrap();
        }
        h.manager.resolve_dispute(id).await.unwrap();

        // Remainder 600: fee 15, assignee gets 585 on top of milestone 390.
        assert_eq!(
            h.ledger.balance_of(worker).await.unwrap(),
            Amount::from_units(200 + 390 + 585)
        );
        assert_eq!(
            h.ledger.balance_of(AccountId::treasury()).await.unwrap(),
            Amount::from_units(10 + 15)
        );
    }

    #[tokio::test]
    async fn test_expired_listing_swept_with_refund() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        fund_and_stake(&h, client, 5_000, 100).await;

        let id = h
            .manager
            .create_escrow(
                client,
                "stale".into(),
                Amount::from_units(1_000),
                vec![],
                Some(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();

        let accept = h.manager.accept_party(id, client, acct(2)).await;
        assert!(matches!(accept, Err(EscrowError::Expired(_))));

        let swept = h.manager.sweep_expired(Utc::now()).await;
        assert_eq!(swept, 1);
        let escrow = h.manager.get_escrow(id).await.unwrap();
        assert_eq!(escrow.state, EscrowState::Cancelled);
        assert_eq!(
            h.ledger.balance_of(client).await.unwrap(),
            Amount::from_units(5_000)
        );

        // A second sweep finds nothing.
        assert_eq!(h.manager.sweep_expired(Utc::now()).await, 0);
    }

    #[tokio::test]
    async fn test_fee_policy_frozen_at_creation() {
        let h = harness(no_cooldown()).await;
        let client = acct(1);
        let worker = acct(2);
        fund_and_stake(&h, client, 5_000, 100).await;
        fund_and_stake(&h, worker, 200, 100).await;

        let id = h
            .manager
            .create_escrow(client, "x".into(), Amount::from_units(1_000), vec![], None)
            .await
            .unwrap();
        h.manager.accept_party(id, client, worker).await.unwrap();

        // Fee doubles after creation; this escrow keeps 250 bps.
        h.manager
            .set_fee_policy(FeePolicy { bps: 500, version: 2 })
            .await;

        let net = h.manager.complete_project(id, client).await.unwrap();
        assert_eq!(net, Amount::from_units(975));
    }
}
