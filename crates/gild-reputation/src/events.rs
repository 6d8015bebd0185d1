//! Append-only reputation event log.
//!
//! Events are immutable once written. Their influence on the composite
//! score fades through time decay only; nothing edits or deletes them.

use chrono::{DateTime, Utc};
use gild_ledger::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Enumerated behavioral signals that feed the event-score component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReputationEventKind {
    RatingReceived,
    EscrowCompleted,
    EscrowCancelled,
    ProposalAccepted,
    DisputeWon,
    DisputeLost,
    ClaimApproved,
    ClaimRejected,
    StakeSlashed,
}

impl ReputationEventKind {
    /// Default multiplier applied to this kind's delta.
    pub fn default_weight(&self) -> f64 {
        match self {
            ReputationEventKind::RatingReceived => 1.0,
            ReputationEventKind::EscrowCompleted => 1.0,
            ReputationEventKind::EscrowCancelled => 1.0,
            ReputationEventKind::ProposalAccepted => 0.5,
            ReputationEventKind::DisputeWon => 1.0,
            ReputationEventKind::DisputeLost => 1.0,
            ReputationEventKind::ClaimApproved => 0.5,
            ReputationEventKind::ClaimRejected => 0.5,
            ReputationEventKind::StakeSlashed => 1.0,
        }
    }

    /// Default signed delta for kinds with a fixed meaning. Rating events
    /// derive their delta from the rating itself, so they default to zero.
    pub fn default_delta(&self) -> f64 {
        match self {
            ReputationEventKind::RatingReceived => 0.0,
            ReputationEventKind::EscrowCompleted => 5.0,
            ReputationEventKind::EscrowCancelled => -2.0,
            ReputationEventKind::ProposalAccepted => 2.0,
            ReputationEventKind::DisputeWon => 3.0,
            ReputationEventKind::DisputeLost => -8.0,
            ReputationEventKind::ClaimApproved => 1.0,
            ReputationEventKind::ClaimRejected => -1.0,
            ReputationEventKind::StakeSlashed => -10.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReputationEventKind::RatingReceived => "rating_received",
            ReputationEventKind::EscrowCompleted => "escrow_completed",
            ReputationEventKind::EscrowCancelled => "escrow_cancelled",
            ReputationEventKind::ProposalAccepted => "proposal_accepted",
            ReputationEventKind::DisputeWon => "dispute_won",
            ReputationEventKind::DisputeLost => "dispute_lost",
            ReputationEventKind::ClaimApproved => "claim_approved",
            ReputationEventKind::ClaimRejected => "claim_rejected",
            ReputationEventKind::StakeSlashed => "stake_slashed",
        }
    }
}

/// One immutable, timestamped, weighted behavioral signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationEvent {
    pub user: AccountId,
    pub kind: ReputationEventKind,
    pub weight: f64,
    pub delta: f64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ReputationEvent {
    pub fn new(user: AccountId, kind: ReputationEventKind) -> Self {
        Self {
            user,
            kind,
            weight: kind.default_weight(),
            delta: kind.default_delta(),
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_delta(mut self, delta: f64) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Per-user append-only log, keyed by (user, append order).
pub struct EventLog {
    events: Arc<RwLock<HashMap<AccountId, Vec<ReputationEvent>>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn append(&self, event: ReputationEvent) {
        debug!(
            "📒 Reputation event appended: user={} kind={} delta={}",
            event.user,
            event.kind.as_str(),
            event.delta
        );
        self.events
            .write()
            .await
            .entry(event.user)
            .or_default()
            .push(event);
    }

    /// Most recent `cap` events for a user, oldest first so decay applies
    /// in event order.
    pub async fn recent(&self, user: AccountId, cap: usize) -> Vec<ReputationEvent> {
        let events = self.events.read().await;
        match events.get(&user) {
            Some(list) => {
                let start = list.len().saturating_sub(cap);
                list[start..].to_vec()
            }
            None => Vec::new(),
        }
    }

    pub async fn count(&self, user: AccountId) -> usize {
        self.events
            .read()
            .await
            .get(&user)
            .map(|l| l.len())
            .unwrap_or(0)
    }

    pub async fn total_count(&self) -> usize {
        self.events.read().await.values().map(|l| l.len()).sum()
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}
