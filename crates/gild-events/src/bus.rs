use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

/// Marketplace lifecycle events. Payloads carry hex-encoded identities so
/// subscribers never need the emitting crate's types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    EscrowCreated {
        escrow_id: String,
        client: String,
        total: u64,
        milestones: usize,
        timestamp: DateTime<Utc>,
    },
    EscrowStateChanged {
        escrow_id: String,
        from_state: String,
        to_state: String,
        actor: String,
        timestamp: DateTime<Utc>,
    },
    EscrowCompleted {
        escrow_id: String,
        client: String,
        assignee: String,
        total: u64,
        timestamp: DateTime<Utc>,
    },
    EscrowCancelled {
        escrow_id: String,
        client: String,
        refunded: u64,
        timestamp: DateTime<Utc>,
    },
    StakeDeposited {
        account: String,
        amount: u64,
        total_staked: u64,
        timestamp: DateTime<Utc>,
    },
    StakeWithdrawn {
        account: String,
        amount: u64,
        remaining: u64,
        timestamp: DateTime<Utc>,
    },
    DisputeOpened {
        escrow_id: String,
        dispute_id: String,
        claimant: String,
        respondent: String,
        timestamp: DateTime<Utc>,
    },
    DisputeResolved {
        escrow_id: String,
        dispute_id: String,
        outcome: String,
        client: String,
        assignee: String,
        timestamp: DateTime<Utc>,
    },
    ClaimSubmitted {
        claim_id: String,
        claimant: String,
        amount: u64,
        timestamp: DateTime<Utc>,
    },
    ClaimResolved {
        claim_id: String,
        claimant: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },
    ReputationRecomputed {
        account: String,
        score: u8,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPriority {
    High,
    Medium,
    Low,
}

impl MarketEvent {
    /// Dotted event name for logs and subscribers.
    pub fn event_type(&self) -> &'static str {
        match self {
            MarketEvent::EscrowCreated { .. } => "escrow.created",
            MarketEvent::EscrowStateChanged { .. } => "escrow.state_changed",
            MarketEvent::EscrowCompleted { .. } => "escrow.completed",
            MarketEvent::EscrowCancelled { .. } => "escrow.cancelled",
            MarketEvent::StakeDeposited { .. } => "stake.deposited",
            MarketEvent::StakeWithdrawn { .. } => "stake.withdrawn",
            MarketEvent::DisputeOpened { .. } => "dispute.opened",
            MarketEvent::DisputeResolved { .. } => "dispute.resolved",
            MarketEvent::ClaimSubmitted { .. } => "claim.submitted",
            MarketEvent::ClaimResolved { .. } => "claim.resolved",
            MarketEvent::ReputationRecomputed { .. } => "reputation.recomputed",
        }
    }

    /// Disputes and cancellations preempt routine lifecycle traffic.
    pub fn priority(&self) -> EventPriority {
        match self {
            MarketEvent::DisputeOpened { .. }
            | MarketEvent::DisputeResolved { .. }
            | MarketEvent::EscrowCancelled { .. } => EventPriority::High,
            MarketEvent::EscrowCreated { .. }
            | MarketEvent::EscrowStateChanged { .. }
            | MarketEvent::EscrowCompleted { .. }
            | MarketEvent::ClaimSubmitted { .. }
            | MarketEvent::ClaimResolved { .. } => EventPriority::Medium,
            MarketEvent::StakeDeposited { .. }
            | MarketEvent::StakeWithdrawn { .. }
            | MarketEvent::ReputationRecomputed { .. } => EventPriority::Low,
        }
    }
}

/// Broadcast fan-out with one channel per priority band plus a firehose.
/// Emission never blocks and never fails; events published with no
/// listeners are dropped.
pub struct EventBus {
    high: broadcast::Sender<MarketEvent>,
    medium: broadcast::Sender<MarketEvent>,
    low: broadcast::Sender<MarketEvent>,
    all: broadcast::Sender<MarketEvent>,
    emitted: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        let (high, _) = broadcast::channel(1000);
        let (medium, _) = broadcast::channel(500);
        let (low, _) = broadcast::channel(100);
        let (all, _) = broadcast::channel(1000);
        Self {
            high,
            medium,
            low,
            all,
            emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, event: MarketEvent) {
        debug!("📡 Event: {}", event.event_type());
        let channel = match event.priority() {
            EventPriority::High => &self.high,
            EventPriority::Medium => &self.medium,
            EventPriority::Low => &self.low,
        };
        let _ = channel.send(event.clone());
        let _ = self.all.send(event);
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscribe_high(&self) -> broadcast::Receiver<MarketEvent> {
        self.high.subscribe()
    }

    pub fn subscribe_medium(&self) -> broadcast::Receiver<MarketEvent> {
        self.medium.subscribe()
    }

    pub fn subscribe_low(&self) -> broadcast::Receiver<MarketEvent> {
        self.low.subscribe()
    }

    /// Every event regardless of priority.
    pub fn subscribe_all(&self) -> broadcast::Receiver<MarketEvent> {
        self.all.subscribe()
    }

    pub fn emitted_count(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_dispute_event() -> MarketEvent {
        MarketEvent::DisputeOpened {
            escrow_id: "escrow-1".into(),
            dispute_id: "ab12".into(),
            claimant: "aa".into(),
            respondent: "bb".into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_priority_routing() {
        let bus = EventBus::new();
        let mut high = bus.subscribe_high();
        let mut low = bus.subscribe_low();

        bus.emit(sample_dispute_event());
        bus.emit(MarketEvent::StakeDeposited {
            account: "aa".into(),
            amount: 10,
            total_staked: 10,
            timestamp: Utc::now(),
        });

        let urgent = high.try_recv().unwrap();
        assert_eq!(urgent.event_type(), "dispute.opened");
        assert!(high.try_recv().is_err());

        let routine = low.try_recv().unwrap();
        assert_eq!(routine.event_type(), "stake.deposited");
    }

    #[tokio::test]
    async fn test_firehose_sees_everything() {
        let bus = EventBus::new();
        let mut all = bus.subscribe_all();

        bus.emit(sample_dispute_event());
        bus.emit(MarketEvent::ReputationRecomputed {
            account: "aa".into(),
            score: 61,
            timestamp: Utc::now(),
        });

        assert!(all.try_recv().is_ok());
        assert!(all.try_recv().is_ok());
        assert_eq!(bus.emitted_count(), 2);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.emit(sample_dispute_event());
        assert_eq!(bus.emitted_count(), 1);
    }

    #[test]
    fn test_event_serialization_tagged() {
        let json = serde_json::to_string(&sample_dispute_event()).unwrap();
        assert!(json.contains("\"type\":\"dispute_opened\""));
        assert!(json.contains("\"escrow_id\":\"escrow-1\""));
    }
}
