use crate::bus::{EventBus, MarketEvent};
use chrono::Utc;
use gild_ledger::AccountId;
use gild_reputation::{ReputationEvent, ReputationEventKind, ReputationStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Feeds reputation from marketplace lifecycle events.
///
/// Runs as a detached task on the firehose channel. Scoring failures are
/// logged and dropped; the bridge must never stall or fail the operation
/// that emitted the event.
pub struct ReputationBridge {
    store: Arc<ReputationStore>,
    bus: Arc<EventBus>,
}

impl ReputationBridge {
    pub fn new(store: Arc<ReputationStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    pub fn start(self) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe_all();
        info!("Reputation bridge started");
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => self.apply(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Reputation bridge lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event bus closed, reputation bridge stopping");
                        break;
                    }
                }
            }
        })
    }

    async fn apply(&self, event: MarketEvent) {
        match event {
            MarketEvent::EscrowCompleted {
                client,
                assignee,
                total,
                ..
            } => {
                for (party, role) in [(&client, "client"), (&assignee, "assignee")] {
                    let meta = serde_json::json!({ "amount": total, "role": role });
                    self.score_with(party, ReputationEventKind::EscrowCompleted, meta)
                        .await;
                }
            }
            MarketEvent::EscrowCancelled { client, .. } => {
                self.score(&client, ReputationEventKind::EscrowCancelled).await;
            }
            MarketEvent::DisputeOpened {
                claimant,
                respondent,
                ..
            } => {
                for party in [&claimant, &respondent] {
                    if let Some(account) = Self::parse(party) {
                        self.store.note_dispute_opened(account).await;
                        if let Err(e) = self.store.recompute_user(account, None).await {
                            warn!("Recompute after dispute open failed for {}: {}", party, e);
                        }
                    }
                }
            }
            MarketEvent::DisputeResolved {
                outcome,
                client,
                assignee,
                ..
            } => {
                let (winner, loser) = match outcome.as_str() {
                    "full_to_client" => (Some(&client), Some(&assignee)),
                    "full_to_assignee" => (Some(&assignee), Some(&client)),
                    _ => (None, None),
                };
                if let Some(w) = winner {
                    self.score(w, ReputationEventKind::DisputeWon).await;
                }
                if let Some(l) = loser {
                    if let Some(account) = Self::parse(l) {
                        self.store.note_dispute_lost(account).await;
                    }
                    self.score(l, ReputationEventKind::DisputeLost).await;
                }
            }
            MarketEvent::ClaimResolved {
                claimant, approved, ..
            } => {
                let kind = if approved {
                    ReputationEventKind::ClaimApproved
                } else {
                    ReputationEventKind::ClaimRejected
                };
                self.score(&claimant, kind).await;
            }
            // Routine traffic carries no scoring signal.
            _ => {}
        }
    }

    /// Applies one scoring event and republishes the fresh score.
    async fn score(&self, account_hex: &str, kind: ReputationEventKind) {
        self.score_with(account_hex, kind, serde_json::Value::Null)
            .await;
    }

    async fn score_with(
        &self,
        account_hex: &str,
        kind: ReputationEventKind,
        metadata: serde_json::Value,
    ) {
        let Some(account) = Self::parse(account_hex) else {
            return;
        };
        match self
            .store
            .record_event(ReputationEvent::new(account, kind).with_metadata(metadata))
            .await
        {
            Ok(record) => {
                self.bus.emit(MarketEvent::ReputationRecomputed {
                    account: account_hex.to_string(),
                    score: record.score,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!("Scoring {} for {} failed: {}", kind.as_str(), account_hex, e);
            }
        }
    }

    fn parse(account_hex: &str) -> Option<AccountId> {
        let parsed = AccountId::from_hex(account_hex);
        if parsed.is_none() {
            warn!("Unparseable account in event payload: {}", account_hex);
        }
        parsed
    }
}
