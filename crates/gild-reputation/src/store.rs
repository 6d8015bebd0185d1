//! Reputation store and recomputation service.
//!
//! Owns the per-user rating aggregates, fraud signal inputs, and derived
//! `ReputationRecord`s. Records are never authoritative: any one of them can
//! be rebuilt from the rating aggregate plus the event log, and recomputing
//! with unchanged underlying data returns an identical record.

use crate::error::{ReputationError, Result};
use crate::events::{EventLog, ReputationEvent, ReputationEventKind};
use crate::fraud::{self, FraudSignals};
use crate::score::{self, DecayConfig, ScoreComponents, ScoreInputs, ScoreWeights};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gild_ledger::AccountId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Custody-layer trust signal source (completed-escrow counts and the
/// like), pre-normalized to [0,100]. The escrow ledger implements this.
#[async_trait]
pub trait PlatformTrustProvider: Send + Sync {
    async fn platform_trust(&self, user: AccountId) -> f64;
}

/// Store-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReputationConfig {
    /// Starting score for the composite and the value unrated, signal-free
    /// users resolve to.
    pub base: f64,
    /// Platform-trust value used when no provider is registered.
    pub default_platform: f64,
    /// Most recent events considered per recompute; bounds recompute cost.
    pub event_window: usize,
    pub weights: ScoreWeights,
    pub decay: DecayConfig,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            base: 50.0,
            default_platform: 50.0,
            event_window: 200,
            weights: ScoreWeights::default(),
            decay: DecayConfig::default(),
        }
    }
}

/// What-if parameters for a single recomputation. Absent fields fall back
/// to the store configuration; `now` pins decay for reproducible replays.
#[derive(Debug, Clone, Default)]
pub struct RecomputeOverrides {
    pub weights: Option<ScoreWeights>,
    pub decay: Option<DecayConfig>,
    pub now: Option<DateTime<Utc>>,
}

/// Derived per-user score with its component breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReputationRecord {
    pub user: AccountId,
    pub score: u8,
    pub components: ScoreComponents,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct RatingAggregate {
    sum: f64,
    count: u64,
}

impl RatingAggregate {
    fn average(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

/// Counters for observability endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReputationStats {
    pub tracked_users: usize,
    pub total_events: usize,
    pub total_ratings: u64,
    pub recomputes: u64,
}

pub struct ReputationStore {
    config: ReputationConfig,
    records: Arc<RwLock<HashMap<AccountId, ReputationRecord>>>,
    ratings: Arc<RwLock<HashMap<AccountId, RatingAggregate>>>,
    fraud_signals: Arc<RwLock<HashMap<AccountId, FraudSignals>>>,
    log: EventLog,
    platform: RwLock<Option<Arc<dyn PlatformTrustProvider>>>,
    recompute_count: std::sync::atomic::AtomicU64,
}

impl ReputationStore {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            config,
            records: Arc::new(RwLock::new(HashMap::new())),
            ratings: Arc::new(RwLock::new(HashMap::new())),
            fraud_signals: Arc::new(RwLock::new(HashMap::new())),
            log: EventLog::new(),
            platform: RwLock::new(None),
            recompute_count: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ReputationConfig {
        &self.config
    }

    pub async fn set_platform_provider(&self, provider: Arc<dyn PlatformTrustProvider>) {
        *self.platform.write().await = Some(provider);
        debug!("Platform trust provider registered");
    }

    /// Record one received rating (1..=5) and recompute the user.
    pub async fn record_rating(&self, user: AccountId, rating: u8) -> Result<ReputationRecord> {
        if !(1..=5).contains(&rating) {
            return Err(ReputationError::RatingOutOfScale(rating));
        }

        {
            let mut ratings = self.ratings.write().await;
            let aggregate = ratings.entry(user).or_default();
            aggregate.sum += rating as f64;
            aggregate.count += 1;
        }

        // The rating also lands in the event log as a midpoint-relative
        // signal so fresh ratings outweigh stale ones via decay.
        let delta = rating as f64 - score::RATING_PRIOR;
        self.log
            .append(
                ReputationEvent::new(user, ReputationEventKind::RatingReceived).with_delta(delta),
            )
            .await;

        info!("⭐ Rating recorded: user={} rating={}", user, rating);
        self.recompute_user(user, None).await
    }

    /// Append a behavioral event and recompute the affected user.
    pub async fn record_event(&self, event: ReputationEvent) -> Result<ReputationRecord> {
        let user = event.user;
        self.log.append(event).await;
        self.recompute_user(user, None).await
    }

    /// Replace a user's fraud signal inputs (administrative override).
    pub async fn set_fraud_signals(&self, user: AccountId, signals: FraudSignals) {
        self.fraud_signals.write().await.insert(user, signals);
    }

    pub async fn note_dispute_opened(&self, user: AccountId) {
        let mut map = self.fraud_signals.write().await;
        map.entry(user).or_default().recent_disputes += 1;
    }

    pub async fn note_dispute_lost(&self, user: AccountId) {
        let mut map = self.fraud_signals.write().await;
        map.entry(user).or_default().disputes_lost += 1;
    }

    pub async fn fraud_signals(&self, user: AccountId) -> FraudSignals {
        self.fraud_signals
            .read()
            .await
            .get(&user)
            .copied()
            .unwrap_or_default()
    }

    /// Recompute a user's record from stored state, optionally overriding
    /// weights/decay/now for what-if analysis. Upserts atomically.
    pub async fn recompute_user(
        &self,
        user: AccountId,
        overrides: Option<RecomputeOverrides>,
    ) -> Result<ReputationRecord> {
        let overrides = overrides.unwrap_or_default();
        let weights = overrides.weights.unwrap_or(self.config.weights);
        let decay = overrides.decay.unwrap_or(self.config.decay);
        let now = overrides.now.unwrap_or_else(Utc::now);

        let aggregate = self
            .ratings
            .read()
            .await
            .get(&user)
            .copied()
            .unwrap_or_default();
        let events = self.log.recent(user, self.config.event_window).await;
        let signals = self.fraud_signals(user).await;
        let platform_base = match self.platform.read().await.as_ref() {
            Some(provider) => provider.platform_trust(user).await,
            None => self.config.default_platform,
        };

        let inputs = ScoreInputs {
            base: self.config.base,
            rating_average: aggregate.average(),
            rating_count: aggregate.count,
            platform_base,
            events: &events,
            fraud_penalty: fraud::evaluate(&signals),
        };
        let (score, components) = score::compute(&inputs, &weights, &decay, now)?;

        let record = ReputationRecord {
            user,
            score,
            components,
            updated_at: now,
        };
        self.records.write().await.insert(user, record.clone());
        self.recompute_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        info!(
            "📊 Reputation recomputed: user={} score={} (rating={:.1} platform={:.1} events={:.1} fraud={})",
            user,
            score,
            components.rating_score,
            components.platform_score,
            components.event_score,
            components.fraud_penalty
        );
        Ok(record)
    }

    pub async fn get_record(&self, user: AccountId) -> Option<ReputationRecord> {
        self.records.read().await.get(&user).cloned()
    }

    /// Current composite score, defaulting to the configured base for
    /// users that have never been recomputed.
    pub async fn score_of(&self, user: AccountId) -> u8 {
        match self.get_record(user).await {
            Some(record) => record.score,
            None => self.config.base.clamp(0.0, 100.0).round() as u8,
        }
    }

    pub async fn recent_events(&self, user: AccountId, limit: usize) -> Vec<ReputationEvent> {
        self.log.recent(user, limit).await
    }

    pub async fn stats(&self) -> ReputationStats {
        let total_ratings = self.ratings.read().await.values().map(|a| a.count).sum();
        ReputationStats {
            tracked_users: self.records.read().await.len(),
            total_events: self.log.total_count().await,
            total_ratings,
            recomputes: self
                .recompute_count
                .load(std::sync::atomic::Ordering::Relaxed),
        }
    }
}
