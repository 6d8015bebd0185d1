use crate::error::{DisputeError, Result};
use chrono::{DateTime, Utc};
use gild_ledger::AccountId;
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// An account authorized to sit on review panels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerProfile {
    pub account: AccountId,
    pub reputation: f64,
    /// Panels this reviewer has been drawn onto.
    pub assigned: u64,
    /// Reviews where this reviewer actually cast a vote.
    pub completed: u64,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    pub authorized: usize,
    pub eligible: usize,
    pub total_assignments: u64,
    pub total_completions: u64,
}

/// Admin-managed pool of authorized reviewers. Panels are drawn uniformly
/// at random from eligible members using the OS entropy source.
pub struct ReviewerPool {
    reviewers: Arc<RwLock<HashMap<AccountId, ReviewerProfile>>>,
    min_reputation: f64,
}

impl ReviewerPool {
    pub fn new(min_reputation: f64) -> Self {
        Self {
            reviewers: Arc::new(RwLock::new(HashMap::new())),
            min_reputation,
        }
    }

    /// Adds an account to the pool. Fails if it is already authorized.
    pub async fn authorize(&self, account: AccountId, reputation: f64) -> Result<()> {
        let mut reviewers = self.reviewers.write().await;
        if reviewers.contains_key(&account) {
            return Err(DisputeError::AlreadyAuthorized(account.to_string()));
        }
        reviewers.insert(
            account,
            ReviewerProfile {
                account,
                reputation,
                assigned: 0,
                completed: 0,
                registered_at: Utc::now(),
            },
        );
        info!("🧑‍⚖️ Authorized reviewer {} (reputation: {:.1})", account, reputation);
        Ok(())
    }

    pub async fn revoke(&self, account: &AccountId) -> Result<()> {
        let mut reviewers = self.reviewers.write().await;
        if reviewers.remove(account).is_none() {
            return Err(DisputeError::UnknownReviewer(account.to_string()));
        }
        info!("Revoked reviewer {}", account);
        Ok(())
    }

    pub async fn is_authorized(&self, account: &AccountId) -> bool {
        self.reviewers.read().await.contains_key(account)
    }

    /// Updates the reputation used for eligibility filtering.
    pub async fn set_reputation(&self, account: &AccountId, reputation: f64) -> Result<()> {
        let mut reviewers = self.reviewers.write().await;
        let profile = reviewers
            .get_mut(account)
            .ok_or_else(|| DisputeError::UnknownReviewer(account.to_string()))?;
        profile.reputation = reputation;
        Ok(())
    }

    pub async fn note_completed(&self, account: &AccountId) {
        let mut reviewers = self.reviewers.write().await;
        if let Some(profile) = reviewers.get_mut(account) {
            profile.completed += 1;
        }
    }

    /// Draws a panel of `size` distinct reviewers, excluding the given
    /// accounts (parties to the matter must never review it).
    pub async fn select_panel(
        &self,
        size: usize,
        exclude: &[AccountId],
    ) -> Result<Vec<AccountId>> {
        let mut reviewers = self.reviewers.write().await;

        let eligible: Vec<AccountId> = reviewers
            .values()
            .filter(|p| p.reputation >= self.min_reputation)
            .filter(|p| !exclude.contains(&p.account))
            .map(|p| p.account)
            .collect();

        if eligible.len() < size {
            return Err(DisputeError::PanelUnavailable {
                needed: size,
                available: eligible.len(),
            });
        }

        let panel: Vec<AccountId> = eligible
            .choose_multiple(&mut OsRng, size)
            .copied()
            .collect();

        for account in &panel {
            if let Some(profile) = reviewers.get_mut(account) {
                profile.assigned += 1;
            }
        }

        debug!(
            "Selected panel of {} from {} eligible reviewers",
            panel.len(),
            eligible.len()
        );
        Ok(panel)
    }

    pub async fn get_profile(&self, account: &AccountId) -> Option<ReviewerProfile> {
        self.reviewers.read().await.get(account).cloned()
    }

    pub async fn stats(&self) -> PoolStats {
        let reviewers = self.reviewers.read().await;
        let eligible = reviewers
            .values()
            .filter(|p| p.reputation >= self.min_reputation)
            .count();
        PoolStats {
            authorized: reviewers.len(),
            eligible,
            total_assignments: reviewers.values().map(|p| p.assigned).sum(),
            total_completions: reviewers.values().map(|p| p.completed).sum(),
        }
    }
}
