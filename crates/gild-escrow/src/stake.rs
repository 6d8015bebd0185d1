use crate::error::{EscrowError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gild_ledger::{AccountId, Amount, CustodyLedger};
use gild_reputation::PlatformTrustProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Per-participant staking state. `completed_escrows` is the authoritative
/// completion count for the whole platform; reputation reads it from here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeRecord {
    pub account: AccountId,
    pub staked: Amount,
    pub active_escrows: u32,
    pub completed_escrows: u64,
    pub verified: bool,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StakeRecord {
    fn new(account: AccountId) -> Self {
        Self {
            account,
            staked: Amount::ZERO,
            active_escrows: 0,
            completed_escrows: 0,
            verified: false,
            cooldown_until: None,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StakeStats {
    pub stakers: usize,
    pub total_staked: Amount,
    pub verified_accounts: usize,
    pub active_escrows: u64,
    pub completed_escrows: u64,
}

/// Stake bookkeeping over ledger locks. Deposited stake stays in the
/// participant's ledger account but is locked, so it can gate escrow
/// participation without being spendable.
pub struct StakeRegistry {
    ledger: Arc<CustodyLedger>,
    records: Arc<RwLock<HashMap<AccountId, StakeRecord>>>,
    min_stake: Amount,
}

impl StakeRegistry {
    pub fn new(ledger: Arc<CustodyLedger>, min_stake: Amount) -> Self {
        Self {
            ledger,
            records: Arc::new(RwLock::new(HashMap::new())),
            min_stake,
        }
    }

    pub fn min_stake(&self) -> Amount {
        self.min_stake
    }

    /// Locks `amount` of the account's balance as stake. Returns the new
    /// stake total.
    pub async fn deposit(&self, account: AccountId, amount: Amount) -> Result<Amount> {
        if amount.is_zero() {
            return Err(EscrowError::InvalidAmount(
                "stake deposit must be positive".into(),
            ));
        }

        let available = self
            .ledger
            .unlocked_balance(account)
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;
        if available < amount {
            return Err(EscrowError::InsufficientFunds {
                required: amount,
                available,
            });
        }
        self.ledger
            .lock(account, amount)
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;

        let mut records = self.records.write().await;
        let record = records
            .entry(account)
            .or_insert_with(|| StakeRecord::new(account));
        record.staked = record.staked.saturating_add(amount);
        info!("🪙 Stake deposit: {} by {} (total {})", amount, account, record.staked);
        Ok(record.staked)
    }

    /// Unlocks stake back to spendable balance. While the account has
    /// active escrows its remaining stake may not drop below the minimum.
    pub async fn withdraw(&self, account: AccountId, amount: Amount) -> Result<Amount> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&account)
            .ok_or_else(|| EscrowError::UnknownStaker(account.to_string()))?;

        if amount > record.staked {
            return Err(EscrowError::InsufficientStake {
                required: amount,
                staked: record.staked,
            });
        }

        let remaining = record.staked.saturating_sub(amount);
        if record.active_escrows > 0 && remaining < self.min_stake {
            return Err(EscrowError::StakeLocked {
                active: record.active_escrows,
            });
        }

        self.ledger
            .unlock(account, amount)
            .await
            .map_err(|e| EscrowError::Custody(e.to_string()))?;
        record.staked = remaining;
        info!("🪙 Stake withdrawal: {} by {} (remaining {})", amount, account, remaining);
        Ok(remaining)
    }

    pub async fn set_verified(&self, account: AccountId, verified: bool) {
        let mut records = self.records.write().await;
        let record = records
            .entry(account)
            .or_insert_with(|| StakeRecord::new(account));
        record.verified = verified;
        info!(
            "Account {} verification set to {}",
            account, verified
        );
    }

    /// Minimum stake or verified status satisfies the participation gate.
    pub async fn meets_requirement(&self, account: AccountId) -> bool {
        let records = self.records.read().await;
        records
            .get(&account)
            .map(|r| r.staked >= self.min_stake || r.verified)
            .unwrap_or(false)
    }

    pub async fn is_verified(&self, account: AccountId) -> bool {
        self.records
            .read()
            .await
            .get(&account)
            .map(|r| r.verified)
            .unwrap_or(false)
    }

    pub async fn stake_of(&self, account: AccountId) -> Amount {
        self.records
            .read()
            .await
            .get(&account)
            .map(|r| r.staked)
            .unwrap_or(Amount::ZERO)
    }

    pub async fn record_of(&self, account: AccountId) -> Option<StakeRecord> {
        self.records.read().await.get(&account).cloned()
    }

    pub async fn active_count(&self, account: AccountId) -> u32 {
        self.records
            .read()
            .await
            .get(&account)
            .map(|r| r.active_escrows)
            .unwrap_or(0)
    }

    /// The cooldown expiry, when one is still running.
    pub async fn in_cooldown(&self, account: AccountId, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.records
            .read()
            .await
            .get(&account)
            .and_then(|r| r.cooldown_until)
            .filter(|until| *until > now)
    }

    pub async fn start_cooldown(&self, account: AccountId, until: DateTime<Utc>) {
        let mut records = self.records.write().await;
        let record = records
            .entry(account)
            .or_insert_with(|| StakeRecord::new(account));
        record.cooldown_until = Some(until);
    }

    pub async fn note_escrow_opened(&self, account: AccountId) {
        let mut records = self.records.write().await;
        let record = records
            .entry(account)
            .or_insert_with(|| StakeRecord::new(account));
        record.active_escrows += 1;
    }

    /// Closes out one active escrow. Clean completions bump the
    /// authoritative completion counter; cancellations and adjudicated
    /// endings do not.
    pub async fn note_escrow_closed(&self, account: AccountId, completed: bool) {
        let mut records = self.records.write().await;
        if let Some(record) = records.get_mut(&account) {
            record.active_escrows = record.active_escrows.saturating_sub(1);
            if completed {
                record.completed_escrows += 1;
            }
        }
    }

    pub async fn stats(&self) -> StakeStats {
        let records = self.records.read().await;
        StakeStats {
            stakers: records.len(),
            total_staked: records.values().map(|r| r.staked).sum(),
            verified_accounts: records.values().filter(|r| r.verified).count(),
            active_escrows: records.values().map(|r| r.active_escrows as u64).sum(),
            completed_escrows: records.values().map(|r| r.completed_escrows).sum(),
        }
    }
}

#[async_trait]
impl PlatformTrustProvider for StakeRegistry {
    /// Platform trust on the 0..=100 scale: neutral 50 plus credit for
    /// every cleanly completed escrow, with a small verified bonus.
    async fn platform_trust(&self, user: AccountId) -> f64 {
        let records = self.records.read().await;
        match records.get(&user) {
            Some(record) => {
                let completion_credit = record.completed_escrows as f64 * 2.5;
                let verified_bonus = if record.verified { 5.0 } else { 0.0 };
                (50.0 + completion_credit + verified_bonus).min(100.0)
            }
            None => 50.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gild_ledger::MemoryLedgerStorage;

    fn acct(b: u8) -> AccountId {
        AccountId::from_bytes([b; 32])
    }

    async fn setup() -> (StakeRegistry, Arc<CustodyLedger>) {
        let ledger = Arc::new(CustodyLedger::new(Arc::new(MemoryLedgerStorage::new())));
        ledger
            .credit(acct(1), Amount::from_units(1_000))
            .await
            .unwrap();
        (
            StakeRegistry::new(ledger.clone(), Amount::from_units(100)),
            ledger,
        )
    }

    #[tokio::test]
    async fn test_deposit_locks_funds() {
        let (registry, ledger) = setup().await;
        registry
            .deposit(acct(1), Amount::from_units(150))
            .await
            .unwrap();

        assert_eq!(registry.stake_of(acct(1)).await, Amount::from_units(150));
        assert!(registry.meets_requirement(acct(1)).await);
        // Staked funds are locked, not gone.
        assert_eq!(
            ledger.balance_of(acct(1)).await.unwrap(),
            Amount::from_units(1_000)
        );
        assert_eq!(
            ledger.unlocked_balance(acct(1)).await.unwrap(),
            Amount::from_units(850)
        );
    }

    #[tokio::test]
    async fn test_withdraw_blocked_by_active_escrows() {
        let (registry, _) = setup().await;
        registry
            .deposit(acct(1), Amount::from_units(150))
            .await
            .unwrap();
        registry.note_escrow_opened(acct(1)).await;

        // Dropping below the minimum while an escrow is active is refused.
        let blocked = registry.withdraw(acct(1), Amount::from_units(100)).await;
        assert!(matches!(blocked, Err(EscrowError::StakeLocked { active: 1 })));
        assert_eq!(registry.stake_of(acct(1)).await, Amount::from_units(150));

        // Staying at or above the minimum is fine.
        let remaining = registry
            .withdraw(acct(1), Amount::from_units(50))
            .await
            .unwrap();
        assert_eq!(remaining, Amount::from_units(100));

        // Once the escrow closes the rest can leave.
        registry.note_escrow_closed(acct(1), true).await;
        registry
            .withdraw(acct(1), Amount::from_units(100))
            .await
            .unwrap();
        assert_eq!(registry.stake_of(acct(1)).await, Amount::ZERO);
    }

    #[tokio::test]
    async fn test_verified_waives_stake_floor() {
        let (registry, _) = setup().await;
        assert!(!registry.meets_requirement(acct(2)).await);
        registry.set_verified(acct(2), true).await;
        assert!(registry.meets_requirement(acct(2)).await);
    }

    #[tokio::test]
    async fn test_overdraw_withdrawal_rejected() {
        let (registry, _) = setup().await;
        registry
            .deposit(acct(1), Amount::from_units(100))
            .await
            .unwrap();
        let result = registry.withdraw(acct(1), Amount::from_units(200)).await;
        assert!(matches!(result, Err(EscrowError::InsufficientStake { .. })));
    }

    #[tokio::test]
    async fn test_deposit_beyond_balance_rejected() {
        let (registry, _) = setup().await;
        let result = registry.deposit(acct(1), Amount::from_units(5_000)).await;
        assert!(matches!(result, Err(EscrowError::InsufficientFunds { .. })));
    }

    #[tokio::test]
    async fn test_trust_grows_with_completions() {
        let (registry, _) = setup().await;
        assert_eq!(registry.platform_trust(acct(1)).await, 50.0);

        registry.note_escrow_opened(acct(1)).await;
        registry.note_escrow_closed(acct(1), true).await;
        registry.note_escrow_opened(acct(1)).await;
        registry.note_escrow_closed(acct(1), true).await;
        assert_eq!(registry.platform_trust(acct(1)).await, 55.0);

        registry.set_verified(acct(1), true).await;
        assert_eq!(registry.platform_trust(acct(1)).await, 60.0);

        // Cancellations close the escrow without completion credit.
        registry.note_escrow_opened(acct(1)).await;
        registry.note_escrow_closed(acct(1), false).await;
        assert_eq!(registry.platform_trust(acct(1)).await, 60.0);
        assert_eq!(registry.record_of(acct(1)).await.unwrap().completed_escrows, 2);
    }

    #[tokio::test]
    async fn test_cooldown_window() {
        let (registry, _) = setup().await;
        let now = Utc::now();
        registry
            .start_cooldown(acct(1), now + chrono::Duration::seconds(60))
            .await;
        assert!(registry.in_cooldown(acct(1), now).await.is_some());
        assert!(registry
            .in_cooldown(acct(1), now + chrono::Duration::seconds(120))
            .await
            .is_none());
    }
}
