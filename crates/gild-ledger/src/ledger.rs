use crate::storage::LedgerStorage;
use crate::types::{AccountId, Amount, TransferRecord, TransferReason};
use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// The atomic custody primitive the policy layer builds on.
///
/// Every money-moving operation either fully commits or leaves balances
/// untouched: single transfers and multi-leg disbursements run inside a
/// storage transaction and roll back on any failed leg. Locked balances
/// (stakes) are not spendable; spending checks run against the unlocked
/// portion only.
pub struct CustodyLedger {
    storage: Arc<dyn LedgerStorage>,
    cache: Arc<RwLock<HashMap<AccountId, Amount>>>,
}

impl CustodyLedger {
    pub fn new(storage: Arc<dyn LedgerStorage>) -> Self {
        Self {
            storage,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn balance_of(&self, account: AccountId) -> Result<Amount> {
        if let Some(balance) = self.cache.read().await.get(&account) {
            return Ok(*balance);
        }
        let balance = self.storage.get_balance(account).await?;
        self.cache.write().await.insert(account, balance);
        Ok(balance)
    }

    pub async fn locked_balance(&self, account: AccountId) -> Result<Amount> {
        self.storage.get_locked(account).await
    }

    pub async fn unlocked_balance(&self, account: AccountId) -> Result<Amount> {
        let balance = self.balance_of(account).await?;
        let locked = self.storage.get_locked(account).await?;
        Ok(balance.saturating_sub(locked))
    }

    /// Credit an account. Used by deposit/faucet flows and test setup;
    /// transfers between engine accounts go through `transfer`/`disburse`.
    pub async fn credit(&self, account: AccountId, amount: Amount) -> Result<()> {
        let current = self.balance_of(account).await?;
        let updated = match current.checked_add(amount) {
            Some(v) => v,
            None => bail!("balance overflow crediting {} to {}", amount, account),
        };
        self.storage.set_balance(account, updated).await?;
        self.cache.write().await.insert(account, updated);
        info!("💰 Balance credited: {} += {} (new: {})", account, amount, updated);
        Ok(())
    }

    pub async fn debit(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.debit_internal(account, amount).await?;
        info!("💸 Balance debited: {} -= {}", account, amount);
        Ok(())
    }

    async fn debit_internal(&self, account: AccountId, amount: Amount) -> Result<()> {
        let unlocked = self.unlocked_balance(account).await?;
        if unlocked < amount {
            bail!(
                "insufficient unlocked balance for {}: have {}, need {}",
                account,
                unlocked,
                amount
            );
        }
        let current = self.balance_of(account).await?;
        let updated = current.saturating_sub(amount);
        self.storage.set_balance(account, updated).await?;
        self.cache.write().await.insert(account, updated);
        Ok(())
    }

    async fn credit_internal(&self, account: AccountId, amount: Amount) -> Result<()> {
        let current = self.balance_of(account).await?;
        let updated = match current.checked_add(amount) {
            Some(v) => v,
            None => bail!("balance overflow crediting {} to {}", amount, account),
        };
        self.storage.set_balance(account, updated).await?;
        self.cache.write().await.insert(account, updated);
        Ok(())
    }

    /// Move value between two accounts atomically.
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Amount,
        reason: TransferReason,
    ) -> Result<[u8; 32]> {
        if amount.is_zero() {
            bail!("cannot transfer zero amount");
        }
        if from == to {
            bail!("cannot transfer to self");
        }

        self.storage.begin_transaction().await?;
        let result = async {
            self.debit_internal(from, amount).await?;
            self.credit_internal(to, amount).await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.storage.commit_transaction().await?;
                let record = TransferRecord::new(from, to, amount, reason);
                let id = record.id;
                self.storage.record_transfer(record).await?;
                info!(
                    "📝 Transfer: {} -> {} amount={} reason={}",
                    from, to, amount, reason
                );
                Ok(id)
            }
            Err(e) => {
                self.storage.rollback_transaction().await?;
                self.cache.write().await.clear();
                Err(e).context("transfer rolled back")
            }
        }
    }

    /// Pay several recipients out of one account as a single atomic unit.
    ///
    /// Used for milestone releases (assignee + fee), dispute splits, and
    /// claim payouts. Zero-amount legs are skipped. If any leg fails the
    /// whole disbursement rolls back.
    pub async fn disburse(
        &self,
        from: AccountId,
        legs: &[(AccountId, Amount, TransferReason)],
    ) -> Result<Vec<[u8; 32]>> {
        let live: Vec<_> = legs.iter().filter(|(_, amt, _)| !amt.is_zero()).collect();
        if live.is_empty() {
            return Ok(Vec::new());
        }

        self.storage.begin_transaction().await?;
        let result = async {
            for (to, amount, _) in &live {
                self.debit_internal(from, *amount).await?;
                self.credit_internal(*to, *amount).await?;
            }
            Ok::<(), anyhow::Error>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.storage.commit_transaction().await?;
                let mut ids = Vec::with_capacity(live.len());
                for (to, amount, reason) in &live {
                    let record = TransferRecord::new(from, *to, *amount, *reason);
                    ids.push(record.id);
                    self.storage.record_transfer(record).await?;
                }
                info!("📝 Disbursement: {} -> {} legs committed", from, live.len());
                Ok(ids)
            }
            Err(e) => {
                self.storage.rollback_transaction().await?;
                self.cache.write().await.clear();
                Err(e).context("disbursement rolled back")
            }
        }
    }

    /// Lock part of an account's balance in place (stake collateral).
    pub async fn lock(&self, account: AccountId, amount: Amount) -> Result<()> {
        if amount.is_zero() {
            bail!("cannot lock zero amount");
        }
        let unlocked = self.unlocked_balance(account).await?;
        if unlocked < amount {
            bail!(
                "insufficient unlocked balance to lock for {}: have {}, need {}",
                account,
                unlocked,
                amount
            );
        }
        let locked = self.storage.get_locked(account).await?;
        let updated = locked.saturating_add(amount);
        self.storage.set_locked(account, updated).await?;
        info!("🔒 Balance locked: {} amount={} (total locked: {})", account, amount, updated);
        Ok(())
    }

    pub async fn unlock(&self, account: AccountId, amount: Amount) -> Result<()> {
        let locked = self.storage.get_locked(account).await?;
        if locked < amount {
            bail!(
                "cannot unlock {} for {}: only {} locked",
                amount,
                account,
                locked
            );
        }
        let updated = locked.saturating_sub(amount);
        self.storage.set_locked(account, updated).await?;
        info!("🔓 Balance unlocked: {} amount={} (remaining locked: {})", account, amount, updated);
        Ok(())
    }

    pub async fn history(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TransferRecord>> {
        self.storage.transfer_history(account, offset, limit).await
    }

    pub async fn transfer_count(&self, account: AccountId) -> Result<usize> {
        self.storage.transfer_count(account).await
    }

    /// Drop the read cache; the next read of each account hits storage.
    pub async fn invalidate_cache(&self) {
        self.cache.write().await.clear();
        debug!("Balance cache invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLedgerStorage;

    fn acct(b: u8) -> AccountId {
        AccountId::from_bytes([b; 32])
    }

    async fn funded_ledger() -> CustodyLedger {
        let ledger = CustodyLedger::new(Arc::new(MemoryLedgerStorage::new()));
        ledger.credit(acct(1), Amount::from_units(1_000)).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_transfer_moves_value() {
        let ledger = funded_ledger().await;
        ledger
            .transfer(acct(1), acct(2), Amount::from_units(300), TransferReason::Refund)
            .await
            .unwrap();

        assert_eq!(
            ledger.balance_of(acct(1)).await.unwrap(),
            Amount::from_units(700)
        );
        assert_eq!(
            ledger.balance_of(acct(2)).await.unwrap(),
            Amount::from_units(300)
        );
    }

    #[tokio::test]
    async fn test_transfer_insufficient_funds() {
        let ledger = funded_ledger().await;
        let result = ledger
            .transfer(acct(1), acct(2), Amount::from_units(5_000), TransferReason::Refund)
            .await;
        assert!(result.is_err());

        assert_eq!(
            ledger.balance_of(acct(1)).await.unwrap(),
            Amount::from_units(1_000)
        );
        assert_eq!(ledger.balance_of(acct(2)).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_locked_balance_not_spendable() {
        let ledger = funded_ledger().await;
        ledger.lock(acct(1), Amount::from_units(900)).await.unwrap();

        assert_eq!(
            ledger.unlocked_balance(acct(1)).await.unwrap(),
            Amount::from_units(100)
        );
        assert!(ledger
            .transfer(acct(1), acct(2), Amount::from_units(200), TransferReason::Refund)
            .await
            .is_err());

        ledger.unlock(acct(1), Amount::from_units(900)).await.unwrap();
        assert!(ledger
            .transfer(acct(1), acct(2), Amount::from_units(200), TransferReason::Refund)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disburse_is_atomic() {
        let ledger = funded_ledger().await;
        // Second leg exceeds the remaining balance, so the first leg must
        // also be undone.
        let result = ledger
            .disburse(
                acct(1),
                &[
                    (acct(2), Amount::from_units(900), TransferReason::MilestoneRelease),
                    (acct(3), Amount::from_units(900), TransferReason::PlatformFee),
                ],
            )
            .await;
        assert!(result.is_err());

        assert_eq!(
            ledger.balance_of(acct(1)).await.unwrap(),
            Amount::from_units(1_000)
        );
        assert_eq!(ledger.balance_of(acct(2)).await.unwrap(), Amount::ZERO);
        assert_eq!(ledger.balance_of(acct(3)).await.unwrap(), Amount::ZERO);
    }

    #[tokio::test]
    async fn test_disburse_skips_zero_legs() {
        let ledger = funded_ledger().await;
        let ids = ledger
            .disburse(
                acct(1),
                &[
                    (acct(2), Amount::from_units(975), TransferReason::ProjectRelease),
                    (acct(3), Amount::ZERO, TransferReason::PlatformFee),
                ],
            )
            .await
            .unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(
            ledger.balance_of(acct(2)).await.unwrap(),
            Amount::from_units(975)
        );
    }

    #[tokio::test]
    async fn test_history_records_reasons() {
        let ledger = funded_ledger().await;
        ledger
            .transfer(acct(1), acct(2), Amount::from_units(10), TransferReason::EscrowFunding)
            .await
            .unwrap();
        ledger
            .transfer(acct(1), acct(2), Amount::from_units(20), TransferReason::PlatformFee)
            .await
            .unwrap();

        let page = ledger.history(acct(2), 0, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].reason, TransferReason::PlatformFee);
        assert_eq!(page[1].reason, TransferReason::EscrowFunding);
        assert_eq!(ledger.transfer_count(acct(1)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unlock_more_than_locked_fails() {
        let ledger = funded_ledger().await;
        ledger.lock(acct(1), Amount::from_units(100)).await.unwrap();
        assert!(ledger.unlock(acct(1), Amount::from_units(101)).await.is_err());
    }
}
