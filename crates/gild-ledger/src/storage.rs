use crate::types::{AccountId, Amount, TransferRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Persistence seam for the custody ledger.
///
/// Implementations must make begin/commit/rollback cover balances and locked
/// balances together so a failed multi-leg disbursement restores both maps.
#[async_trait]
pub trait LedgerStorage: Send + Sync {
    async fn get_balance(&self, account: AccountId) -> Result<Amount>;
    async fn set_balance(&self, account: AccountId, amount: Amount) -> Result<()>;

    async fn get_locked(&self, account: AccountId) -> Result<Amount>;
    async fn set_locked(&self, account: AccountId, amount: Amount) -> Result<()>;

    async fn get_all_accounts(&self) -> Result<Vec<AccountId>>;

    async fn begin_transaction(&self) -> Result<()>;
    async fn commit_transaction(&self) -> Result<()>;
    async fn rollback_transaction(&self) -> Result<()>;

    async fn record_transfer(&self, record: TransferRecord) -> Result<()>;
    async fn transfer_history(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TransferRecord>>;
    async fn transfer_count(&self, account: AccountId) -> Result<usize>;
}

type BalanceMap = HashMap<AccountId, Amount>;

/// In-memory ledger backend with snapshot transactions.
///
/// `begin_transaction` snapshots both balance maps; `rollback_transaction`
/// restores the snapshot wholesale. Good enough for single-process
/// deployments and the entire test suite.
pub struct MemoryLedgerStorage {
    balances: Arc<RwLock<BalanceMap>>,
    locked: Arc<RwLock<BalanceMap>>,
    history: Arc<RwLock<Vec<TransferRecord>>>,
    snapshot: Arc<RwLock<Option<(BalanceMap, BalanceMap)>>>,
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self {
            balances: Arc::new(RwLock::new(HashMap::new())),
            locked: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            snapshot: Arc::new(RwLock::new(None)),
        }
    }

    /// Sum of every account balance, used by conservation checks.
    pub async fn total_balance(&self) -> Amount {
        self.balances.read().await.values().copied().sum()
    }
}

impl Default for MemoryLedgerStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStorage for MemoryLedgerStorage {
    async fn get_balance(&self, account: AccountId) -> Result<Amount> {
        Ok(self
            .balances
            .read()
            .await
            .get(&account)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn set_balance(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.balances.write().await.insert(account, amount);
        Ok(())
    }

    async fn get_locked(&self, account: AccountId) -> Result<Amount> {
        Ok(self
            .locked
            .read()
            .await
            .get(&account)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    async fn set_locked(&self, account: AccountId, amount: Amount) -> Result<()> {
        self.locked.write().await.insert(account, amount);
        Ok(())
    }

    async fn get_all_accounts(&self) -> Result<Vec<AccountId>> {
        Ok(self.balances.read().await.keys().copied().collect())
    }

    async fn begin_transaction(&self) -> Result<()> {
        let balances = self.balances.read().await.clone();
        let locked = self.locked.read().await.clone();
        *self.snapshot.write().await = Some((balances, locked));
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<()> {
        *self.snapshot.write().await = None;
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<()> {
        if let Some((balances, locked)) = self.snapshot.write().await.take() {
            *self.balances.write().await = balances;
            *self.locked.write().await = locked;
        }
        Ok(())
    }

    async fn record_transfer(&self, record: TransferRecord) -> Result<()> {
        self.history.write().await.push(record);
        Ok(())
    }

    async fn transfer_history(
        &self,
        account: AccountId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<TransferRecord>> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .rev()
            .filter(|r| r.from == account || r.to == account)
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn transfer_count(&self, account: AccountId) -> Result<usize> {
        let history = self.history.read().await;
        Ok(history
            .iter()
            .filter(|r| r.from == account || r.to == account)
            .count())
    }
}
