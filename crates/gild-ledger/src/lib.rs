pub mod ledger;
pub mod storage;
pub mod types;

pub use ledger::CustodyLedger;
pub use storage::{LedgerStorage, MemoryLedgerStorage};
pub use types::{AccountId, Amount, TransferReason, TransferRecord};
