use gild_ledger::{AccountId, Amount, CustodyLedger, MemoryLedgerStorage, TransferReason};
use proptest::prelude::*;
use std::sync::Arc;

// Custom strategies for generating test data
prop_compose! {
    fn arb_amount()
        (units in 0u64..=1_000_000_000u64) -> Amount {
        Amount::from_units(units)
    }
}

prop_compose! {
    fn arb_account()
        (bytes in prop::array::uniform32(any::<u8>())) -> AccountId {
        AccountId::from_bytes(bytes)
    }
}

prop_compose! {
    fn arb_account_list()
        (accounts in prop::collection::vec(arb_account(), 2..12)) -> Vec<AccountId> {
        accounts
    }
}

// Property: value is conserved across arbitrary transfer sequences
proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_transfer_conservation(
        accounts in arb_account_list(),
        amounts in prop::collection::vec(arb_amount(), 1..50)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = Arc::new(MemoryLedgerStorage::new());
            let ledger = CustodyLedger::new(storage.clone());

            let seed = Amount::from_units(10_000_000);
            for account in &accounts {
                ledger.credit(*account, seed).await.unwrap();
            }
            let total_before = storage.total_balance().await;

            for (i, amount) in amounts.iter().enumerate() {
                let from = accounts[i % accounts.len()];
                let to = accounts[(i + 1) % accounts.len()];
                if from == to || amount.is_zero() {
                    continue;
                }
                let available = ledger.unlocked_balance(from).await.unwrap();
                if available >= *amount {
                    ledger
                        .transfer(from, to, *amount, TransferReason::Adjustment)
                        .await
                        .unwrap();
                }
            }

            let total_after = storage.total_balance().await;
            prop_assert_eq!(total_before, total_after);
            Ok(())
        })?;
    }
}

// Property: a disbursement debits the source by exactly the sum of its legs
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_disburse_exact(
        legs in prop::collection::vec((arb_account(), 0u64..100_000u64), 1..8)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = Arc::new(MemoryLedgerStorage::new());
            let ledger = CustodyLedger::new(storage.clone());

            let source = AccountId::from_bytes([0x01; 32]);
            ledger.credit(source, Amount::from_units(10_000_000)).await.unwrap();
            let before = ledger.balance_of(source).await.unwrap();

            let legs: Vec<_> = legs
                .into_iter()
                .filter(|(to, _)| *to != source)
                .map(|(to, units)| (to, Amount::from_units(units), TransferReason::DisputeSplit))
                .collect();
            let expected: Amount = legs.iter().map(|(_, amt, _)| *amt).sum();

            ledger.disburse(source, &legs).await.unwrap();

            let after = ledger.balance_of(source).await.unwrap();
            prop_assert_eq!(before.checked_sub(after).unwrap(), expected);
            Ok(())
        })?;
    }
}

// Property: locking never allows spending past the unlocked portion
proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn prop_lock_bounds_spending(
        balance in 1u64..1_000_000u64,
        lock_units in 1u64..1_000_000u64,
        spend_units in 1u64..1_000_000u64
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let ledger = CustodyLedger::new(Arc::new(MemoryLedgerStorage::new()));
            let account = AccountId::from_bytes([0x02; 32]);
            let sink = AccountId::from_bytes([0x03; 32]);

            ledger.credit(account, Amount::from_units(balance)).await.unwrap();

            let lock_amount = Amount::from_units(lock_units.min(balance));
            ledger.lock(account, lock_amount).await.unwrap();

            let unlocked = ledger.unlocked_balance(account).await.unwrap();
            let spend = Amount::from_units(spend_units);
            let result = ledger
                .transfer(account, sink, spend, TransferReason::Adjustment)
                .await;

            if spend > unlocked {
                prop_assert!(result.is_err());
                prop_assert_eq!(
                    ledger.balance_of(account).await.unwrap(),
                    Amount::from_units(balance)
                );
            } else {
                prop_assert!(result.is_ok());
            }
            Ok(())
        })?;
    }
}
