//! Ledger invariant tests
//!
//! Exercise the engine through its public API, including from many threads,
//! and check the properties every committed state must satisfy:
//! - Conservation: wallet balances equal external inflows minus outflows
//! - Every transfer's entries sum to zero, and each side of a payment or a
//!   converted transfer matches the amount recorded for it
//! - A retried request applies once
//! - Concurrent debits never overdraw a wallet
//! - Opposite transfers between two wallets never deadlock
//! - Storage failures leave no trace and can be retried

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::{fixture, rstest};
use rust_decimal::Decimal;
use wallet_ledger::config::EngineConfig;
use wallet_ledger::core::{EntryStore, InMemoryLedgerStore, LedgerStore, UnitOfWork};
use wallet_ledger::types::{
    Currency, DepositRequest, Direction, EntryQuery, ErrorKind, IdempotencyKey, LedgerEntry,
    LedgerError, Money, OwnerId, PaymentRequest, ReverseRequest, Transaction, TransactionId, TransactionRef, TransactionStatus,
    TransferRequest, Wallet, WalletId, WithdrawRequest,
};
use wallet_ledger::LedgerEngine;

fn usd(minor: i64) -> Money {
    Money::from_minor(minor, Currency::USD)
}

fn key(value: impl Into<String>) -> IdempotencyKey {
    IdempotencyKey::new(value)
}

fn open(engine: &LedgerEngine<impl LedgerStore>, id: &str) -> WalletId {
    let wallet_id = WalletId::new(id);
    engine
        .open_wallet(wallet_id.clone(), OwnerId::new(format!("owner-{}", id)), Currency::USD)
        .unwrap();
    wallet_id
}

fn all_entries(engine: &LedgerEngine<impl LedgerStore>) -> Vec<LedgerEntry> {
    engine
        .list_wallets()
        .unwrap()
        .iter()
        .flat_map(|wallet| {
            engine
                .list_entries(&wallet.wallet_id, &EntryQuery::new().page(0, usize::MAX))
                .unwrap()
        })
        .collect()
}

#[fixture]
fn engine() -> LedgerEngine {
    LedgerEngine::in_memory(EngineConfig::default())
}

#[rstest]
fn test_balances_are_conserved(engine: LedgerEngine) {
    let wallets: Vec<WalletId> = (0..4).map(|i| open(&engine, &format!("w{}", i))).collect();

    let mut inflow = 0;
    let mut outflow = 0;
    for (i, wallet) in wallets.iter().enumerate() {
        let amount = 10_000 * (i as i64 + 1);
        engine
            .deposit(DepositRequest::new(wallet.clone(), usd(amount), key(format!("d-{}", i))))
            .unwrap();
        inflow += amount;
    }

    for step in 0..40usize {
        let from = &wallets[step % 4];
        let to = &wallets[(step * 3 + 1) % 4];
        let amount = usd(137 * (step as i64 + 1));
        if from != to {
            // Some of these fail for insufficient funds; that must not matter
            let _ = engine.transfer(TransferRequest::new(
                from.clone(),
                to.clone(),
                amount,
                key(format!("t-{}", step)),
            ));
        }
        if step % 5 == 0 {
            let request =
                WithdrawRequest::new(from.clone(), usd(250), key(format!("w-{}", step)));
            if engine.withdraw(request).is_ok() {
                outflow += 250;
            }
        }
    }

    let total: i64 = engine
        .list_wallets()
        .unwrap()
        .iter()
        .map(|wallet| wallet.balance.minor())
        .sum();
    assert_eq!(total, inflow - outflow);

    for report in engine.verify_all().unwrap() {
        assert!(report.is_consistent(), "{:?}", report);
    }
}

#[rstest]
fn test_transfer_entries_sum_to_zero(engine: LedgerEngine) {
    let a = open(&engine, "a");
    let b = open(&engine, "b");
    engine
        .deposit(DepositRequest::new(a.clone(), usd(5_000), key("d-1")))
        .unwrap();

    let mut transfers = Vec::new();
    for i in 0..5 {
        let outcome = engine
            .transfer(TransferRequest::new(a.clone(), b.clone(), usd(300 + i), key(format!("t-{}", i))))
            .unwrap();
        transfers.push(outcome.summary().transaction_id);
    }

    let entries = all_entries(&engine);
    for id in transfers {
        let legs: Vec<&LedgerEntry> = entries.iter().filter(|e| e.transaction_id == id).collect();
        assert_eq!(legs.len(), 2);
        let sum: i64 = legs.iter().map(|e| e.signed_amount().minor()).sum();
        assert_eq!(sum, 0);
    }
}

fn transfer_request(to: &WalletId, amount: i64, k: &str, converted: bool) -> TransferRequest {
    let request = TransferRequest::new(WalletId::new("a"), to.clone(), usd(amount), key(k));
    if converted {
        // 0.925 EUR per USD, rounded down to the cent
        let target = amount * 925 / 1000;
        request.with_conversion(Money::from_minor(target, Currency::EUR), Decimal::new(925, 3))
    } else {
        request
    }
}

#[rstest]
#[case::transfer(false, false)]
#[case::payment(true, false)]
#[case::converted_transfer(false, true)]
#[case::converted_payment(true, true)]
fn test_each_side_matches_recorded_amounts(
    engine: LedgerEngine,
    #[case] payment: bool,
    #[case] converted: bool,
) {
    let a = open(&engine, "a");
    let b = if converted {
        let wallet_id = WalletId::new("b");
        engine
            .open_wallet(wallet_id.clone(), OwnerId::new("owner-b"), Currency::EUR)
            .unwrap();
        wallet_id
    } else {
        open(&engine, "b")
    };
    engine
        .deposit(DepositRequest::new(a.clone(), usd(10_000), key("d-1")))
        .unwrap();

    let mut ids = Vec::new();
    for i in 0..4 {
        let k = format!("m-{}", i);
        let transfer = transfer_request(&b, 1_000 + 17 * i, &k, converted);
        let outcome = if payment {
            engine.payment(PaymentRequest::new(transfer, "alice", "bob").with_memo("split"))
        } else {
            engine.transfer(transfer)
        };
        ids.push(outcome.unwrap().summary().transaction_id);
    }

    let entries = all_entries(&engine);
    for id in ids {
        let transaction: Transaction = engine.get_transaction(&id).unwrap();
        assert_eq!(transaction.counter_amount.is_some(), converted);
        assert_eq!(transaction.payment.is_some(), payment);

        let legs: Vec<&LedgerEntry> = entries.iter().filter(|e| e.transaction_id == id).collect();
        assert_eq!(legs.len(), 2);

        let debit: Vec<&&LedgerEntry> =
            legs.iter().filter(|e| e.direction == Direction::Debit).collect();
        let credit: Vec<&&LedgerEntry> =
            legs.iter().filter(|e| e.direction == Direction::Credit).collect();
        assert_eq!(debit.len(), 1);
        assert_eq!(credit.len(), 1);

        assert_eq!(debit[0].wallet_id, a);
        assert_eq!(debit[0].amount, transaction.amount);
        assert_eq!(credit[0].wallet_id, b);
        assert_eq!(
            credit[0].amount,
            transaction.counter_amount.unwrap_or(transaction.amount)
        );

        if !converted {
            let sum: i64 = legs.iter().map(|e| e.signed_amount().minor()).sum();
            assert_eq!(sum, 0);
        }
    }

    for report in engine.verify_all().unwrap() {
        assert!(report.is_consistent(), "{:?}", report);
    }
}

#[rstest]
fn test_retried_deposit_applies_once(engine: LedgerEngine) {
    let wallet = open(&engine, "w1");
    let request = DepositRequest::new(wallet.clone(), usd(5_000), key("k1"));

    let first = engine.deposit(request.clone()).unwrap();
    let second = engine.deposit(request).unwrap();

    assert!(!first.is_replay());
    assert!(second.is_replay());
    assert_eq!(first.summary(), second.summary());
    assert_eq!(engine.get_wallet(&wallet).unwrap().balance, usd(5_000));
}

#[test]
fn test_concurrent_retries_apply_once() {
    let engine = Arc::new(LedgerEngine::in_memory(EngineConfig::default()));
    let wallet = open(&*engine, "w1");

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let request = DepositRequest::new(wallet.clone(), usd(1_000), key("same-key"));
            thread::spawn(move || engine.deposit(request))
        })
        .collect();

    let ids: Vec<TransactionId> = handles
        .into_iter()
        .filter_map(|handle| handle.join().unwrap().ok())
        .map(|outcome| outcome.summary().transaction_id)
        .collect();

    // Late arrivals may see the request in flight; the rest share one id
    assert!(!ids.is_empty());
    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(engine.get_wallet(&wallet).unwrap().balance, usd(1_000));
}

#[test]
fn test_concurrent_withdrawals_never_overdraw() {
    let engine = Arc::new(LedgerEngine::in_memory(EngineConfig::default()));
    let wallet = open(&*engine, "w1");
    engine
        .deposit(DepositRequest::new(wallet.clone(), usd(10_000), key("d-1")))
        .unwrap();

    // floor(100.00 / 7.00) = 14 of the 20 withdrawals fit
    let handles: Vec<_> = (0..20)
        .map(|i| {
            let engine = Arc::clone(&engine);
            let request = WithdrawRequest::new(wallet.clone(), usd(700), key(format!("w-{}", i)));
            thread::spawn(move || engine.withdraw(request))
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let insufficient = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::InsufficientFunds))
        .count();

    assert_eq!(succeeded, 14);
    assert_eq!(insufficient, 6);

    let stored = engine.get_wallet(&wallet).unwrap();
    assert_eq!(stored.balance, usd(200));
    assert_eq!(stored.version, 15);
    assert!(engine.verify_integrity(&wallet).unwrap().is_consistent());
}

#[test]
fn test_opposite_transfers_do_not_deadlock() {
    let engine = Arc::new(LedgerEngine::in_memory(EngineConfig::default()));
    let x = open(&*engine, "x");
    let y = open(&*engine, "y");
    for wallet in [&x, &y] {
        engine
            .deposit(DepositRequest::new(
                wallet.clone(),
                usd(10_000),
                key(format!("seed-{}", wallet)),
            ))
            .unwrap();
    }

    let spawn = |from: WalletId, to: WalletId| {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for i in 0..100 {
                engine
                    .transfer(TransferRequest::new(
                        from.clone(),
                        to.clone(),
                        usd(100),
                        key(format!("{}-{}-{}", from, to, i)),
                    ))
                    .unwrap();
            }
        })
    };

    let forward = spawn(x.clone(), y.clone());
    let backward = spawn(y.clone(), x.clone());
    forward.join().unwrap();
    backward.join().unwrap();

    assert_eq!(engine.get_wallet(&x).unwrap().balance, usd(10_000));
    assert_eq!(engine.get_wallet(&y).unwrap().balance, usd(10_000));
    for report in engine.verify_all().unwrap() {
        assert!(report.is_consistent());
    }
}

#[rstest]
fn test_reversal_restores_balances(engine: LedgerEngine) {
    let a = open(&engine, "a");
    let b = open(&engine, "b");
    engine
        .deposit(DepositRequest::new(a.clone(), usd(10_000), key("d-1")))
        .unwrap();
    let transfer = engine
        .transfer(TransferRequest::new(a.clone(), b.clone(), usd(2_500), key("t-1")))
        .unwrap();
    let original = transfer.summary().transaction_id;

    engine
        .reverse(
            ReverseRequest::new(TransactionRef::Id(original), key("r-1")).with_reason("disputed"),
        )
        .unwrap();

    assert_eq!(engine.get_wallet(&a).unwrap().balance, usd(10_000));
    assert_eq!(engine.get_wallet(&b).unwrap().balance, usd(0));
    assert_eq!(
        engine.get_transaction(&original).unwrap().status,
        TransactionStatus::Reversed
    );
    for report in engine.verify_all().unwrap() {
        assert!(report.is_consistent());
    }
}

/// Store wrapper that fails or stalls commits on demand
#[derive(Default)]
struct FaultyStore {
    inner: InMemoryLedgerStore,
    fail_next_commit: AtomicBool,
    stall_commits: AtomicBool,
    commits_started: AtomicUsize,
}

impl EntryStore for FaultyStore {
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        self.inner.append(entries)
    }

    fn entries_for_wallet(
        &self,
        wallet_id: &WalletId,
        query: &EntryQuery,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.entries_for_wallet(wallet_id, query)
    }
}

impl LedgerStore for FaultyStore {
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), LedgerError> {
        self.inner.insert_wallet(wallet)
    }

    fn load_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>, LedgerError> {
        self.inner.load_wallet(wallet_id)
    }

    fn update_wallet(&self, wallet: &Wallet, expected_version: u64) -> Result<(), LedgerError> {
        self.inner.update_wallet(wallet, expected_version)
    }

    fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        self.inner.list_wallets()
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), LedgerError> {
        self.commits_started.fetch_add(1, Ordering::SeqCst);
        if self.stall_commits.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(300));
        }
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(LedgerError::storage_unavailable("connection reset"));
        }
        self.inner.commit(unit)
    }

    fn record_failed(&self, transaction: Transaction) -> Result<(), LedgerError> {
        self.inner.record_failed(transaction)
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        self.inner.get_transaction(id)
    }

    fn transaction_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError> {
        self.inner.transaction_for_key(key)
    }

    fn entries_for_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.entries_for_transaction(id)
    }
}

#[test]
fn test_storage_failure_leaves_no_trace_and_retry_succeeds() {
    let store = Arc::new(FaultyStore::default());
    let engine = LedgerEngine::new(Arc::clone(&store), EngineConfig::default());
    let wallet = open(&engine, "w1");
    let request = DepositRequest::new(wallet.clone(), usd(4_200), key("d-1"));

    store.fail_next_commit.store(true, Ordering::SeqCst);
    let error = engine.deposit(request.clone()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::StorageUnavailable);
    assert!(error.is_retryable());

    let untouched = engine.get_wallet(&wallet).unwrap();
    assert_eq!(untouched.balance, usd(0));
    assert_eq!(untouched.version, 0);
    assert_eq!(store.inner.entry_count(), 0);

    let outcome = engine.deposit(request).unwrap();
    assert!(!outcome.is_replay());
    assert_eq!(engine.get_wallet(&wallet).unwrap().balance, usd(4_200));
    assert_eq!(store.inner.entry_count(), 1);
}

#[test]
fn test_lock_wait_times_out() {
    let store = Arc::new(FaultyStore::default());
    let engine = Arc::new(LedgerEngine::new(Arc::clone(&store), EngineConfig::default()));
    let wallet = open(&*engine, "w1");

    store.stall_commits.store(true, Ordering::SeqCst);
    let slow = {
        let engine = Arc::clone(&engine);
        let request = DepositRequest::new(wallet.clone(), usd(100), key("slow"));
        thread::spawn(move || engine.deposit(request))
    };

    // The slow deposit holds the wallet lock once its commit has started
    while store.commits_started.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(1));
    }

    let error = engine
        .execute_with_timeout(
            DepositRequest::new(wallet.clone(), usd(100), key("fast")).into(),
            Duration::from_millis(20),
        )
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::OperationTimeout);

    slow.join().unwrap().unwrap();
    assert_eq!(engine.get_wallet(&wallet).unwrap().balance, usd(100));
}
