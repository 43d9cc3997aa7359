//! In-memory ledger storage
//!
//! `InMemoryLedgerStore` keeps wallets, entries and transactions behind a
//! single `parking_lot::RwLock`. Every write validates first and mutates
//! second under the write guard, so readers observe a unit of work either
//! entirely or not at all. This lock is the storage engine's own latch; it is
//! held only for the in-memory copy and never while an operation validates,
//! so it does not serialize unrelated wallets' operations.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use super::traits::{EntryStore, LedgerStore, UnitOfWork};
use crate::types::{
    EntryId, EntryQuery, IdempotencyKey, LedgerEntry, LedgerError, Transaction, TransactionId,
    TransactionStatus, Wallet, WalletId,
};

#[derive(Debug, Default)]
struct StoreState {
    wallets: HashMap<WalletId, Wallet>,
    /// Per-wallet entries, oldest first
    entries: HashMap<WalletId, Vec<LedgerEntry>>,
    entry_ids: HashSet<EntryId>,
    transactions: HashMap<TransactionId, Transaction>,
    /// Successful transaction per idempotency key
    keys: HashMap<IdempotencyKey, TransactionId>,
}

impl StoreState {
    fn check_new_entries(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut batch = HashSet::with_capacity(entries.len());
        for entry in entries {
            if self.entry_ids.contains(&entry.entry_id) || !batch.insert(entry.entry_id) {
                return Err(LedgerError::DuplicateEntry {
                    entry: entry.entry_id,
                });
            }
        }
        Ok(())
    }

    fn push_entries(&mut self, entries: Vec<LedgerEntry>) {
        for entry in entries {
            self.entry_ids.insert(entry.entry_id);
            self.entries
                .entry(entry.wallet_id.clone())
                .or_default()
                .push(entry);
        }
    }

    fn check_version(&self, wallet: &Wallet, expected: u64) -> Result<(), LedgerError> {
        let stored = self
            .wallets
            .get(&wallet.wallet_id)
            .ok_or_else(|| LedgerError::wallet_not_found(&wallet.wallet_id))?;
        if stored.version != expected {
            return Err(LedgerError::VersionConflict {
                wallet: wallet.wallet_id.clone(),
                expected,
                actual: stored.version,
            });
        }
        Ok(())
    }
}

/// Thread-safe in-memory [`LedgerStore`]
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<StoreState>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries across all wallets
    pub fn entry_count(&self) -> usize {
        self.state.read().entry_ids.len()
    }
}

impl EntryStore for InMemoryLedgerStore {
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.check_new_entries(entries)?;
        state.push_entries(entries.to_vec());
        Ok(())
    }

    fn entries_for_wallet(
        &self,
        wallet_id: &WalletId,
        query: &EntryQuery,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.read();
        Ok(state
            .entries
            .get(wallet_id)
            .map(|entries| query.apply(entries.iter()))
            .unwrap_or_default())
    }
}

impl LedgerStore for InMemoryLedgerStore {
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        if state.wallets.contains_key(&wallet.wallet_id) {
            return Err(LedgerError::DuplicateWallet {
                wallet: wallet.wallet_id,
            });
        }
        state.wallets.insert(wallet.wallet_id.clone(), wallet);
        Ok(())
    }

    fn load_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>, LedgerError> {
        Ok(self.state.read().wallets.get(wallet_id).cloned())
    }

    fn update_wallet(&self, wallet: &Wallet, expected_version: u64) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state.check_version(wallet, expected_version)?;
        state.wallets.insert(wallet.wallet_id.clone(), wallet.clone());
        Ok(())
    }

    fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        Ok(self.state.read().wallets.values().cloned().collect())
    }

    fn commit(&self, unit: UnitOfWork) -> Result<(), LedgerError> {
        let UnitOfWork {
            transaction,
            entries,
            wallets,
            reverses,
        } = unit;

        let mut state = self.state.write();

        // Validate everything before touching anything
        for write in &wallets {
            state.check_version(&write.wallet, write.expected_version)?;
        }
        state.check_new_entries(&entries)?;
        if let Some(existing) = state.keys.get(&transaction.idempotency_key) {
            if *existing != transaction.transaction_id {
                return Err(LedgerError::IdempotencyKeyReused {
                    key: transaction.idempotency_key.clone(),
                });
            }
        }
        if let Some(original_id) = &reverses {
            match state.transactions.get(original_id) {
                Some(original) if original.status == TransactionStatus::Completed => {}
                Some(_) => {
                    return Err(LedgerError::invalid_reversal(
                        *original_id,
                        "transaction is no longer completed",
                    ))
                }
                None => return Err(LedgerError::transaction_not_found(original_id)),
            }
        }

        for write in wallets {
            state
                .wallets
                .insert(write.wallet.wallet_id.clone(), write.wallet);
        }
        state.push_entries(entries);
        if let Some(original_id) = reverses {
            if let Some(original) = state.transactions.get_mut(&original_id) {
                original.status = TransactionStatus::Reversed;
                original.reversed_by = Some(transaction.transaction_id);
            }
        }
        state
            .keys
            .insert(transaction.idempotency_key.clone(), transaction.transaction_id);
        state
            .transactions
            .insert(transaction.transaction_id, transaction);
        Ok(())
    }

    fn record_failed(&self, transaction: Transaction) -> Result<(), LedgerError> {
        let mut state = self.state.write();
        state
            .transactions
            .insert(transaction.transaction_id, transaction);
        Ok(())
    }

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.state.read().transactions.get(id).cloned())
    }

    fn transaction_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError> {
        let state = self.state.read();
        Ok(state
            .keys
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    fn entries_for_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let state = self.state.read();
        let Some(transaction) = state.transactions.get(id) else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::with_capacity(transaction.entry_ids.len());
        for entry_id in &transaction.entry_ids {
            let found = transaction
                .participants
                .iter()
                .filter_map(|wallet| state.entries.get(wallet))
                .flat_map(|wallet_entries| wallet_entries.iter().rev())
                .find(|entry| entry.entry_id == *entry_id);
            if let Some(entry) = found {
                entries.push(entry.clone());
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::traits::WalletWrite;
    use crate::types::{
        Currency, Direction, EntryCategory, ErrorKind, Money, OwnerId, TransactionKind,
    };
    use chrono::Utc;

    fn wallet(id: &str) -> Wallet {
        Wallet::open(WalletId::new(id), OwnerId::new("owner"), Currency::USD, Utc::now())
    }

    fn usd(minor: i64) -> Money {
        Money::from_minor(minor, Currency::USD)
    }

    fn transaction(key: &str) -> Transaction {
        let now = Utc::now();
        Transaction {
            transaction_id: TransactionId::generate(),
            kind: TransactionKind::Deposit,
            status: TransactionStatus::Completed,
            participants: vec![WalletId::new("w-1")],
            entry_ids: Vec::new(),
            idempotency_key: IdempotencyKey::new(key),
            fingerprint: 7,
            amount: usd(100),
            counter_amount: None,
            exchange_rate: None,
            payment: None,
            description: String::new(),
            reverses: None,
            reversed_by: None,
            created_at: now,
            completed_at: Some(now),
            failure: None,
        }
    }

    fn credit(wallet: &Wallet, tx: &Transaction, amount: Money) -> LedgerEntry {
        LedgerEntry {
            entry_id: EntryId::generate(),
            wallet_id: wallet.wallet_id.clone(),
            transaction_id: tx.transaction_id,
            sequence: wallet.version,
            direction: Direction::Credit,
            amount,
            balance_after: wallet.balance,
            category: EntryCategory::Deposit,
            reference: None,
            description: String::new(),
            exchange_rate: None,
            created_at: Utc::now(),
        }
    }

    /// Deposit `amount` into a stored wallet through a unit of work
    fn deposit(store: &InMemoryLedgerStore, id: &str, key: &str, amount: Money) -> Transaction {
        let mut wallet = store.load_wallet(&WalletId::new(id)).unwrap().unwrap();
        let expected_version = wallet.version;
        wallet.apply_delta(amount, Direction::Credit).unwrap();

        let mut tx = transaction(key);
        let entry = credit(&wallet, &tx, amount);
        tx.entry_ids = vec![entry.entry_id];

        store
            .commit(UnitOfWork {
                transaction: tx.clone(),
                entries: vec![entry],
                wallets: vec![WalletWrite {
                    wallet,
                    expected_version,
                }],
                reverses: None,
            })
            .unwrap();
        tx
    }

    #[test]
    fn test_insert_and_load_wallet() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();

        let loaded = store.load_wallet(&WalletId::new("w-1")).unwrap();
        assert_eq!(loaded.map(|w| w.wallet_id), Some(WalletId::new("w-1")));
        assert!(store.load_wallet(&WalletId::new("w-2")).unwrap().is_none());
    }

    #[test]
    fn test_insert_duplicate_wallet() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();

        let error = store.insert_wallet(wallet("w-1")).unwrap_err();
        assert_eq!(error.kind(), ErrorKind::DuplicateWallet);
    }

    #[test]
    fn test_commit_makes_everything_visible() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();

        let tx = deposit(&store, "w-1", "k1", usd(500));

        let stored = store.load_wallet(&WalletId::new("w-1")).unwrap().unwrap();
        assert_eq!(stored.balance, usd(500));
        assert_eq!(stored.version, 1);
        assert_eq!(store.entry_count(), 1);
        assert_eq!(
            store.transaction_for_key(&IdempotencyKey::new("k1")).unwrap(),
            Some(tx.clone())
        );
        assert_eq!(store.entries_for_transaction(&tx.transaction_id).unwrap().len(), 1);
        assert_eq!(
            store.sum_for_wallet(&WalletId::new("w-1"), Currency::USD).unwrap(),
            usd(500)
        );
    }

    #[test]
    fn test_commit_with_stale_version_writes_nothing() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();
        deposit(&store, "w-1", "k1", usd(500));

        // A unit of work that read the wallet before the deposit above
        let mut stale = wallet("w-1");
        stale.apply_delta(usd(100), Direction::Credit).unwrap();
        let tx = transaction("k2");
        let entry = credit(&stale, &tx, usd(100));

        let error = store
            .commit(UnitOfWork {
                transaction: tx,
                entries: vec![entry],
                wallets: vec![WalletWrite {
                    wallet: stale,
                    expected_version: 0,
                }],
                reverses: None,
            })
            .unwrap_err();

        assert_eq!(
            error,
            LedgerError::VersionConflict {
                wallet: WalletId::new("w-1"),
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(store.entry_count(), 1);
        assert!(store.transaction_for_key(&IdempotencyKey::new("k2")).unwrap().is_none());
    }

    #[test]
    fn test_append_rejects_duplicate_entry_ids() {
        let store = InMemoryLedgerStore::new();
        let w = wallet("w-1");
        let tx = transaction("k1");
        let entry = credit(&w, &tx, usd(1));

        store.append(std::slice::from_ref(&entry)).unwrap();
        let error = store.append(&[entry.clone()]).unwrap_err();

        assert!(error.is_fatal());
        assert_eq!(error, LedgerError::DuplicateEntry { entry: entry.entry_id });
        assert_eq!(store.entry_count(), 1);
    }

    #[test]
    fn test_append_rejects_duplicates_within_batch() {
        let store = InMemoryLedgerStore::new();
        let w = wallet("w-1");
        let tx = transaction("k1");
        let entry = credit(&w, &tx, usd(1));

        let error = store.append(&[entry.clone(), entry]).unwrap_err();

        assert_eq!(error.kind(), ErrorKind::DuplicateEntry);
        assert_eq!(store.entry_count(), 0);
    }

    #[test]
    fn test_entries_for_wallet_newest_first() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();
        deposit(&store, "w-1", "k1", usd(100));
        deposit(&store, "w-1", "k2", usd(200));
        deposit(&store, "w-1", "k3", usd(300));

        let entries = store
            .entries_for_wallet(&WalletId::new("w-1"), &EntryQuery::new())
            .unwrap();
        let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();

        assert_eq!(sequences, vec![3, 2, 1]);
        assert!(store
            .entries_for_wallet(&WalletId::new("nobody"), &EntryQuery::new())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_reversal_mark_is_part_of_commit() {
        let store = InMemoryLedgerStore::new();
        store.insert_wallet(wallet("w-1")).unwrap();
        let original = deposit(&store, "w-1", "k1", usd(100));

        let mut reversal = transaction("r1");
        reversal.kind = TransactionKind::Reversal;
        reversal.reverses = Some(original.transaction_id);
        let unit = UnitOfWork {
            transaction: reversal.clone(),
            entries: Vec::new(),
            wallets: Vec::new(),
            reverses: Some(original.transaction_id),
        };
        store.commit(unit.clone()).unwrap();

        let stored = store.get_transaction(&original.transaction_id).unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Reversed);
        assert_eq!(stored.reversed_by, Some(reversal.transaction_id));

        // A second reversal of the same original is refused
        let mut again = unit;
        again.transaction = transaction("r2");
        assert_eq!(store.commit(again).unwrap_err().kind(), ErrorKind::InvalidReversal);
    }

    #[test]
    fn test_failed_transactions_are_not_indexed_by_key() {
        let store = InMemoryLedgerStore::new();
        let mut failed = transaction("k1");
        failed.status = TransactionStatus::Failed;

        store.record_failed(failed.clone()).unwrap();

        assert_eq!(store.get_transaction(&failed.transaction_id).unwrap(), Some(failed));
        assert!(store.transaction_for_key(&IdempotencyKey::new("k1")).unwrap().is_none());
    }
}
