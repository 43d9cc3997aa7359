//! Core traits for ledger storage and commit notification
//!
//! The engine consumes storage through these traits and never depends on a
//! particular engine. [`InMemoryLedgerStore`](crate::core::InMemoryLedgerStore)
//! is the bundled implementation; anything offering transactional writes,
//! point reads and range scans can stand in for it.

use crate::types::{
    Currency, EntryQuery, IdempotencyKey, LedgerEntry, LedgerError, Money, Transaction,
    TransactionId, Wallet, WalletId,
};

/// Append-only record of every balance movement
pub trait EntryStore: Send + Sync {
    /// Write a batch of entries atomically (all or nothing)
    ///
    /// Fails with `DuplicateEntry` when any entry id already exists and with
    /// `StorageUnavailable` when the backend cannot complete the write.
    fn append(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError>;

    /// Entries of one wallet, newest first, filtered and paginated by `query`
    fn entries_for_wallet(
        &self,
        wallet_id: &WalletId,
        query: &EntryQuery,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Recompute a wallet balance by folding all of its entries
    ///
    /// Used for integrity verification, not on the hot path.
    fn sum_for_wallet(
        &self,
        wallet_id: &WalletId,
        currency: Currency,
    ) -> Result<Money, LedgerError> {
        self.entries_for_wallet(wallet_id, &EntryQuery::new())?
            .iter()
            .try_fold(Money::zero(currency), |sum, entry| {
                sum.add(entry.signed_amount())
            })
    }
}

/// A wallet state to persist, with the version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct WalletWrite {
    pub wallet: Wallet,
    pub expected_version: u64,
}

/// Everything one operation writes
///
/// Committed as a single atomic unit: either every wallet update, entry,
/// transaction record and reversal mark becomes visible, or none does.
#[derive(Debug, Clone)]
pub struct UnitOfWork {
    pub transaction: Transaction,
    pub entries: Vec<LedgerEntry>,
    pub wallets: Vec<WalletWrite>,
    /// Original transaction to mark `reversed`
    pub reverses: Option<TransactionId>,
}

/// Durable wallet, entry and transaction persistence
pub trait LedgerStore: EntryStore {
    /// Persist a new wallet; `DuplicateWallet` if the id is taken
    fn insert_wallet(&self, wallet: Wallet) -> Result<(), LedgerError>;

    fn load_wallet(&self, wallet_id: &WalletId) -> Result<Option<Wallet>, LedgerError>;

    /// Replace wallet state that changed outside a unit of work (status)
    ///
    /// Fails with `VersionConflict` when the stored version is not
    /// `expected_version`.
    fn update_wallet(&self, wallet: &Wallet, expected_version: u64) -> Result<(), LedgerError>;

    fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError>;

    /// Commit a unit of work atomically
    ///
    /// Fails with `VersionConflict` if any wallet moved since it was read,
    /// `DuplicateEntry` on entry id collisions, and `InvalidReversal` if the
    /// reversed transaction is no longer `completed`.
    fn commit(&self, unit: UnitOfWork) -> Result<(), LedgerError>;

    /// Store a failed transaction (no entries, no balance effect)
    fn record_failed(&self, transaction: Transaction) -> Result<(), LedgerError>;

    fn get_transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, LedgerError>;

    /// Completed (or since reversed) transaction produced under `key`
    fn transaction_for_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>, LedgerError>;

    /// Entries of one transaction, in write order
    fn entries_for_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Vec<LedgerEntry>, LedgerError>;
}

/// Hook invoked after a transaction committed and its wallet locks were
/// released
///
/// Notifications, fraud scoring and similar side effects belong here so they
/// never run while a wallet is locked.
pub trait CommitObserver: Send + Sync {
    fn on_commit(&self, transaction: &Transaction, entries: &[LedgerEntry]);
}
