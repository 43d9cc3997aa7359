//! Ledger engine
//!
//! This module provides the `LedgerEngine` that turns operation requests into
//! atomic, balanced sets of ledger entries by coordinating the lock manager,
//! the idempotency guard and the ledger store.
//!
//! # Operation Flow
//!
//! ```text
//! request ─▶ validate ─▶ lock wallets (ascending id) ─▶ idempotency check
//!                                                        │
//!                        ┌── already completed ◀─────────┤
//!                        ▼                               ▼
//!                 stored summary          load wallets, check rules, post
//!                                          entries, commit unit of work
//!                                                        │
//!                              unlock ◀──────────────────┘
//!                                │
//!                                ▼
//!                        commit observer
//! ```
//!
//! Validation failures are returned before any write. Failures inside the
//! unit of work leave no balance effect; they are recorded as `failed`
//! transactions and release the idempotency key so the caller can retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::idempotency::{IdempotencyGuard, Reservation};
use super::integrity::IntegrityReport;
use super::locks::LockManager;
use super::memory_store::InMemoryLedgerStore;
use super::traits::{CommitObserver, LedgerStore, UnitOfWork, WalletWrite};
use crate::config::EngineConfig;
use crate::types::{
    CommandOutcome, Currency, DepositRequest, Direction, EntryCategory, EntryId, EntryQuery,
    FailureReason, IdempotencyKey, LedgerCommand, LedgerEntry, LedgerError, Money,
    OperationOutcome, OperationRequest, OwnerId, PaymentRequest, ReverseRequest, Transaction,
    TransactionId, TransactionKind, TransactionRef, TransactionStatus, TransactionSummary,
    TransferRequest, Wallet, WalletId, WalletStatus, WithdrawRequest,
};

/// Ledger engine
///
/// Thread-safe: share it behind an `Arc` and call it from any number of
/// threads. Operations on disjoint wallets never wait on each other.
pub struct LedgerEngine<S: LedgerStore = InMemoryLedgerStore> {
    store: Arc<S>,
    locks: LockManager,
    idempotency: IdempotencyGuard,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    observer: Option<Arc<dyn CommitObserver>>,
}

impl LedgerEngine<InMemoryLedgerStore> {
    /// Engine over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()), config)
    }
}

impl<S: LedgerStore> LedgerEngine<S> {
    /// Create a new LedgerEngine using the system clock
    ///
    /// # Arguments
    ///
    /// * `store` - Storage backend for wallets, entries and transactions
    /// * `config` - Lock timeout, reservation TTL and paging defaults
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create a new LedgerEngine with an explicit clock source
    pub fn with_clock(store: Arc<S>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let idempotency = IdempotencyGuard::new(config.reservation_ttl(), Arc::clone(&clock));
        LedgerEngine {
            store,
            locks: LockManager::new(),
            idempotency,
            clock,
            config,
            observer: None,
        }
    }

    /// Notify `observer` after every commit, outside the locked region
    pub fn with_observer(mut self, observer: Arc<dyn CommitObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    // Wallet lifecycle

    /// Create an empty, active wallet
    ///
    /// # Errors
    ///
    /// `DuplicateWallet` if the id is already taken.
    pub fn open_wallet(
        &self,
        wallet_id: WalletId,
        owner_id: OwnerId,
        currency: Currency,
    ) -> Result<Wallet, LedgerError> {
        let _locks = self
            .locks
            .acquire(std::slice::from_ref(&wallet_id), self.config.lock_timeout())?;

        let wallet = Wallet::open(wallet_id, owner_id, currency, self.clock.now());
        self.store.insert_wallet(wallet.clone())?;

        debug!(
            wallet = %wallet.wallet_id,
            owner = %wallet.owner_id,
            currency = %wallet.currency,
            "Opened wallet"
        );
        Ok(wallet)
    }

    pub fn suspend_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.change_status(wallet_id, WalletStatus::Suspended)
    }

    pub fn activate_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.change_status(wallet_id, WalletStatus::Active)
    }

    /// Close a wallet for good; its history stays readable
    pub fn close_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.change_status(wallet_id, WalletStatus::Closed)
    }

    fn change_status(
        &self,
        wallet_id: &WalletId,
        status: WalletStatus,
    ) -> Result<Wallet, LedgerError> {
        let _locks = self
            .locks
            .acquire(std::slice::from_ref(wallet_id), self.config.lock_timeout())?;

        let mut wallet = self.load_wallet(wallet_id)?;
        let expected_version = wallet.version;
        wallet.transition(status)?;

        if status == WalletStatus::Closed && !wallet.balance.is_zero() {
            warn!(
                wallet = %wallet_id,
                balance = %wallet.balance,
                "Closing wallet with non-zero balance"
            );
        }

        self.store.update_wallet(&wallet, expected_version)?;
        debug!(wallet = %wallet_id, status = %status, "Changed wallet status");
        Ok(wallet)
    }

    // Money movement

    pub fn deposit(&self, request: DepositRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute(request.into())
    }

    pub fn withdraw(&self, request: WithdrawRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute(request.into())
    }

    pub fn transfer(&self, request: TransferRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute(request.into())
    }

    pub fn payment(&self, request: PaymentRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute(request.into())
    }

    pub fn reverse(&self, request: ReverseRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute(request.into())
    }

    /// Execute a request with the configured lock timeout
    pub fn execute(&self, request: OperationRequest) -> Result<OperationOutcome, LedgerError> {
        self.execute_with_timeout(request, self.config.lock_timeout())
    }

    /// Execute a request, giving up on lock acquisition after `timeout`
    ///
    /// The timeout only bounds the wait for wallet locks. Once the unit of
    /// work starts it runs to completion or fails atomically.
    ///
    /// # Returns
    ///
    /// * `Ok(OperationOutcome::Completed)` when the request committed
    /// * `Ok(OperationOutcome::AlreadyProcessed)` when its idempotency key had
    ///   already completed; the stored result is returned unchanged
    /// * `Err(LedgerError)` otherwise, with nothing written except a `failed`
    ///   transaction record
    pub fn execute_with_timeout(
        &self,
        request: OperationRequest,
        timeout: Duration,
    ) -> Result<OperationOutcome, LedgerError> {
        let key = request.idempotency_key().clone();

        if let Err(error) = request.validate() {
            warn!(key = %key, kind = %error.kind(), "Rejected request: {}", error);
            return Err(error);
        }

        let fingerprint = request.fingerprint();
        let plan = self.plan(&request)?;
        let participants = plan.participants();

        let locks = self.locks.acquire(&participants, timeout)?;

        let token = match self
            .idempotency
            .check_and_reserve(&key, fingerprint, self.store.as_ref())?
        {
            Reservation::AlreadyProcessed(existing) => {
                let entries = self.store.entries_for_transaction(&existing.transaction_id)?;
                drop(locks);
                debug!(
                    key = %key,
                    transaction = %existing.transaction_id,
                    "Returning stored result for completed request"
                );
                return Ok(OperationOutcome::AlreadyProcessed(
                    TransactionSummary::from_parts(&existing, &entries),
                ));
            }
            Reservation::Reserved(token) => token,
        };

        let mut transaction = self.draft(&plan, &key, fingerprint, participants);

        match self.run_unit(&plan, &mut transaction) {
            Ok(entries) => {
                self.idempotency.complete(&key, token);
                drop(locks);

                debug!(
                    key = %key,
                    transaction = %transaction.transaction_id,
                    kind = %transaction.kind,
                    amount = %transaction.amount,
                    entries = entries.len(),
                    "Committed transaction"
                );
                if let Some(observer) = &self.observer {
                    observer.on_commit(&transaction, &entries);
                }
                Ok(OperationOutcome::Completed(TransactionSummary::from_parts(
                    &transaction,
                    &entries,
                )))
            }
            Err(error) => {
                self.record_failure(&mut transaction, &error);
                self.idempotency.release(&key, token);
                drop(locks);
                Err(error)
            }
        }
    }

    /// Process any ledger command
    pub fn process(&self, command: LedgerCommand) -> Result<CommandOutcome, LedgerError> {
        match command {
            LedgerCommand::OpenWallet {
                wallet_id,
                owner_id,
                currency,
            } => self
                .open_wallet(wallet_id, owner_id, currency)
                .map(CommandOutcome::Wallet),
            LedgerCommand::ChangeStatus { wallet_id, status } => self
                .change_status(&wallet_id, status)
                .map(CommandOutcome::Wallet),
            LedgerCommand::Execute(request) => {
                self.execute(request).map(CommandOutcome::Operation)
            }
        }
    }

    // Reads

    /// # Errors
    ///
    /// `WalletNotFound` if no wallet has this id.
    pub fn get_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.load_wallet(wallet_id)
    }

    /// All wallets sorted by id
    pub fn list_wallets(&self) -> Result<Vec<Wallet>, LedgerError> {
        let mut wallets = self.store.list_wallets()?;
        wallets.sort_by(|a, b| a.wallet_id.cmp(&b.wallet_id));
        Ok(wallets)
    }

    /// Entries of a wallet, newest first
    ///
    /// A query without a limit gets the configured default page size.
    pub fn list_entries(
        &self,
        wallet_id: &WalletId,
        query: &EntryQuery,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.load_wallet(wallet_id)?;
        let mut query = query.clone();
        if query.limit.is_none() {
            query.limit = Some(self.config.default_page_size);
        }
        self.store.entries_for_wallet(wallet_id, &query)
    }

    pub fn get_transaction(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .get_transaction(id)?
            .ok_or_else(|| LedgerError::transaction_not_found(id))
    }

    /// Completed transaction recorded under an idempotency key
    pub fn transaction_for_key(&self, key: &IdempotencyKey) -> Result<Transaction, LedgerError> {
        self.store
            .transaction_for_key(key)?
            .ok_or_else(|| LedgerError::transaction_not_found(key))
    }

    /// Recompute a wallet's balance from its entries and compare
    ///
    /// Holds the wallet lock so the wallet and its entries are read at the
    /// same commit.
    pub fn verify_integrity(&self, wallet_id: &WalletId) -> Result<IntegrityReport, LedgerError> {
        let _locks = self
            .locks
            .acquire(std::slice::from_ref(wallet_id), self.config.lock_timeout())?;

        let wallet = self.load_wallet(wallet_id)?;
        let mut entries = self.store.entries_for_wallet(wallet_id, &EntryQuery::new())?;
        entries.reverse();
        let folded = self.store.sum_for_wallet(wallet_id, wallet.currency)?;

        IntegrityReport::audit(&wallet, &entries, folded)
    }

    /// [`verify_integrity`](Self::verify_integrity) for every wallet
    pub fn verify_all(&self) -> Result<Vec<IntegrityReport>, LedgerError> {
        let reports = self
            .list_wallets()?
            .iter()
            .map(|wallet| self.verify_integrity(&wallet.wallet_id))
            .collect::<Result<Vec<_>, _>>()?;

        let inconsistent = reports.iter().filter(|r| !r.is_consistent()).count();
        info!(
            wallets = reports.len(),
            inconsistent, "Verified wallet balances against ledger entries"
        );
        Ok(reports)
    }

    // Internals

    fn load_wallet(&self, wallet_id: &WalletId) -> Result<Wallet, LedgerError> {
        self.store
            .load_wallet(wallet_id)?
            .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))
    }

    fn plan<'r>(&self, request: &'r OperationRequest) -> Result<Plan<'r>, LedgerError> {
        Ok(match request {
            OperationRequest::Deposit(r) => Plan::Deposit(r),
            OperationRequest::Withdraw(r) => Plan::Withdraw(r),
            OperationRequest::Transfer(r) => Plan::Transfer {
                transfer: r,
                payment: None,
            },
            OperationRequest::Payment(r) => Plan::Transfer {
                transfer: &r.transfer,
                payment: Some(r),
            },
            OperationRequest::Reverse(r) => {
                let original = match &r.target {
                    TransactionRef::Id(id) => self.get_transaction(id)?,
                    TransactionRef::Reference(key) => self.transaction_for_key(key)?,
                };
                Plan::Reverse {
                    request: r,
                    original,
                }
            }
        })
    }

    fn draft(
        &self,
        plan: &Plan<'_>,
        key: &IdempotencyKey,
        fingerprint: u64,
        participants: Vec<WalletId>,
    ) -> Transaction {
        let (kind, amount, counter_amount, exchange_rate, payment, description, reverses) =
            match plan {
                Plan::Deposit(r) => (
                    TransactionKind::Deposit,
                    r.amount,
                    None,
                    None,
                    None,
                    r.source.clone(),
                    None,
                ),
                Plan::Withdraw(r) => (
                    TransactionKind::Withdrawal,
                    r.amount,
                    None,
                    None,
                    None,
                    r.destination.clone(),
                    None,
                ),
                Plan::Transfer { transfer, payment } => (
                    if payment.is_some() {
                        TransactionKind::Payment
                    } else {
                        TransactionKind::Transfer
                    },
                    transfer.amount,
                    transfer.conversion.map(|c| c.target_amount),
                    transfer.conversion.map(|c| c.rate),
                    payment.map(|p| p.parties.clone()),
                    payment
                        .map(|p| p.memo.clone())
                        .unwrap_or_else(|| transfer.description.clone()),
                    None,
                ),
                Plan::Reverse { request, original } => (
                    TransactionKind::Reversal,
                    original.amount,
                    original.counter_amount,
                    original.exchange_rate,
                    None,
                    request.reason.clone(),
                    Some(original.transaction_id),
                ),
            };

        Transaction {
            transaction_id: TransactionId::generate(),
            kind,
            status: TransactionStatus::Pending,
            participants,
            entry_ids: Vec::new(),
            idempotency_key: key.clone(),
            fingerprint,
            amount,
            counter_amount,
            exchange_rate,
            payment,
            description,
            reverses,
            reversed_by: None,
            created_at: self.clock.now(),
            completed_at: None,
            failure: None,
        }
    }

    /// Build and commit the unit of work for `plan`
    ///
    /// Runs with every participant wallet locked. On success `transaction`
    /// is completed and the written entries are returned.
    fn run_unit(
        &self,
        plan: &Plan<'_>,
        transaction: &mut Transaction,
    ) -> Result<Vec<LedgerEntry>, LedgerError> {
        let now = self.clock.now();
        let mut unit = UnitBuilder::new(self.store.as_ref(), transaction, now);

        match plan {
            Plan::Deposit(r) => {
                let wallet = unit.wallet(&r.wallet_id)?;
                wallet.assert_active()?;
                wallet.assert_currency(&r.amount)?;
                unit.post(
                    &r.wallet_id,
                    Direction::Credit,
                    r.amount,
                    EntryCategory::Deposit,
                    &r.source,
                    None,
                )?;
            }
            Plan::Withdraw(r) => {
                let wallet = unit.wallet(&r.wallet_id)?;
                wallet.assert_active()?;
                wallet.assert_currency(&r.amount)?;
                wallet.check_sufficient_funds(&r.amount)?;
                unit.post(
                    &r.wallet_id,
                    Direction::Debit,
                    r.amount,
                    EntryCategory::Withdrawal,
                    &r.destination,
                    None,
                )?;
            }
            Plan::Transfer { transfer, payment } => {
                let (out_category, in_category) = match payment {
                    Some(_) => (EntryCategory::PaymentOut, EntryCategory::PaymentIn),
                    None => (EntryCategory::TransferOut, EntryCategory::TransferIn),
                };
                let description = payment
                    .map(|p| p.memo.as_str())
                    .unwrap_or(transfer.description.as_str());

                let from = unit.wallet(&transfer.from)?.clone();
                let to = unit.wallet(&transfer.to)?.clone();
                from.assert_active()?;
                to.assert_active()?;
                from.assert_currency(&transfer.amount)?;
                let (credit, rate) = credit_side(transfer, &to)?;
                from.check_sufficient_funds(&transfer.amount)?;

                unit.post(
                    &transfer.from,
                    Direction::Debit,
                    transfer.amount,
                    out_category,
                    description,
                    rate,
                )?;
                unit.post(
                    &transfer.to,
                    Direction::Credit,
                    credit,
                    in_category,
                    description,
                    rate,
                )?;
            }
            Plan::Reverse { request, original } => {
                // Re-read under the locks; it may have been reversed meanwhile
                let original = self.get_transaction(&original.transaction_id)?;
                match original.status {
                    TransactionStatus::Completed => {}
                    TransactionStatus::Reversed => {
                        return Err(LedgerError::invalid_reversal(
                            original.transaction_id,
                            "already reversed",
                        ))
                    }
                    _ => {
                        return Err(LedgerError::invalid_reversal(
                            original.transaction_id,
                            "only completed transactions can be reversed",
                        ))
                    }
                }
                if original.kind == TransactionKind::Reversal {
                    return Err(LedgerError::invalid_reversal(
                        original.transaction_id,
                        "a reversal cannot itself be reversed",
                    ));
                }

                for wallet_id in &original.participants {
                    unit.wallet(wallet_id)?.assert_active()?;
                }

                let description = if request.reason.is_empty() {
                    format!("reversal of {}", original.transaction_id)
                } else {
                    request.reason.clone()
                };
                for entry in self.store.entries_for_transaction(&original.transaction_id)? {
                    unit.post(
                        &entry.wallet_id,
                        entry.direction.opposite(),
                        entry.amount,
                        EntryCategory::Reversal,
                        &description,
                        entry.exchange_rate,
                    )?;
                }
                unit.reverses = Some(original.transaction_id);
            }
        }

        let (entries, wallets, reverses) = unit.finish();

        transaction.entry_ids = entries.iter().map(|entry| entry.entry_id).collect();
        transaction.status = TransactionStatus::Completed;
        transaction.completed_at = Some(now);
        transaction.verify_balanced(&entries)?;

        self.store.commit(UnitOfWork {
            transaction: transaction.clone(),
            entries: entries.clone(),
            wallets,
            reverses,
        })?;

        Ok(entries)
    }

    fn record_failure(&self, transaction: &mut Transaction, failure: &LedgerError) {
        transaction.status = TransactionStatus::Failed;
        transaction.entry_ids.clear();
        transaction.completed_at = None;
        transaction.failure = Some(FailureReason::from(failure));

        if failure.is_fatal() {
            error!(
                key = %transaction.idempotency_key,
                transaction = %transaction.transaction_id,
                "Fatal ledger error: {}",
                failure
            );
        } else {
            warn!(
                key = %transaction.idempotency_key,
                transaction = %transaction.transaction_id,
                kind = %failure.kind(),
                "Transaction failed: {}",
                failure
            );
        }

        if let Err(store_error) = self.store.record_failed(transaction.clone()) {
            warn!(
                transaction = %transaction.transaction_id,
                "Could not record failed transaction: {}",
                store_error
            );
        }
    }
}

/// Credit amount and rate for the destination of a transfer
fn credit_side(
    transfer: &TransferRequest,
    to: &Wallet,
) -> Result<(Money, Option<Decimal>), LedgerError> {
    match &transfer.conversion {
        Some(conversion) => {
            to.assert_currency(&conversion.target_amount)?;
            Ok((conversion.target_amount, Some(conversion.rate)))
        }
        None => {
            to.assert_currency(&transfer.amount)?;
            Ok((transfer.amount, None))
        }
    }
}

/// Request resolved against stored state, ready to lock
enum Plan<'r> {
    Deposit(&'r DepositRequest),
    Withdraw(&'r WithdrawRequest),
    Transfer {
        transfer: &'r TransferRequest,
        payment: Option<&'r PaymentRequest>,
    },
    Reverse {
        request: &'r ReverseRequest,
        original: Transaction,
    },
}

impl Plan<'_> {
    /// Wallets to lock, in lock order
    fn participants(&self) -> Vec<WalletId> {
        let mut wallets = match self {
            Plan::Deposit(r) => vec![r.wallet_id.clone()],
            Plan::Withdraw(r) => vec![r.wallet_id.clone()],
            Plan::Transfer { transfer, .. } => vec![transfer.from.clone(), transfer.to.clone()],
            Plan::Reverse { original, .. } => original.participants.clone(),
        };
        wallets.sort();
        wallets.dedup();
        wallets
    }
}

/// Working copy of the wallets and entries of one unit of work
struct UnitBuilder<'s, S: ?Sized> {
    store: &'s S,
    transaction_id: TransactionId,
    reference: String,
    now: DateTime<Utc>,
    wallets: Vec<WalletWrite>,
    entries: Vec<LedgerEntry>,
    reverses: Option<TransactionId>,
}

impl<'s, S: LedgerStore + ?Sized> UnitBuilder<'s, S> {
    fn new(store: &'s S, transaction: &Transaction, now: DateTime<Utc>) -> Self {
        Self {
            store,
            transaction_id: transaction.transaction_id,
            reference: transaction.idempotency_key.to_string(),
            now,
            wallets: Vec::new(),
            entries: Vec::new(),
            reverses: None,
        }
    }

    /// Working copy of a wallet, loaded on first use
    fn wallet(&mut self, wallet_id: &WalletId) -> Result<&mut Wallet, LedgerError> {
        let index = match self
            .wallets
            .iter()
            .position(|write| write.wallet.wallet_id == *wallet_id)
        {
            Some(index) => index,
            None => {
                let wallet = self
                    .store
                    .load_wallet(wallet_id)?
                    .ok_or_else(|| LedgerError::wallet_not_found(wallet_id))?;
                self.wallets.push(WalletWrite {
                    expected_version: wallet.version,
                    wallet,
                });
                self.wallets.len() - 1
            }
        };
        Ok(&mut self.wallets[index].wallet)
    }

    /// Apply a movement to the working wallet and record its entry
    fn post(
        &mut self,
        wallet_id: &WalletId,
        direction: Direction,
        amount: Money,
        category: EntryCategory,
        description: &str,
        exchange_rate: Option<Decimal>,
    ) -> Result<(), LedgerError> {
        let transaction_id = self.transaction_id;
        let reference = Some(self.reference.clone());
        let created_at = self.now;

        let wallet = self.wallet(wallet_id)?;
        wallet.apply_delta(amount, direction)?;

        let entry = LedgerEntry {
            entry_id: EntryId::generate(),
            wallet_id: wallet_id.clone(),
            transaction_id,
            sequence: wallet.version,
            direction,
            amount,
            balance_after: wallet.balance,
            category,
            reference,
            description: description.to_string(),
            exchange_rate,
            created_at,
        };
        self.entries.push(entry);
        Ok(())
    }

    fn finish(self) -> (Vec<LedgerEntry>, Vec<WalletWrite>, Option<TransactionId>) {
        (self.entries, self.wallets, self.reverses)
    }
}
