//! Transaction records and operation results
//!
//! A [`Transaction`] groups the ledger entries written by one operation. It is
//! created once, at the end of the unit of work, and afterwards only its
//! terminal status may change (`completed` to `reversed`).

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entry::{Direction, EntryId, LedgerEntry};
use super::error::{ErrorKind, LedgerError};
use super::money::Money;
use super::wallet::WalletId;

/// Unique transaction identifier (time-ordered UUIDv7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-supplied token that makes a request exactly-once
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operation type of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
    Payment,
    /// Compensating transaction with equal and opposite entries
    Reversal,
}

impl TransactionKind {
    /// Whether the kind moves money between two wallets
    pub fn is_two_sided(&self) -> bool {
        matches!(self, TransactionKind::Transfer | TransactionKind::Payment)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Transfer => "transfer",
            TransactionKind::Payment => "payment",
            TransactionKind::Reversal => "reversal",
        };
        f.write_str(name)
    }
}

/// Transaction status
///
/// `Pending` exists only inside the engine's unit of work; stored
/// transactions are `Completed`, `Failed` or `Reversed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Reversed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Reversed => "reversed",
        };
        f.write_str(name)
    }
}

/// Externally resolved sender and recipient of a payment
///
/// The identifiers are whatever the caller resolved to wallets (email, phone,
/// account number); the ledger only records them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentParties {
    pub payer: String,
    pub payee: String,
}

/// Why a transaction failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReason {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&LedgerError> for FailureReason {
    fn from(error: &LedgerError) -> Self {
        FailureReason {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Stored transaction
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub transaction_id: TransactionId,

    pub kind: TransactionKind,

    pub status: TransactionStatus,

    /// Wallets touched, in lock order
    pub participants: Vec<WalletId>,

    /// Entries produced, in write order; empty for failed transactions
    pub entry_ids: Vec<EntryId>,

    pub idempotency_key: IdempotencyKey,

    /// Hash of the request that produced the transaction
    pub fingerprint: u64,

    /// Amount debited from (or credited to) the initiating wallet
    pub amount: Money,

    /// Amount credited to the destination of a currency-converting transfer
    pub counter_amount: Option<Money>,

    pub exchange_rate: Option<Decimal>,

    pub payment: Option<PaymentParties>,

    pub description: String,

    /// Original transaction when this is a reversal
    pub reverses: Option<TransactionId>,

    /// Compensating transaction once this one was reversed
    pub reversed_by: Option<TransactionId>,

    pub created_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub failure: Option<FailureReason>,
}

impl Transaction {
    /// Check the zero-sum rule against this transaction's entries
    ///
    /// Single-currency transfers and payments need equal debit and credit
    /// totals. Converted ones need one side to total `amount` and the other
    /// `counter_amount`. One-sided kinds (deposit, withdrawal and their
    /// reversals) are not subject to the rule.
    pub fn verify_balanced(&self, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
        let has_debits = entries.iter().any(|e| e.direction == Direction::Debit);
        let has_credits = entries.iter().any(|e| e.direction == Direction::Credit);
        if !self.kind.is_two_sided() && !(has_debits && has_credits) {
            return Ok(());
        }

        let debits = sum_direction(entries, Direction::Debit)?;
        let credits = sum_direction(entries, Direction::Credit)?;

        let balanced = match (debits, credits, self.counter_amount) {
            (Some(debits), Some(credits), None) => debits == credits,
            (Some(debits), Some(credits), Some(counter)) => {
                (debits == self.amount && credits == counter)
                    || (debits == counter && credits == self.amount)
            }
            _ => false,
        };

        if !balanced {
            return Err(LedgerError::invalid_transfer(&format!(
                "transaction {} does not balance",
                self.transaction_id
            )));
        }
        Ok(())
    }
}

fn sum_direction(
    entries: &[LedgerEntry],
    direction: Direction,
) -> Result<Option<Money>, LedgerError> {
    let mut total: Option<Money> = None;
    for entry in entries.iter().filter(|e| e.direction == direction) {
        total = Some(match total {
            Some(sum) => sum.add(entry.amount)?,
            None => entry.amount,
        });
    }
    Ok(total)
}

/// Result of a completed operation
///
/// Built only from stored state, so replaying an idempotency key yields a
/// summary equal to the first one.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSummary {
    pub transaction_id: TransactionId,
    pub kind: TransactionKind,
    /// Balance of each participant right after the transaction, in entry order
    pub balances: Vec<(WalletId, Money)>,
    pub entry_ids: Vec<EntryId>,
    pub completed_at: DateTime<Utc>,
}

impl TransactionSummary {
    pub fn from_parts(transaction: &Transaction, entries: &[LedgerEntry]) -> Self {
        let mut balances: Vec<(WalletId, Money)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match balances.iter_mut().find(|(wallet, _)| *wallet == entry.wallet_id) {
                Some(slot) => slot.1 = entry.balance_after,
                None => balances.push((entry.wallet_id.clone(), entry.balance_after)),
            }
        }

        TransactionSummary {
            transaction_id: transaction.transaction_id,
            kind: transaction.kind,
            balances,
            entry_ids: transaction.entry_ids.clone(),
            completed_at: transaction.completed_at.unwrap_or(transaction.created_at),
        }
    }

    /// Balance of `wallet` right after the transaction
    pub fn balance_of(&self, wallet: &WalletId) -> Option<Money> {
        self.balances
            .iter()
            .find(|(id, _)| id == wallet)
            .map(|(_, balance)| *balance)
    }
}

/// Outcome of a money-moving operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationOutcome {
    /// The operation ran and committed
    Completed(TransactionSummary),
    /// The idempotency key was already completed; nothing was re-executed
    AlreadyProcessed(TransactionSummary),
}

impl OperationOutcome {
    pub fn summary(&self) -> &TransactionSummary {
        match self {
            OperationOutcome::Completed(summary) | OperationOutcome::AlreadyProcessed(summary) => {
                summary
            }
        }
    }

    pub fn into_summary(self) -> TransactionSummary {
        match self {
            OperationOutcome::Completed(summary) | OperationOutcome::AlreadyProcessed(summary) => {
                summary
            }
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, OperationOutcome::AlreadyProcessed(_))
    }
}
