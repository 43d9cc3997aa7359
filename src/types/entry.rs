//! Ledger entries
//!
//! A ledger entry is one immutable balance movement on one wallet. Entries are
//! grouped by the transaction that produced them and are never updated or
//! deleted; the wallet balance is derived from them.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Money;
use super::transaction::TransactionId;
use super::wallet::WalletId;

/// Unique ledger entry identifier (time-ordered UUIDv7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Side of the movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Credit => Direction::Debit,
            Direction::Debit => Direction::Credit,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Credit => f.write_str("credit"),
            Direction::Debit => f.write_str("debit"),
        }
    }
}

/// What kind of operation produced the entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryCategory {
    Deposit,
    Withdrawal,
    TransferIn,
    TransferOut,
    PaymentIn,
    PaymentOut,
    Reversal,
}

impl fmt::Display for EntryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryCategory::Deposit => "deposit",
            EntryCategory::Withdrawal => "withdrawal",
            EntryCategory::TransferIn => "transfer_in",
            EntryCategory::TransferOut => "transfer_out",
            EntryCategory::PaymentIn => "payment_in",
            EntryCategory::PaymentOut => "payment_out",
            EntryCategory::Reversal => "reversal",
        };
        f.write_str(name)
    }
}

/// Immutable record of a single balance movement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: EntryId,

    pub wallet_id: WalletId,

    /// Groups the entries written by one operation
    pub transaction_id: TransactionId,

    /// Wallet version after this entry applied; totally orders a wallet's
    /// entries by commit
    pub sequence: u64,

    pub direction: Direction,

    /// Magnitude of the movement, never negative
    pub amount: Money,

    /// Wallet balance right after this entry
    pub balance_after: Money,

    pub category: EntryCategory,

    /// External reference (idempotency key of the producing request)
    pub reference: Option<String>,

    pub description: String,

    /// Rate applied when the entry belongs to a currency-converting transfer
    pub exchange_rate: Option<Decimal>,

    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Amount with the sign of its direction (credits positive)
    pub fn signed_amount(&self) -> Money {
        match self.direction {
            Direction::Credit => self.amount,
            Direction::Debit => Money::from_minor(-self.amount.minor(), self.amount.currency()),
        }
    }
}

/// Filters and pagination for [`LedgerEntry`] listings
///
/// Results are always newest first. `offset` skips that many matching entries,
/// `limit` caps the page size (the engine substitutes its configured default
/// page size when `None`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryQuery {
    pub direction: Option<Direction>,
    pub category: Option<EntryCategory>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl EntryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    pub fn category(mut self, category: EntryCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` passes the filters (pagination not applied)
    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.direction.map_or(true, |d| entry.direction == d)
            && self.category.map_or(true, |c| entry.category == c)
            && self.since.map_or(true, |since| entry.created_at >= since)
            && self.until.map_or(true, |until| entry.created_at < until)
    }

    /// Apply filters and pagination to entries given oldest first
    pub fn apply<'a, I>(&self, entries: I) -> Vec<LedgerEntry>
    where
        I: DoubleEndedIterator<Item = &'a LedgerEntry>,
    {
        let matching = entries.rev().filter(|entry| self.matches(entry)).skip(self.offset);
        match self.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        }
    }
}
