//! Types module
//!
//! Contains core data structures used throughout the ledger.
//! This module organizes types into logical submodules:
//! - `money`: Currency and fixed-point money
//! - `wallet`: Wallet aggregate and identifiers
//! - `entry`: Immutable ledger entries and entry queries
//! - `transaction`: Transaction records and operation results
//! - `request`: Typed operation requests and commands
//! - `error`: Error types for the ledger

pub mod entry;
pub mod error;
pub mod money;
pub mod request;
pub mod transaction;
pub mod wallet;

pub use entry::{Direction, EntryCategory, EntryId, EntryQuery, LedgerEntry};
pub use error::{ErrorKind, LedgerError};
pub use money::{Currency, Money};
pub use request::{
    CommandOutcome, Conversion, DepositRequest, LedgerCommand, OperationRequest, PaymentRequest,
    ReplayRecord, ReverseRequest, TransactionRef, TransferRequest, WithdrawRequest,
};
pub use transaction::{
    FailureReason, IdempotencyKey, OperationOutcome, PaymentParties, Transaction, TransactionId,
    TransactionKind, TransactionStatus, TransactionSummary,
};
pub use wallet::{OwnerId, Wallet, WalletId, WalletStatus};
