//! Error types for the wallet ledger
//!
//! This module defines every error the ledger core and its replay driver can
//! return. Each variant carries enough context to produce a human-readable
//! reason, and [`LedgerError::kind`] maps it onto a stable [`ErrorKind`] that
//! callers can match on without depending on message text.
//!
//! # Error Categories
//!
//! - **Validation**: invalid amounts, currency mismatches, inactive wallets,
//!   insufficient funds, invalid transfers and reversals. Detected before any
//!   write and never retried by the core.
//! - **Retryable**: storage outages, lock timeouts, in-flight duplicates and
//!   version conflicts. Safe to retry with the same idempotency key.
//! - **Fatal**: duplicate ledger entry ids, which indicate a bug or corrupted
//!   storage.
//! - **Replay I/O**: file, CSV and configuration errors of the CLI driver.

use std::fmt;

use thiserror::Error;

use super::entry::EntryId;
use super::money::{Currency, Money};
use super::transaction::{IdempotencyKey, TransactionId};
use super::wallet::{WalletId, WalletStatus};

/// Main error type for the wallet ledger
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    /// Amount is malformed, non-positive where a positive is required, or
    /// exceeds the currency's precision
    #[error("Invalid amount '{amount}': {reason}")]
    InvalidAmount {
        /// The offending amount as supplied
        amount: String,
        /// Why it was rejected
        reason: String,
    },

    /// Two monetary values (or a value and a wallet) disagree on currency
    #[error("Currency mismatch: expected {expected}, got {actual}")]
    CurrencyMismatch {
        /// Currency required by the operation
        expected: Currency,
        /// Currency that was supplied
        actual: Currency,
    },

    /// Checked minor-unit arithmetic overflowed
    #[error("Arithmetic overflow in {operation}")]
    ArithmeticOverflow {
        /// Operation that would overflow
        operation: String,
    },

    /// No wallet exists with the given id
    #[error("Wallet {wallet} not found")]
    WalletNotFound {
        /// The missing wallet
        wallet: WalletId,
    },

    /// A wallet with the given id already exists
    #[error("Wallet {wallet} already exists")]
    DuplicateWallet {
        /// The duplicated wallet id
        wallet: WalletId,
    },

    /// Wallet is suspended or closed and cannot take part in the operation
    #[error("Wallet {wallet} is {status}")]
    WalletInactive {
        /// The inactive wallet
        wallet: WalletId,
        /// Its current status
        status: WalletStatus,
    },

    /// Requested wallet status change is not allowed from the current status
    #[error("Wallet {wallet} cannot move from {from} to {to}")]
    InvalidStatusTransition {
        /// The wallet
        wallet: WalletId,
        /// Current status
        from: WalletStatus,
        /// Requested status
        to: WalletStatus,
    },

    /// Available balance is lower than the requested debit
    #[error("Insufficient funds in wallet {wallet}: available {available}, requested {requested}")]
    InsufficientFunds {
        /// Wallet being debited
        wallet: WalletId,
        /// Available balance at validation time
        available: Money,
        /// Requested debit
        requested: Money,
    },

    /// Transfer or payment request is structurally invalid (self-transfer,
    /// bad conversion quote, ...)
    #[error("Invalid transfer: {reason}")]
    InvalidTransfer {
        /// Why the transfer was rejected
        reason: String,
    },

    /// Referenced transaction does not exist
    #[error("Transaction {transaction} not found")]
    TransactionNotFound {
        /// Transaction id or reference that was looked up
        transaction: String,
    },

    /// Transaction cannot be reversed
    #[error("Transaction {transaction} cannot be reversed: {reason}")]
    InvalidReversal {
        /// Transaction that was targeted
        transaction: TransactionId,
        /// Why the reversal was rejected
        reason: String,
    },

    /// An entry id collided with an existing entry
    ///
    /// Indicates a bug or storage corruption. Logged and surfaced, never
    /// swallowed.
    #[error("Duplicate ledger entry {entry}")]
    DuplicateEntry {
        /// The colliding entry id
        entry: EntryId,
    },

    /// Stored wallet version differs from the version the unit of work read
    #[error("Version conflict on wallet {wallet}: expected {expected}, found {actual}")]
    VersionConflict {
        /// The wallet
        wallet: WalletId,
        /// Version read at the start of the unit of work
        expected: u64,
        /// Version found at commit
        actual: u64,
    },

    /// Idempotency key was already used for a different request
    #[error("Idempotency key '{key}' was already used for a different request")]
    IdempotencyKeyReused {
        /// The reused key
        key: IdempotencyKey,
    },

    /// Another attempt holding the same idempotency key is still running
    #[error("Request with idempotency key '{key}' is already in flight")]
    RequestInFlight {
        /// The reserved key
        key: IdempotencyKey,
    },

    /// Underlying storage could not complete the request
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the storage failure
        message: String,
    },

    /// Wallet lock could not be acquired within the caller's timeout
    #[error("Timed out after {waited_ms}ms waiting for wallet {wallet}")]
    OperationTimeout {
        /// Wallet whose lock was contended
        wallet: WalletId,
        /// Time spent waiting
        waited_ms: u64,
    },

    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error occurred
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// Configuration could not be loaded
    #[error("Configuration error: {message}")]
    ConfigError {
        /// Description of the configuration problem
        message: String,
    },
}

/// Stable, payload-free classification of a [`LedgerError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    CurrencyMismatch,
    ArithmeticOverflow,
    WalletNotFound,
    DuplicateWallet,
    WalletInactive,
    InvalidStatusTransition,
    InsufficientFunds,
    InvalidTransfer,
    TransactionNotFound,
    InvalidReversal,
    DuplicateEntry,
    VersionConflict,
    IdempotencyKeyReused,
    RequestInFlight,
    StorageUnavailable,
    OperationTimeout,
    Io,
    Parse,
    Config,
}

impl ErrorKind {
    /// Snake-case name used in logs and failure records
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAmount => "invalid_amount",
            ErrorKind::CurrencyMismatch => "currency_mismatch",
            ErrorKind::ArithmeticOverflow => "arithmetic_overflow",
            ErrorKind::WalletNotFound => "wallet_not_found",
            ErrorKind::DuplicateWallet => "duplicate_wallet",
            ErrorKind::WalletInactive => "wallet_inactive",
            ErrorKind::InvalidStatusTransition => "invalid_status_transition",
            ErrorKind::InsufficientFunds => "insufficient_funds",
            ErrorKind::InvalidTransfer => "invalid_transfer",
            ErrorKind::TransactionNotFound => "transaction_not_found",
            ErrorKind::InvalidReversal => "invalid_reversal",
            ErrorKind::DuplicateEntry => "duplicate_entry",
            ErrorKind::VersionConflict => "version_conflict",
            ErrorKind::IdempotencyKeyReused => "idempotency_key_reused",
            ErrorKind::RequestInFlight => "request_in_flight",
            ErrorKind::StorageUnavailable => "storage_unavailable",
            ErrorKind::OperationTimeout => "operation_timeout",
            ErrorKind::Io => "io",
            ErrorKind::Parse => "parse",
            ErrorKind::Config => "config",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LedgerError {
    /// Stable kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            LedgerError::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            LedgerError::ArithmeticOverflow { .. } => ErrorKind::ArithmeticOverflow,
            LedgerError::WalletNotFound { .. } => ErrorKind::WalletNotFound,
            LedgerError::DuplicateWallet { .. } => ErrorKind::DuplicateWallet,
            LedgerError::WalletInactive { .. } => ErrorKind::WalletInactive,
            LedgerError::InvalidStatusTransition { .. } => ErrorKind::InvalidStatusTransition,
            LedgerError::InsufficientFunds { .. } => ErrorKind::InsufficientFunds,
            LedgerError::InvalidTransfer { .. } => ErrorKind::InvalidTransfer,
            LedgerError::TransactionNotFound { .. } => ErrorKind::TransactionNotFound,
            LedgerError::InvalidReversal { .. } => ErrorKind::InvalidReversal,
            LedgerError::DuplicateEntry { .. } => ErrorKind::DuplicateEntry,
            LedgerError::VersionConflict { .. } => ErrorKind::VersionConflict,
            LedgerError::IdempotencyKeyReused { .. } => ErrorKind::IdempotencyKeyReused,
            LedgerError::RequestInFlight { .. } => ErrorKind::RequestInFlight,
            LedgerError::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            LedgerError::OperationTimeout { .. } => ErrorKind::OperationTimeout,
            LedgerError::FileNotFound { .. } | LedgerError::IoError { .. } => ErrorKind::Io,
            LedgerError::ParseError { .. } => ErrorKind::Parse,
            LedgerError::ConfigError { .. } => ErrorKind::Config,
        }
    }

    /// Whether the caller may retry the same request with the same
    /// idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StorageUnavailable
                | ErrorKind::OperationTimeout
                | ErrorKind::RequestInFlight
                | ErrorKind::VersionConflict
        )
    }

    /// Whether the error indicates a core bug or storage corruption
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::DuplicateEntry)
    }
}

// Conversion from io::Error to LedgerError
impl From<std::io::Error> for LedgerError {
    fn from(error: std::io::Error) -> Self {
        LedgerError::IoError {
            message: error.to_string(),
        }
    }
}

// Conversion from csv::Error to LedgerError
impl From<csv::Error> for LedgerError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<csv_async::Error> for LedgerError {
    fn from(error: csv_async::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LedgerError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(error: toml::de::Error) -> Self {
        LedgerError::ConfigError {
            message: error.to_string(),
        }
    }
}

// Helper functions for creating common errors

impl LedgerError {
    /// Create an InvalidAmount error
    pub fn invalid_amount(amount: impl fmt::Display, reason: &str) -> Self {
        LedgerError::InvalidAmount {
            amount: amount.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a CurrencyMismatch error
    pub fn currency_mismatch(expected: Currency, actual: Currency) -> Self {
        LedgerError::CurrencyMismatch { expected, actual }
    }

    /// Create an ArithmeticOverflow error
    pub fn arithmetic_overflow(operation: &str) -> Self {
        LedgerError::ArithmeticOverflow {
            operation: operation.to_string(),
        }
    }

    /// Create a WalletNotFound error
    pub fn wallet_not_found(wallet: &WalletId) -> Self {
        LedgerError::WalletNotFound {
            wallet: wallet.clone(),
        }
    }

    /// Create a WalletInactive error
    pub fn wallet_inactive(wallet: &WalletId, status: WalletStatus) -> Self {
        LedgerError::WalletInactive {
            wallet: wallet.clone(),
            status,
        }
    }

    /// Create an InsufficientFunds error
    pub fn insufficient_funds(wallet: &WalletId, available: Money, requested: Money) -> Self {
        LedgerError::InsufficientFunds {
            wallet: wallet.clone(),
            available,
            requested,
        }
    }

    /// Create an InvalidTransfer error
    pub fn invalid_transfer(reason: &str) -> Self {
        LedgerError::InvalidTransfer {
            reason: reason.to_string(),
        }
    }

    /// Create a TransactionNotFound error
    pub fn transaction_not_found(transaction: impl fmt::Display) -> Self {
        LedgerError::TransactionNotFound {
            transaction: transaction.to_string(),
        }
    }

    /// Create an InvalidReversal error
    pub fn invalid_reversal(transaction: TransactionId, reason: &str) -> Self {
        LedgerError::InvalidReversal {
            transaction,
            reason: reason.to_string(),
        }
    }

    /// Create a StorageUnavailable error
    pub fn storage_unavailable(message: impl fmt::Display) -> Self {
        LedgerError::StorageUnavailable {
            message: message.to_string(),
        }
    }

    /// Create a ParseError for an input line
    pub fn parse_error(line: u64, message: impl fmt::Display) -> Self {
        LedgerError::ParseError {
            line: Some(line),
            message: message.to_string(),
        }
    }
}
