//! Wallet Ledger Library
//! # Overview
//!
//! This library provides a double-entry ledger for digital wallets: every
//! balance change is an immutable, balanced set of entries, committed
//! atomically under per-wallet locks and deduplicated by idempotency key.
//! A CSV replay driver with a sync and an async strategy sits on top.
//!
//! # Architecture
//!
//! - [`types`] - Core data types (Money, Wallet, LedgerEntry, Transaction, requests)
//! - [`core`] - Business logic components:
//!   - [`core::engine`] - Operation orchestration
//!   - [`core::locks`] - Per-wallet locking in global order
//!   - [`core::idempotency`] - Retried request deduplication
//!   - [`core::memory_store`] - In-memory ledger storage
//!   - [`core::batch_processor`] - Parallel replay of independent commands
//! - [`io`] - CSV command parsing and wallet output
//! - [`strategy`] - Sync and async replay pipelines
//! - [`config`] / [`logging`] - Configuration layering and tracing setup
//! - [`cli`] - CLI arguments parsing
//!
//! # Operations
//!
//! - **Deposit**: Credit funds from an external source
//! - **Withdrawal**: Debit funds to an external destination
//! - **Transfer**: Move funds between two wallets, optionally converting currency
//! - **Payment**: A transfer between externally identified parties
//! - **Reverse**: Compensate a completed transaction with opposite entries
//!
//! # Example
//!
//! ```
//! use wallet_ledger::config::EngineConfig;
//! use wallet_ledger::types::{
//!     Currency, DepositRequest, IdempotencyKey, Money, OwnerId, WalletId,
//! };
//! use wallet_ledger::LedgerEngine;
//!
//! let engine = LedgerEngine::in_memory(EngineConfig::default());
//! let wallet = WalletId::new("w-1");
//! engine
//!     .open_wallet(wallet.clone(), OwnerId::new("alice"), Currency::USD)
//!     .unwrap();
//!
//! let amount = Money::parse("25.00", Currency::USD).unwrap();
//! engine
//!     .deposit(DepositRequest::new(wallet.clone(), amount, IdempotencyKey::new("dep-1")))
//!     .unwrap();
//!
//! assert_eq!(engine.get_wallet(&wallet).unwrap().balance, amount);
//! ```

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod strategy;
pub mod types;

pub use crate::core::{InMemoryLedgerStore, IntegrityReport, LedgerEngine};
pub use config::LedgerConfig;
pub use io::write_wallets_csv;
pub use types::{
    Currency, LedgerEntry, LedgerError, Money, OperationOutcome, OperationRequest, Transaction,
    TransactionId, Wallet, WalletId,
};
