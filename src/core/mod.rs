//! Core business logic module
//!
//! This module contains the ledger processing components:
//! - `traits` - Storage abstractions and the commit observer hook
//! - `memory_store` - In-memory `LedgerStore`
//! - `clock` - Time source used for timestamps and reservation expiry
//! - `locks` - Per-wallet latches acquired in global order
//! - `idempotency` - Deduplication of retried requests
//! - `integrity` - Balance verification against the entry log
//! - `engine` - Operation orchestration
//! - `batch_processor` - Parallel replay of independent commands

pub mod batch_processor;
pub mod clock;
pub mod engine;
pub mod idempotency;
pub mod integrity;
pub mod locks;
pub mod memory_store;
pub mod traits;

pub use batch_processor::{BatchProcessor, ProcessingResult};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::LedgerEngine;
pub use idempotency::{IdempotencyGuard, Reservation, ReservationToken};
pub use integrity::IntegrityReport;
pub use locks::{LockManager, WalletLocks};
pub use memory_store::InMemoryLedgerStore;
pub use traits::{CommitObserver, EntryStore, LedgerStore, UnitOfWork, WalletWrite};
