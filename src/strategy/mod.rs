//! Processing strategy module for command replay
//!
//! This module defines the Strategy pattern for complete replay pipelines,
//! encompassing both CSV parsing and ledger processing. This allows different
//! processing implementations (synchronous, asynchronous batch) to be selected
//! at runtime. Both produce the same wallet output for the same input.

use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::cli::StrategyType;
use crate::config::LedgerConfig;
use crate::core::LedgerEngine;
use crate::io::csv_format::write_wallets_csv;
use crate::types::{CommandOutcome, LedgerError};

pub mod r#async;
pub mod sync;

pub use self::r#async::AsyncProcessingStrategy;
pub use sync::SyncProcessingStrategy;

/// Counters describing one replay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Commands that changed ledger state
    pub applied: usize,
    /// Operations whose idempotency key had already completed
    pub replayed: usize,
    /// Commands the ledger refused
    pub rejected: usize,
    /// Rows that could not be parsed
    pub skipped: usize,
    /// Wallets whose balance disagrees with their entries (with `verify`)
    pub integrity_failures: usize,
}

impl ReplayReport {
    /// Count the outcome of the command read at `line`
    pub fn record(&mut self, line: u64, result: &Result<CommandOutcome, LedgerError>) {
        match result {
            Ok(CommandOutcome::Operation(outcome)) if outcome.is_replay() => self.replayed += 1,
            Ok(_) => self.applied += 1,
            Err(e) => {
                self.rejected += 1;
                warn!(line, kind = %e.kind(), "Rejected command: {}", e);
            }
        }
    }

    /// Whether every wallet passed verification
    pub fn is_consistent(&self) -> bool {
        self.integrity_failures == 0
    }
}

/// Processing strategy trait for complete replay pipelines
///
/// Each strategy reads commands from a CSV file, applies them to a fresh
/// ledger and writes the final wallet states to output.
pub trait ProcessingStrategy: Send + Sync {
    /// Replay commands from input file and write wallets to output
    ///
    /// # Arguments
    ///
    /// * `input_path` - Path to the input CSV file
    /// * `output` - Mutable reference to a writer for the wallet CSV
    ///
    /// # Returns
    ///
    /// * `Ok(ReplayReport)` once every row was handled; rejected commands and
    ///   unparseable rows are logged and counted, not fatal
    /// * `Err(LedgerError)` if the input cannot be opened or the output
    ///   cannot be written
    fn process(&self, input_path: &Path, output: &mut dyn Write)
        -> Result<ReplayReport, LedgerError>;
}

/// Create a processing strategy based on the specified strategy type
///
/// # Arguments
///
/// * `strategy_type` - The type of processing strategy to create (Sync or Async)
/// * `config` - Engine settings for both strategies, batch settings for async
///
/// # Returns
///
/// A boxed trait object implementing the ProcessingStrategy trait
pub fn create_strategy(
    strategy_type: StrategyType,
    config: LedgerConfig,
) -> Box<dyn ProcessingStrategy> {
    match strategy_type {
        StrategyType::Sync => Box::new(SyncProcessingStrategy::new(config)),
        StrategyType::Async => Box::new(AsyncProcessingStrategy::new(config)),
    }
}

/// Verify if asked, write the wallet CSV and log the summary
pub(crate) fn finish_replay(
    engine: &LedgerEngine,
    verify: bool,
    mut report: ReplayReport,
    output: &mut dyn Write,
) -> Result<ReplayReport, LedgerError> {
    if verify {
        report.integrity_failures = engine
            .verify_all()?
            .iter()
            .filter(|r| !r.is_consistent())
            .count();
    }

    write_wallets_csv(&engine.list_wallets()?, output)?;

    info!(
        applied = report.applied,
        replayed = report.replayed,
        rejected = report.rejected,
        skipped = report.skipped,
        integrity_failures = report.integrity_failures,
        "Replay finished"
    );
    Ok(report)
}
