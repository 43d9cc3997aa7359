//! Synchronous processing strategy
//!
//! Single-threaded replay: rows are streamed through `SyncReader` and applied
//! to the engine one at a time, in file order.
//!
//! # Design
//!
//! The SyncProcessingStrategy only orchestrates, delegating:
//! - CSV parsing to `SyncReader` (iterator interface)
//! - Command processing to `LedgerEngine`
//! - CSV output to `csv_format::write_wallets_csv`

use std::io::Write;
use std::path::Path;

use tracing::warn;

use crate::config::LedgerConfig;
use crate::core::LedgerEngine;
use crate::io::sync_reader::SyncReader;
use crate::strategy::{finish_replay, ProcessingStrategy, ReplayReport};
use crate::types::LedgerError;

/// Synchronous processing strategy
///
/// # Examples
///
/// ```no_run
/// use wallet_ledger::config::LedgerConfig;
/// use wallet_ledger::strategy::{ProcessingStrategy, SyncProcessingStrategy};
/// use std::path::Path;
///
/// let strategy = SyncProcessingStrategy::new(LedgerConfig::default());
/// let mut output = std::io::stdout();
///
/// let report = strategy.process(Path::new("commands.csv"), &mut output).unwrap();
/// println!("{} commands applied", report.applied);
/// ```
#[derive(Debug, Clone)]
pub struct SyncProcessingStrategy {
    config: LedgerConfig,
}

impl SyncProcessingStrategy {
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for SyncProcessingStrategy {
    /// Replay the file row by row
    ///
    /// Fatal errors (file not found, I/O errors) are returned immediately.
    /// Rejected commands and malformed rows are logged and processing
    /// continues.
    fn process(
        &self,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ReplayReport, LedgerError> {
        let engine = LedgerEngine::in_memory(self.config.engine.clone());
        let reader = SyncReader::open(input_path)?;
        let mut report = ReplayReport::default();

        for result in reader {
            match result {
                Ok(record) => {
                    let outcome = engine.process(record.command);
                    report.record(record.line, &outcome);
                }
                Err(e) => {
                    report.skipped += 1;
                    warn!("Skipping row: {}", e);
                }
            }
        }

        finish_replay(&engine, self.config.verify, report, output)
    }
}
