//! Asynchronous batch processing strategy
//!
//! Multi-threaded replay: rows are read in batches with `csv-async`, and each
//! batch is split into independent groups that run in parallel.
//!
//! # Architecture
//!
//! ```text
//! AsyncProcessingStrategy
//!     ├── LedgerConfig (engine settings, batch_size, max_concurrent_batches)
//!     ├── AsyncReader (batch CSV reading)
//!     ├── BatchProcessor (resource partitioning + blocking pool)
//!     └── LedgerEngine (shared, thread-safe)
//! ```
//!
//! # Ordering
//!
//! - Batches are processed one after another
//! - Within a batch, rows sharing a wallet or reference stay in file order
//! - Rows with nothing in common may run concurrently, which cannot change
//!   their outcome, so the output matches the sync strategy

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tokio_util::compat::TokioAsyncReadCompatExt;

use crate::config::LedgerConfig;
use crate::core::{BatchProcessor, LedgerEngine};
use crate::io::async_reader::AsyncReader;
use crate::strategy::{finish_replay, ProcessingStrategy, ReplayReport};
use crate::types::LedgerError;

/// Asynchronous batch processing strategy
///
/// # Configuration
///
/// - `batch.batch_size`: Number of commands per batch (default: 1000)
/// - `batch.max_concurrent_batches`: Number of groups running at once
///   (default: CPU cores)
#[derive(Debug, Clone)]
pub struct AsyncProcessingStrategy {
    config: LedgerConfig,
}

impl AsyncProcessingStrategy {
    /// Create a new AsyncProcessingStrategy with the specified configuration
    pub fn new(config: LedgerConfig) -> Self {
        Self { config }
    }
}

impl ProcessingStrategy for AsyncProcessingStrategy {
    /// Replay the file in parallel batches
    ///
    /// This method:
    /// 1. Builds a tokio multi-threaded runtime sized from the batch config
    /// 2. Reads commands in batches using AsyncReader
    /// 3. Processes each batch and waits for it before reading the next
    /// 4. Writes the wallets using the csv_format module
    ///
    /// Fatal errors (file not found, I/O errors, runtime errors) are returned
    /// immediately. Rejected commands are logged and processing continues.
    fn process(
        &self,
        input_path: &Path,
        output: &mut dyn Write,
    ) -> Result<ReplayReport, LedgerError> {
        let workers = self.config.batch.max_concurrent_batches;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .max_blocking_threads(workers)
            .build()
            .map_err(|e| LedgerError::IoError {
                message: format!("Failed to create tokio runtime: {}", e),
            })?;

        let engine = Arc::new(LedgerEngine::in_memory(self.config.engine.clone()));
        let processor = BatchProcessor::new(Arc::clone(&engine));

        let report = runtime.block_on(async {
            let file = tokio::fs::File::open(input_path)
                .await
                .map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                        path: input_path.display().to_string(),
                    },
                    _ => LedgerError::from(e),
                })?;

            // Wrap tokio file in a compatibility layer for csv-async
            let mut reader = AsyncReader::new(file.compat());
            let mut report = ReplayReport::default();

            loop {
                let batch = reader.read_batch(self.config.batch.batch_size).await;
                if batch.is_empty() {
                    break;
                }

                for result in processor.process_batch(batch).await {
                    report.record(result.line, &result.result);
                }
            }

            report.skipped = reader.skipped();
            Ok::<_, LedgerError>(report)
        })?;

        finish_replay(&engine, self.config.verify, report, output)
    }
}
