use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::config::{BatchConfig, LedgerConfig};
use crate::logging::LogFormat;
use crate::types::LedgerError;

/// Replay wallet ledger commands and print the resulting wallets
#[derive(Parser, Debug)]
#[command(name = "wallet-ledger")]
#[command(about = "Replay wallet ledger commands and print the resulting wallets", long_about = None)]
pub struct CliArgs {
    /// Input CSV file path containing ledger commands
    #[arg(value_name = "INPUT", help = "Path to the input CSV file")]
    pub input_file: PathBuf,

    /// Processing strategy to use for replaying commands
    #[arg(
        long = "strategy",
        value_name = "STRATEGY",
        default_value = "async",
        help = "Processing strategy: 'sync' for sequential or 'async' for parallel batches"
    )]
    pub strategy: StrategyType,

    /// Number of commands per batch (async mode only)
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        help = "Number of commands per batch (default: 1000)"
    )]
    pub batch_size: Option<usize>,

    /// Maximum number of concurrent groups (async mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        help = "Maximum number of command groups processing concurrently (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// TOML configuration file
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Lock wait before an operation times out
    #[arg(long = "lock-timeout-ms", value_name = "MILLIS")]
    pub lock_timeout_ms: Option<u64>,

    /// Log line format on stderr
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Check every wallet balance against its entries after the replay
    #[arg(long = "verify")]
    pub verify: bool,
}

/// Available processing strategies
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyType {
    Sync,
    Async,
}

impl CliArgs {
    /// Build the effective configuration
    ///
    /// Loads the `--config` file (or defaults) with environment overrides,
    /// then applies the command-line flags on top.
    pub fn to_config(&self) -> Result<LedgerConfig, LedgerError> {
        let config = LedgerConfig::load(self.config.as_deref())?;
        Ok(self.apply_overrides(config))
    }

    /// Apply command-line flags to `config`
    pub fn apply_overrides(&self, mut config: LedgerConfig) -> LedgerConfig {
        if self.batch_size.is_some() || self.max_concurrent_batches.is_some() {
            config.batch = BatchConfig::new(
                self.batch_size.unwrap_or(config.batch.batch_size),
                self.max_concurrent_batches
                    .unwrap_or(config.batch.max_concurrent_batches),
            );
        }
        if let Some(lock_timeout_ms) = self.lock_timeout_ms {
            config.engine.lock_timeout_ms = lock_timeout_ms;
        }
        config.verify |= self.verify;
        config
    }

    pub fn input(&self) -> &Path {
        &self.input_file
    }
}
