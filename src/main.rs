//! Wallet Ledger CLI
//!
//! Replays ledger commands from a CSV file and prints the resulting wallets.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- commands.csv > wallets.csv
//! cargo run -- --strategy sync commands.csv > wallets.csv
//! cargo run -- --strategy async --batch-size 2000 --max-concurrent 8 commands.csv > wallets.csv
//! cargo run -- --config ledger.toml --verify --log-format json commands.csv > wallets.csv
//! ```
//!
//! Logs go to stderr, filtered by `RUST_LOG` (default `info`).
//!
//! # Exit Codes
//!
//! - 0: Success
//! - 1: Error (bad configuration, file not found, unreadable input, or a
//!   wallet failing `--verify`)

use std::process;

use tracing::error;
use wallet_ledger::{cli, logging, strategy};

fn main() {
    let args = cli::parse_args();
    logging::init(args.log_format);

    let config = match args.to_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    let strategy = strategy::create_strategy(args.strategy, config);

    // Output goes to stdout
    let mut output = std::io::stdout();
    match strategy.process(args.input(), &mut output) {
        Ok(report) if report.is_consistent() => {}
        Ok(report) => {
            error!(
                wallets = report.integrity_failures,
                "Ledger verification failed"
            );
            process::exit(1);
        }
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    }
}
