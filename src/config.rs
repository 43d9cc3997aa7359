//! Configuration for the ledger engine and the replay driver
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `LEDGER_*` environment variables, then command-line flags (applied by
//! [`crate::cli::CliArgs::to_config`]).
//!
//! ```toml
//! verify = true
//!
//! [engine]
//! lock_timeout_ms = 5000
//! reservation_ttl_ms = 30000
//! default_page_size = 100
//!
//! [batch]
//! batch_size = 1000
//! max_concurrent_batches = 8
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::LedgerError;

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub engine: EngineConfig,

    pub batch: BatchConfig,

    /// Run integrity verification over every wallet after a replay
    pub verify: bool,
}

/// Engine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an operation waits for wallet locks when the caller gives no
    /// timeout
    pub lock_timeout_ms: u64,

    /// Age after which an idempotency reservation counts as abandoned
    pub reservation_ttl_ms: u64,

    /// Page size of entry listings that do not set a limit
    pub default_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: 5_000,
            reservation_ttl_ms: 30_000,
            default_page_size: 100,
        }
    }
}

impl EngineConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn reservation_ttl(&self) -> Duration {
        Duration::from_millis(self.reservation_ttl_ms)
    }
}

/// Configuration for batch processing
///
/// Controls how replay rows are batched and the number of worker threads
/// for parallel processing within each batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Number of rows per batch
    pub batch_size: usize,
    /// Maximum number of row groups processing concurrently
    pub max_concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            max_concurrent_batches: num_cpus::get(),
        }
    }
}

impl BatchConfig {
    /// Create a new BatchConfig with custom values
    ///
    /// Zero values fall back to the defaults with a warning.
    pub fn new(batch_size: usize, max_concurrent_batches: usize) -> Self {
        let default = Self::default();

        let batch_size = if batch_size == 0 {
            warn!(
                "Invalid batch_size ({}), using default ({})",
                batch_size, default.batch_size
            );
            default.batch_size
        } else {
            batch_size
        };

        let max_concurrent_batches = if max_concurrent_batches == 0 {
            warn!(
                "Invalid max_concurrent_batches ({}), using default ({})",
                max_concurrent_batches, default.max_concurrent_batches
            );
            default.max_concurrent_batches
        } else {
            max_concurrent_batches
        };

        Self {
            batch_size,
            max_concurrent_batches,
        }
    }
}

impl LedgerConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LedgerError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => e.into(),
        })?;
        let config: LedgerConfig = toml::from_str(&content)?;
        Ok(config.normalized())
    }

    /// Defaults or the given file, with environment overrides applied
    pub fn load(path: Option<&Path>) -> Result<Self, LedgerError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.with_env_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `LEDGER_*` overrides read through `lookup`
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Result<Self, LedgerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = env_number(&lookup, "LEDGER_LOCK_TIMEOUT_MS")? {
            self.engine.lock_timeout_ms = value;
        }
        if let Some(value) = env_number(&lookup, "LEDGER_RESERVATION_TTL_MS")? {
            self.engine.reservation_ttl_ms = value;
        }
        if let Some(value) = env_number(&lookup, "LEDGER_BATCH_SIZE")? {
            self.batch.batch_size = value;
        }
        if let Some(value) = env_number(&lookup, "LEDGER_MAX_CONCURRENT")? {
            self.batch.max_concurrent_batches = value;
        }
        Ok(self.normalized())
    }

    fn normalized(mut self) -> Self {
        self.batch = BatchConfig::new(self.batch.batch_size, self.batch.max_concurrent_batches);
        if self.engine.default_page_size == 0 {
            warn!(
                "Invalid default_page_size (0), using default ({})",
                EngineConfig::default().default_page_size
            );
            self.engine.default_page_size = EngineConfig::default().default_page_size;
        }
        self
    }
}

fn env_number<F, T>(lookup: &F, name: &str) -> Result<Option<T>, LedgerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LedgerError::ConfigError {
                message: format!("{} must be a non-negative integer, got '{}'", name, raw),
            }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.engine.lock_timeout_ms, 5000);
        assert_eq!(config.engine.reservation_ttl_ms, 30000);
        assert_eq!(config.engine.default_page_size, 100);
        assert_eq!(config.batch.batch_size, 1000);
        assert_eq!(config.batch.max_concurrent_batches, num_cpus::get());
        assert!(!config.verify);
    }

    #[test]
    fn test_from_file_with_partial_sections() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "verify = true\n\n[engine]\nlock_timeout_ms = 250\n\n[batch]\nbatch_size = 10").unwrap();

        let config = LedgerConfig::from_file(file.path()).unwrap();

        assert!(config.verify);
        assert_eq!(config.engine.lock_timeout_ms, 250);
        assert_eq!(config.engine.reservation_ttl_ms, 30000);
        assert_eq!(config.batch.batch_size, 10);
        assert_eq!(config.batch.max_concurrent_batches, num_cpus::get());
    }

    #[test]
    fn test_from_file_missing() {
        let error = LedgerConfig::from_file("does/not/exist.toml").unwrap_err();
        assert!(matches!(error, LedgerError::FileNotFound { .. }));
    }

    #[test]
    fn test_from_file_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine\nlock_timeout_ms = ").unwrap();

        let error = LedgerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(error, LedgerError::ConfigError { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let config = LedgerConfig::default()
            .with_env_overrides(env(&[
                ("LEDGER_LOCK_TIMEOUT_MS", "100"),
                ("LEDGER_RESERVATION_TTL_MS", "200"),
                ("LEDGER_BATCH_SIZE", "50"),
                ("LEDGER_MAX_CONCURRENT", "3"),
            ]))
            .unwrap();

        assert_eq!(config.engine.lock_timeout_ms, 100);
        assert_eq!(config.engine.reservation_ttl_ms, 200);
        assert_eq!(config.batch.batch_size, 50);
        assert_eq!(config.batch.max_concurrent_batches, 3);
    }

    #[rstest]
    #[case::negative("LEDGER_LOCK_TIMEOUT_MS", "-1")]
    #[case::text("LEDGER_BATCH_SIZE", "lots")]
    fn test_env_override_rejects_garbage(#[case] name: &str, #[case] value: &str) {
        let error = LedgerConfig::default()
            .with_env_overrides(env(&[(name, value)]))
            .unwrap_err();
        assert!(error.to_string().contains(name));
    }

    #[rstest]
    #[case::zero_batch_size(0, 4, 1000, 4)]
    #[case::zero_max_concurrent(10, 0, 10, num_cpus::get())]
    #[case::both_valid(10, 4, 10, 4)]
    fn test_batch_config_zero_values_fallback(
        #[case] batch_size: usize,
        #[case] max_concurrent: usize,
        #[case] expected_batch_size: usize,
        #[case] expected_max_concurrent: usize,
    ) {
        let config = BatchConfig::new(batch_size, max_concurrent);
        assert_eq!(config.batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent_batches, expected_max_concurrent);
    }
}
