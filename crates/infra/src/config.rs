//! Ledger configuration.
//!
//! Loaded hierarchically:
//! 1. Default values in code
//! 2. `config/stockflow.toml` (optional)
//! 3. Environment variable overrides with the `STOCKFLOW__` prefix, e.g.
//!    `STOCKFLOW__RETRY__MAX_ATTEMPTS=5` (a `.env` file is read first)

use std::time::Duration;

use config::{Environment, File};
use serde::Deserialize;

pub use config::ConfigError;
pub use stockflow_observability::LogFormat;

use crate::guard::RetryPolicy;

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Conflict retry settings for approvals and reversals.
    pub retry: RetryConfig,

    /// Document workflow rules.
    pub workflow: WorkflowConfig,

    /// Log output settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Total attempts including the first.
    pub max_attempts: u32,

    /// Base backoff between attempts, in milliseconds.
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Reject approval by the document's creator.
    pub require_distinct_approver: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub format: LogFormat,

    /// Filter used when `RUST_LOG` is unset, e.g. `info` or `stockflow_infra=debug`.
    pub level: String,
}

impl LoggingConfig {
    /// Install the process-wide subscriber in the configured format.
    pub fn init(&self) -> bool {
        stockflow_observability::init_with(self.format, &self.level)
    }
}

impl LedgerConfig {
    /// Load configuration from `.env`, `config/stockflow.toml` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::load_from("config/stockflow")
    }

    /// Load with an explicit config file base name (extension optional).
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.backoff_ms", 25)?
            .set_default("workflow.require_distinct_approver", true)?
            .set_default("logging.format", "json")?
            .set_default("logging.level", "info")?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix("STOCKFLOW")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.backoff_ms),
        )
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            workflow: WorkflowConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            require_distinct_approver: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".into(),
        }
    }
}
