//! Indexer configuration.
//!
//! Loaded from environment variables by [`IndexerConfig::from_env`]; every
//! variable is optional and falls back to the [`Default`] value.

use std::collections::HashSet;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::events::ContractId;
use crate::retry::RetryPolicy;

/// Postgres connection string. Without it the indexer runs on the in-memory store.
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
/// Comma-separated contract addresses.
pub const ENV_CONTRACTS: &str = "INDEXER_CONTRACTS";
/// Events fetched per batch.
pub const ENV_BATCH_SIZE: &str = "INDEXER_BATCH_SIZE";
/// Idle poll interval in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "INDEXER_POLL_INTERVAL_MS";
/// Retries for transient storage errors.
pub const ENV_MAX_RETRIES: &str = "INDEXER_MAX_RETRIES";
/// First retry delay in milliseconds.
pub const ENV_INITIAL_BACKOFF_MS: &str = "INDEXER_INITIAL_BACKOFF_MS";
/// Retry delay cap in milliseconds.
pub const ENV_MAX_BACKOFF_MS: &str = "INDEXER_MAX_BACKOFF_MS";
/// Database pool size.
pub const ENV_MAX_CONNECTIONS: &str = "INDEXER_MAX_CONNECTIONS";
/// JSON-lines file of raw events to ingest.
pub const ENV_EVENTS_FILE: &str = "INDEXER_EVENTS_FILE";
/// Exit once every source is drained (`true`/`false`).
pub const ENV_STOP_WHEN_CAUGHT_UP: &str = "INDEXER_STOP_WHEN_CAUGHT_UP";

/// Configuration for the indexer service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Postgres connection string.
    pub database_url: Option<String>,

    /// Contracts to index.
    pub contracts: Vec<String>,

    /// Maximum events per batch.
    pub batch_size: usize,

    /// Poll interval in milliseconds when the source has nothing new.
    pub poll_interval_ms: u64,

    /// Maximum retries for transient storage errors.
    pub max_retries: u32,

    /// Initial backoff in milliseconds.
    pub initial_backoff_ms: u64,

    /// Backoff multiplier for retries.
    pub backoff_multiplier: f64,

    /// Maximum backoff in milliseconds.
    pub max_backoff_ms: u64,

    /// Database pool size.
    pub max_connections: u32,

    /// Whether workers exit once their source is drained.
    pub stop_when_caught_up: bool,

    /// JSON-lines file of raw events.
    pub events_file: Option<PathBuf>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            contracts: Vec::new(),
            batch_size: 100,
            poll_interval_ms: 1_000,
            max_retries: 5,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            max_connections: 10,
            stop_when_caught_up: false,
            events_file: None,
        }
    }
}

impl IndexerConfig {
    /// Creates a new configuration with the given contracts.
    #[must_use]
    pub fn with_contracts(contracts: Vec<String>) -> Self {
        Self {
            contracts,
            ..Default::default()
        }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads the configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparsable value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let contracts = var(ENV_CONTRACTS)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            database_url: var(ENV_DATABASE_URL),
            contracts,
            batch_size: parse(&var, ENV_BATCH_SIZE)?.unwrap_or(defaults.batch_size),
            poll_interval_ms: parse(&var, ENV_POLL_INTERVAL_MS)?
                .unwrap_or(defaults.poll_interval_ms),
            max_retries: parse(&var, ENV_MAX_RETRIES)?.unwrap_or(defaults.max_retries),
            initial_backoff_ms: parse(&var, ENV_INITIAL_BACKOFF_MS)?
                .unwrap_or(defaults.initial_backoff_ms),
            backoff_multiplier: defaults.backoff_multiplier,
            max_backoff_ms: parse(&var, ENV_MAX_BACKOFF_MS)?.unwrap_or(defaults.max_backoff_ms),
            max_connections: parse(&var, ENV_MAX_CONNECTIONS)?
                .unwrap_or(defaults.max_connections),
            stop_when_caught_up: parse(&var, ENV_STOP_WHEN_CAUGHT_UP)?
                .unwrap_or(defaults.stop_when_caught_up),
            events_file: var(ENV_EVENTS_FILE).map(PathBuf::from),
        })
    }

    /// Sets the database URL.
    #[must_use]
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Sets the maximum retries.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the backoff range.
    #[must_use]
    pub fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Makes workers exit once their source is drained.
    #[must_use]
    pub fn with_stop_when_caught_up(mut self, stop: bool) -> Self {
        self.stop_when_caught_up = stop;
        self
    }

    /// Sets the events file.
    #[must_use]
    pub fn with_events_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.events_file = Some(path.into());
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.contracts.is_empty() && self.events_file.is_none() {
            return Err(ConfigError::NoContracts);
        }

        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.as_str()) {
                return Err(ConfigError::DuplicateContract(contract.clone()));
            }
        }

        if self.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPollInterval);
        }

        if self.backoff_multiplier < 1.0 {
            return Err(ConfigError::InvalidBackoffMultiplier);
        }

        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(ConfigError::InvalidBackoffRange);
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections);
        }

        Ok(())
    }

    /// Returns the configured contracts.
    #[must_use]
    pub fn contract_ids(&self) -> Vec<ContractId> {
        self.contracts.iter().map(ContractId::new).collect()
    }

    /// Returns the poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Returns the retry policy for transient storage errors.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff_ms: self.initial_backoff_ms,
            backoff_multiplier: self.backoff_multiplier,
            max_backoff_ms: self.max_backoff_ms,
        }
    }
}

fn parse<T, V>(var: &V, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    V: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidVar { key, value })
        })
        .transpose()
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Nothing to index.
    #[error("no contracts configured and no events file given")]
    NoContracts,

    /// A contract is listed twice.
    #[error("contract listed twice: {0}")]
    DuplicateContract(String),

    /// Invalid batch size.
    #[error("batch_size must be > 0")]
    InvalidBatchSize,

    /// Invalid poll interval.
    #[error("poll_interval_ms must be > 0")]
    InvalidPollInterval,

    /// Invalid backoff multiplier.
    #[error("backoff_multiplier must be >= 1.0")]
    InvalidBackoffMultiplier,

    /// Invalid backoff range.
    #[error("initial_backoff_ms must be <= max_backoff_ms")]
    InvalidBackoffRange,

    /// Invalid pool size.
    #[error("max_connections must be > 0")]
    InvalidMaxConnections,

    /// An environment variable could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidVar {
        /// Variable name.
        key: &'static str,
        /// Offending value.
        value: String,
    },
}
