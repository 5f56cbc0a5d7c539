//! Node configuration.
//!
//! [`NodeConfig::load`] layers, lowest priority first: built-in defaults,
//! an optional `strata.toml` in the data directory, then `STRATA__*`
//! environment variables (e.g. `STRATA__RPC_PORT=9000`). The binary applies
//! command-line flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use strata_core::constants::{DEFAULT_RPC_PORT, DEFAULT_WAIT_MINCONF, WAIT_POLL_INTERVAL_MS};

/// Name of the optional config file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "strata.toml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "STRATA";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a node instance.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    pub rpc_port: u16,
    /// Log level filter string (e.g. "info", "strata_node_lib=debug").
    pub log_level: String,
    /// Maintain the contract log index.
    pub log_events: bool,
    /// Upper bound on how long a log waiter sleeps between checks.
    pub wait_poll_interval_ms: u64,
    /// Confirmations `waitforlogs` requires when the caller gives none.
    pub default_wait_minconf: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata");

        Self {
            data_dir,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_RPC_PORT,
            log_level: "info".to_string(),
            log_events: true,
            wait_poll_interval_ms: WAIT_POLL_INTERVAL_MS,
            default_wait_minconf: DEFAULT_WAIT_MINCONF,
        }
    }
}

impl NodeConfig {
    /// Load configuration for `data_dir` (or the default data directory).
    ///
    /// The data directory itself is never taken from the file it locates.
    pub fn load(data_dir: Option<&Path>) -> Result<Self, ConfigError> {
        let data_dir = data_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| Self::default().data_dir);
        let file = data_dir.join(CONFIG_FILE_NAME);

        let mut cfg: Self = config::Config::builder()
            .add_source(config::File::from(file.as_path()).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        cfg.data_dir = data_dir;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wait_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "wait_poll_interval_ms must be positive".into(),
            ));
        }
        if self.rpc_bind.is_empty() {
            return Err(ConfigError::Invalid("rpc_bind must not be empty".into()));
        }
        Ok(())
    }

    /// Path to the RocksDB chain data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }
}
