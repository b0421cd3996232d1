//! Service configuration.
//!
//! [`NodeConfig`] is layered from its defaults, an optional TOML file and
//! `TXGUARD_*` environment variables (nested keys use `__`, e.g.
//! `TXGUARD_GUARD__ASSOCIATION_THRESHOLD=30`). The binary applies its CLI
//! flags on top.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use txguard_core::constants::{DEFAULT_ACL_RPC_PORT, DEFAULT_STORE_TIMEOUT};
use txguard_core::error::ConfigError;
use txguard_policy::GuardConfig;

/// Prefix of environment variables read by [`NodeConfig::load`].
pub const ENV_PREFIX: &str = "TXGUARD";

/// Configuration for a txguard service instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for persistent data.
    pub data_dir: PathBuf,
    /// Keep the access-control list in memory instead of RocksDB.
    pub ephemeral: bool,
    /// IP address for the JSON-RPC server to bind to.
    pub rpc_bind: String,
    /// Port for the JSON-RPC server.
    pub rpc_port: u16,
    /// Deadline for one access-control store call, in milliseconds.
    pub store_timeout_ms: u64,
    /// Log level filter string (e.g. "info", "txguard_policy=debug").
    pub log_level: String,
    /// Log output format, "text" or "json".
    pub log_format: String,
    /// Abuse policy tunables.
    pub guard: GuardConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("txguard");

        Self {
            data_dir,
            ephemeral: false,
            rpc_bind: "127.0.0.1".to_string(),
            rpc_port: DEFAULT_ACL_RPC_PORT,
            store_timeout_ms: DEFAULT_STORE_TIMEOUT.as_millis() as u64,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            guard: GuardConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Load from `file` (if given; it must exist) and the environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let cfg: Self = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ConfigError::Source(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check every setting that has a validity constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::NonPositive { field: "store_timeout_ms" });
        }
        self.guard.validate()
    }

    /// Path to the RocksDB access-control data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("acl")
    }

    /// Socket address string for the RPC server.
    pub fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_bind, self.rpc_port)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
