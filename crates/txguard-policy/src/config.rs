//! Policy configuration for the request guard.

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use txguard_core::constants::{
    DEFAULT_ASSOCIATION_THRESHOLD, DEFAULT_IP_BAN_THRESHOLD_COUNT, DEFAULT_MANAGE_DURATION,
    DEFAULT_TX_INTERVAL,
};
use txguard_core::error::ConfigError;

/// Tunables for sybil detection and IP ban escalation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Distinct signers per IP above which submissions are evaluated.
    pub association_threshold: usize,
    /// Re-trigger window, in seconds.
    pub tx_interval_secs: u64,
    /// Staging ban length, in seconds.
    pub manage_duration_secs: u64,
    /// Rate-limit overage at or above which an IP is banned.
    pub ip_ban_threshold_count: u64,
    /// Resolve the client IP from `cf-connecting-ip` / `x-forwarded-for`.
    ///
    /// Only enable behind a proxy that overwrites these headers.
    pub trust_proxy_headers: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            association_threshold: DEFAULT_ASSOCIATION_THRESHOLD,
            tx_interval_secs: DEFAULT_TX_INTERVAL.as_secs(),
            manage_duration_secs: DEFAULT_MANAGE_DURATION.as_secs(),
            ip_ban_threshold_count: DEFAULT_IP_BAN_THRESHOLD_COUNT,
            trust_proxy_headers: false,
        }
    }
}

impl GuardConfig {
    /// Check that the windows are positive and representable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tx_interval()?;
        self.manage_duration()?;
        Ok(())
    }

    /// The re-trigger window.
    pub fn tx_interval(&self) -> Result<TimeDelta, ConfigError> {
        window(self.tx_interval_secs, "tx_interval_secs")
    }

    /// The staging ban length.
    pub fn manage_duration(&self) -> Result<TimeDelta, ConfigError> {
        window(self.manage_duration_secs, "manage_duration_secs")
    }
}

fn window(secs: u64, field: &'static str) -> Result<TimeDelta, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::NonPositive { field });
    }
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or(ConfigError::OutOfRange { field })
}
