//! Rate-limit escalation into IP bans.
//!
//! Quota counting belongs to the external rate limiter. When it blocks a
//! request it reports a [`RuleViolation`]; the escalator compares the overage
//! (observed count minus rule limit) with `ip_ban_threshold_count` and bans
//! the source IP once the overage reaches it. Bans last for the process
//! lifetime unless lifted through [`IpBanList::unban`].

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use txguard_core::error::GuardError;

/// A blocked request as reported by the external rate limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleViolation {
    /// Client IP the limiter resolved.
    pub ip: IpAddr,
    /// Endpoint pattern of the rule that blocked the request.
    pub rule: String,
    /// Rule quota per period.
    pub limit: u64,
    /// Rule period, as configured (e.g. `"1m"`).
    pub period: String,
    /// Requests counted in the current window.
    pub count: u64,
    /// Whether the rule only monitors instead of blocking.
    #[serde(default)]
    pub monitor_mode: bool,
}

impl RuleViolation {
    /// How far the observed count exceeds the limit (zero if it does not).
    pub fn overage(&self) -> u64 {
        self.count.saturating_sub(self.limit)
    }
}

/// A banned IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpBanRecord {
    pub ip: IpAddr,
    pub banned_at: DateTime<Utc>,
    /// Rule whose violation caused the ban, if any.
    pub rule: Option<String>,
}

/// Process-wide list of banned IPs, consulted before any request logic.
#[derive(Debug, Default)]
pub struct IpBanList {
    bans: DashMap<IpAddr, IpBanRecord>,
}

impl IpBanList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban `ip`. Returns `true` if it was not already banned; an existing ban
    /// keeps its original record.
    pub fn ban(&self, ip: IpAddr, at: DateTime<Utc>, rule: Option<String>) -> bool {
        let mut inserted = false;
        self.bans.entry(ip).or_insert_with(|| {
            inserted = true;
            IpBanRecord { ip, banned_at: at, rule }
        });
        if inserted {
            warn!(at = %at, %ip, event = "ip_ban", state = "banned", "ip_ban: ip banned");
        }
        inserted
    }

    /// Lift the ban on `ip`. Returns `true` if it was banned.
    pub fn unban(&self, ip: &IpAddr, at: DateTime<Utc>) -> bool {
        let removed = self.bans.remove(ip).is_some();
        if removed {
            info!(at = %at, %ip, event = "ip_unban", state = "admitted", "ip_ban: ban lifted");
        }
        removed
    }

    pub fn is_banned(&self, ip: &IpAddr) -> bool {
        self.bans.contains_key(ip)
    }

    /// `Ok(())` unless `ip` is banned.
    pub fn check(&self, ip: &IpAddr) -> Result<(), GuardError> {
        if self.is_banned(ip) {
            Err(GuardError::IpBanned(*ip))
        } else {
            Ok(())
        }
    }

    pub fn get(&self, ip: &IpAddr) -> Option<IpBanRecord> {
        self.bans.get(ip).map(|r| r.clone())
    }

    /// Snapshot of all bans, oldest first.
    pub fn list(&self) -> Vec<IpBanRecord> {
        let mut all: Vec<_> = self.bans.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.banned_at.cmp(&b.banned_at).then(a.ip.cmp(&b.ip)));
        all
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

/// Promotes repeat rate-limit offenders to the IP ban list.
#[derive(Debug)]
pub struct IpBanEscalator {
    threshold: u64,
    bans: Arc<IpBanList>,
}

impl IpBanEscalator {
    pub fn new(threshold: u64, bans: Arc<IpBanList>) -> Self {
        Self { threshold, bans }
    }

    /// Handle a blocked request. Returns `true` if this call banned the IP.
    pub fn on_rule_violation(&self, violation: &RuleViolation, at: DateTime<Utc>) -> bool {
        let overage = violation.overage();
        info!(
            ip = %violation.ip,
            rule = %violation.rule,
            limit = violation.limit,
            period = %violation.period,
            count = violation.count,
            overage,
            monitor_mode = violation.monitor_mode,
            "ip_ban: rate limit quota exceeded"
        );
        if overage >= self.threshold {
            self.bans.ban(violation.ip, at, Some(violation.rule.clone()))
        } else {
            false
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn ban_list(&self) -> &Arc<IpBanList> {
        &self.bans
    }
}
