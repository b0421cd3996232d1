//! Staging exclusion set.
//!
//! Holds the signers whose transactions the admission path must refuse to
//! stage. The abuse detector's decisions are applied here; the admission path
//! itself lives outside txguard and reads this set through [`StagePolicy`].

use std::net::IpAddr;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use txguard_core::address::Address;
use txguard_core::traits::StagePolicy;

use crate::detector::Decision;

/// One staging exclusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBan {
    pub banned_at: DateTime<Utc>,
    /// Source IP whose evaluation triggered the ban.
    pub ip: Option<IpAddr>,
}

/// Signers currently excluded from transaction staging.
#[derive(Debug, Default)]
pub struct StagePolicyGate {
    banned: DashMap<Address, StageBan>,
}

impl StagePolicyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude `signer` from staging. Returns `true` if it was not already
    /// excluded; banning twice keeps the original ban time. `ip` is the
    /// source that triggered the ban, if any.
    pub fn ban(&self, signer: Address, ip: Option<IpAddr>, at: DateTime<Utc>) -> bool {
        let mut inserted = false;
        self.banned.entry(signer).or_insert_with(|| {
            inserted = true;
            StageBan { banned_at: at, ip }
        });
        if inserted {
            info!(at = %at, address = %signer, ip = ?ip, event = "stage_ban", state = "banned",
                "stage_policy: signer excluded from staging");
        } else {
            debug!(address = %signer, ip = ?ip, "stage_policy: signer already excluded");
        }
        inserted
    }

    /// Readmit `signer`. Returns `true` if it was excluded. `ip` is `None`
    /// for administrative releases.
    pub fn unban(&self, signer: &Address, ip: Option<IpAddr>, at: DateTime<Utc>) -> bool {
        let removed = self.banned.remove(signer).is_some();
        if removed {
            info!(at = %at, address = %signer, ip = ?ip, event = "stage_unban", state = "admitted",
                "stage_policy: signer readmitted to staging");
        }
        removed
    }

    /// Apply a detector decision for `signer`: ban on [`Decision::Managed`],
    /// unban on [`Decision::Restored`], nothing otherwise.
    pub fn apply(&self, signer: &Address, ip: IpAddr, decision: &Decision, at: DateTime<Utc>) {
        match decision {
            Decision::Managed => {
                self.ban(*signer, Some(ip), at);
            }
            Decision::Restored => {
                self.unban(signer, Some(ip), at);
            }
            _ => {}
        }
    }

    /// When `signer` was excluded, if it is.
    pub fn banned_at(&self, signer: &Address) -> Option<DateTime<Utc>> {
        self.banned.get(signer).map(|ban| ban.banned_at)
    }

    pub fn get(&self, signer: &Address) -> Option<StageBan> {
        self.banned.get(signer).map(|ban| *ban)
    }

    /// Snapshot of all excluded signers, sorted by address.
    pub fn banned(&self) -> Vec<(Address, DateTime<Utc>)> {
        let mut all: Vec<_> = self.banned.iter().map(|r| (*r.key(), r.value().banned_at)).collect();
        all.sort_by_key(|(addr, _)| *addr);
        all
    }

    pub fn len(&self) -> usize {
        self.banned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.is_empty()
    }
}

impl StagePolicy for StagePolicyGate {
    fn is_banned(&self, signer: &Address) -> bool {
        self.banned.contains_key(signer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use txguard_core::error::GuardError;

    fn signer() -> Address {
        Address::new([0x42; 20])
    }

    const IP: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(198, 51, 100, 9));

    fn at() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(1)
    }

    #[test]
    fn ban_twice_is_idempotent() {
        let gate = StagePolicyGate::new();
        assert!(gate.ban(signer(), Some(IP), at()));
        assert!(!gate.ban(signer(), None, at() + TimeDelta::minutes(3)));
        assert_eq!(gate.len(), 1);
        assert_eq!(gate.banned_at(&signer()), Some(at()));
    }

    #[test]
    fn unban_absent_is_noop() {
        let gate = StagePolicyGate::new();
        assert!(!gate.unban(&signer(), None, at()));
        assert!(gate.is_empty());
    }

    #[test]
    fn unban_removes_exactly_once() {
        let gate = StagePolicyGate::new();
        gate.ban(signer(), Some(IP), at());
        assert!(gate.unban(&signer(), None, at()));
        assert!(!gate.unban(&signer(), None, at()));
        assert!(!gate.is_banned(&signer()));
    }

    #[test]
    fn apply_follows_decisions() {
        let gate = StagePolicyGate::new();
        gate.apply(&signer(), IP, &Decision::Tracked, at());
        assert!(!gate.is_banned(&signer()));
        gate.apply(&signer(), IP, &Decision::Managed, at());
        assert!(gate.is_banned(&signer()));
        assert_eq!(gate.get(&signer()).unwrap().ip, Some(IP));
        gate.apply(&signer(), IP, &Decision::StillManaged { remaining: TimeDelta::minutes(1) }, at());
        assert!(gate.is_banned(&signer()));
        gate.apply(&signer(), IP, &Decision::Restored, at());
        assert!(!gate.is_banned(&signer()));
    }

    #[test]
    fn check_admission_reports_ban() {
        let gate = StagePolicyGate::new();
        assert!(gate.check_admission(&signer()).is_ok());
        gate.ban(signer(), Some(IP), at());
        assert_eq!(gate.check_admission(&signer()), Err(GuardError::StagingBanned(signer())));
    }

    #[test]
    fn banned_snapshot_is_sorted() {
        let gate = StagePolicyGate::new();
        let low = Address::new([0x01; 20]);
        gate.ban(signer(), Some(IP), at());
        gate.ban(low, None, at());
        let list: Vec<Address> = gate.banned().into_iter().map(|(a, _)| a).collect();
        assert_eq!(list, vec![low, signer()]);
    }

    #[test]
    fn repeat_ban_keeps_first_source() {
        let gate = StagePolicyGate::new();
        gate.ban(signer(), Some(IP), at());
        gate.ban(signer(), None, at() + TimeDelta::minutes(1));
        assert_eq!(gate.get(&signer()), Some(StageBan { banned_at: at(), ip: Some(IP) }));
    }
}
