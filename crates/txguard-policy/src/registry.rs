//! Source IP → signer correlation.
//!
//! Records every distinct signer address observed from each source IP. The
//! number of distinct signers behind one IP is the association count the
//! abuse detector keys off.
//!
//! # Growth
//!
//! Sets are created lazily on the first sighting of an IP and never shrink on
//! their own; there is no eviction. Memory therefore grows with the number of
//! (ip, signer) pairs seen over the process lifetime. [`IpSignerRegistry::reset`]
//! and [`IpSignerRegistry::clear`] are the only ways entries go away.

use std::collections::HashSet;
use std::net::IpAddr;

use dashmap::DashMap;
use tracing::{debug, info};

use txguard_core::address::Address;

/// Concurrency-safe map of source IP to the signers seen from it.
#[derive(Debug, Default)]
pub struct IpSignerRegistry {
    signers: DashMap<IpAddr, HashSet<Address>>,
}

impl IpSignerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `signer` was seen from `ip`.
    ///
    /// Returns the number of distinct signers now associated with `ip`.
    pub fn record(&self, ip: IpAddr, signer: Address) -> usize {
        let mut entry = self.signers.entry(ip).or_insert_with(|| {
            info!(%ip, "ip_signers: creating a new signer set");
            HashSet::new()
        });
        if entry.insert(signer) {
            debug!(%ip, %signer, count = entry.len(), "ip_signers: new signer associated");
        }
        entry.len()
    }

    /// Number of distinct signers seen from `ip`.
    pub fn count(&self, ip: &IpAddr) -> usize {
        self.signers.get(ip).map(|set| set.len()).unwrap_or(0)
    }

    /// Snapshot of the signers seen from `ip`.
    pub fn members(&self, ip: &IpAddr) -> HashSet<Address> {
        self.signers
            .get(ip)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Whether `signer` has been seen from `ip`.
    pub fn contains(&self, ip: &IpAddr, signer: &Address) -> bool {
        self.signers
            .get(ip)
            .is_some_and(|set| set.contains(signer))
    }

    /// Forget everything recorded for `ip`. Returns the signers removed.
    pub fn reset(&self, ip: &IpAddr) -> usize {
        match self.signers.remove(ip) {
            Some((_, set)) => {
                info!(%ip, removed = set.len(), "ip_signers: signer set reset");
                set.len()
            }
            None => 0,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.signers.clear();
    }

    /// Number of IPs with at least one recorded signer.
    pub fn tracked_ips(&self) -> usize {
        self.signers.len()
    }
}
