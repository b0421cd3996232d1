//! Per-client telemetry: registered clients, their device class and IPs, and
//! how often each signer submits transactions or queries state.

use std::collections::BTreeSet;
use std::net::IpAddr;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use txguard_core::address::Address;
use txguard_core::types::DeviceClass;

/// What is known about one registered client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub device: Option<DeviceClass>,
    pub ips: BTreeSet<IpAddr>,
}

/// Registered clients per device class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCounts {
    pub pc: usize,
    pub mobile: usize,
    pub other: usize,
    pub unknown: usize,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<Address, ClientInfo>,
    tx_submissions: DashMap<Address, u64>,
    state_queries: DashMap<Address, u64>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `address`. Returns `true` if it was not yet known.
    pub fn add_client(&self, address: Address) -> bool {
        let mut inserted = false;
        self.clients.entry(address).or_insert_with(|| {
            inserted = true;
            ClientInfo::default()
        });
        if inserted {
            info!(%address, "clients: client registered");
        }
        inserted
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.clients.contains_key(address)
    }

    /// Record the device class of a registered client. Unknown clients are
    /// ignored and `false` is returned.
    pub fn set_device(&self, address: &Address, device: DeviceClass) -> bool {
        match self.clients.get_mut(address) {
            Some(mut client) => {
                client.device = Some(device);
                true
            }
            None => false,
        }
    }

    /// Record an IP a registered client connected from. Returns `true` if the
    /// IP is new for that client.
    pub fn add_client_ip(&self, address: &Address, ip: IpAddr) -> bool {
        let added = self
            .clients
            .get_mut(address)
            .is_some_and(|mut client| client.ips.insert(ip));
        if added {
            debug!(%address, %ip, "clients: new client ip");
        }
        added
    }

    /// Count a transaction submission by `signer`; returns the new total.
    pub fn record_tx_submission(&self, signer: &Address) -> u64 {
        let mut count = self.tx_submissions.entry(*signer).or_insert(0);
        *count += 1;
        *count
    }

    /// Count a state query for `agent`; returns the new total.
    pub fn record_state_query(&self, agent: &Address) -> u64 {
        let mut count = self.state_queries.entry(*agent).or_insert(0);
        *count += 1;
        *count
    }

    pub fn tx_submissions(&self, signer: &Address) -> u64 {
        self.tx_submissions.get(signer).map(|c| *c).unwrap_or(0)
    }

    pub fn state_queries(&self, agent: &Address) -> u64 {
        self.state_queries.get(agent).map(|c| *c).unwrap_or(0)
    }

    pub fn info(&self, address: &Address) -> Option<ClientInfo> {
        self.clients.get(address).map(|c| c.clone())
    }

    /// Registered clients grouped by device class.
    pub fn device_counts(&self) -> DeviceCounts {
        let mut counts = DeviceCounts::default();
        for client in self.clients.iter() {
            match client.device {
                Some(DeviceClass::Pc) => counts.pc += 1,
                Some(DeviceClass::Mobile) => counts.mobile += 1,
                Some(DeviceClass::Other) => counts.other += 1,
                None => counts.unknown += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
