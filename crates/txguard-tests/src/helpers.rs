//! Shared test helpers for integration tests.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use txguard_core::address::Address;
use txguard_core::clock::ManualClock;
use txguard_core::types::{Action, SignedTransaction};
use txguard_policy::{GuardConfig, InboundRequest, RequestGuard};

/// Deterministic address from an index.
pub fn addr(n: u32) -> Address {
    let mut bytes = [0u8; 20];
    bytes[16..].copy_from_slice(&n.to_be_bytes());
    Address::new(bytes)
}

/// IPv4 address in the 203.0.113.0/24 documentation range.
pub fn ip(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(203, 0, 113, last))
}

/// A fixed start instant for scenario clocks.
pub fn t0() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(19_700)
}

pub fn minutes(m: i64) -> TimeDelta {
    TimeDelta::minutes(m)
}

/// A guard with default policy on a manual clock frozen at [`t0`].
pub fn manual_guard() -> (RequestGuard, Arc<ManualClock>) {
    manual_guard_with(&GuardConfig::default())
}

pub fn manual_guard_with(config: &GuardConfig) -> (RequestGuard, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(t0()));
    let guard = RequestGuard::new(config, clock.clone()).expect("valid guard config");
    (guard, clock)
}

/// An unsigned transaction envelope from `signer` with one action.
pub fn transaction(signer: Address, action: &str) -> SignedTransaction {
    SignedTransaction {
        nonce: 0,
        signer,
        public_key: vec![0x02; 33],
        timestamp: 1_700_000_000,
        actions: vec![Action { type_id: action.to_string(), values: vec![] }],
        signature: vec![0; 64],
    }
}

/// `GetNextTxNonce` from `signer` at `from`.
pub fn nonce_request(signer: Address, from: IpAddr) -> InboundRequest {
    InboundRequest::new("/IBlockChainService/GetNextTxNonce", signer.as_bytes().to_vec())
        .with_ip(from)
        .with_header("User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64)")
}

/// `AddClient` from `signer` at `from`.
pub fn add_client_request(signer: Address, from: IpAddr) -> InboundRequest {
    InboundRequest::new("/IBlockChainService/AddClient", signer.as_bytes().to_vec())
        .with_ip(from)
        .with_header("User-Agent", "Dalvik/2.1.0 (Linux; U; Android 13)")
}

/// `PutTransaction` from `signer` at `from`.
pub fn put_request(signer: Address, from: IpAddr) -> InboundRequest {
    let payload = transaction(signer, "hack_and_slash")
        .serialize()
        .expect("encodable transaction");
    InboundRequest::new("/IBlockChainService/PutTransaction", payload).with_ip(from)
}

/// GraphQL `stageTransaction` body from `signer` at `from`.
pub fn stage_request(signer: Address, from: IpAddr) -> InboundRequest {
    let hex_tx = graphql_payload(signer);
    let body = format!(r#"{{"query":"mutation {{ stageTransaction(payload: \"{hex_tx}\") }}"}}"#);
    InboundRequest::new("/graphql", body.into_bytes()).with_ip(from)
}

/// Hex transaction payload as carried in a GraphQL mutation.
pub fn graphql_payload(signer: Address) -> String {
    let bytes = transaction(signer, "daily_reward")
        .serialize()
        .expect("encodable transaction");
    hex::encode(bytes)
}

/// GraphQL state query for `agent` at `from`.
pub fn agent_query(agent: Address, from: IpAddr) -> InboundRequest {
    let body = format!(r#"{{"query":"{{ agent(address: \"{agent}\") {{ gold }} }}"}}"#);
    InboundRequest::new("/graphql", body.into_bytes()).with_ip(from)
}

/// Associate signers `0..n` with `from` via nonce lookups.
pub fn associate(guard: &RequestGuard, from: IpAddr, n: u32) {
    for i in 0..n {
        guard.inspect(&nonce_request(addr(i), from));
    }
}
