//! Error types for txguard.
use std::net::IpAddr;

use thiserror::Error;

use crate::address::Address;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length: {0} bytes")] InvalidLength(usize),
    #[error("invalid hex: {0}")] InvalidHex(String),
    #[error("empty address")] Empty,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("timed out after {0} ms")] Timeout(u64),
    #[error("corrupt value {value:?} stored under {key}")] Corrupt { key: String, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("malformed address payload: {0}")] MalformedAddress(#[from] AddressError),
    #[error("malformed transaction: {0}")] MalformedTransaction(String),
    #[error("payload too large: {size} > {max}")] OversizedPayload { size: usize, max: usize },
    #[error("missing quoted argument in query body")] MissingArgument,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be positive")] NonPositive { field: &'static str },
    #[error("{field} is out of range")] OutOfRange { field: &'static str },
    #[error("config source: {0}")] Source(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("ip {0} is banned")] IpBanned(IpAddr),
    #[error("address {0} is excluded from staging")] StagingBanned(Address),
    #[error("address {0} is denied")] AccessDenied(Address),
}

#[derive(Error, Debug)]
pub enum TxGuardError {
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Store(#[from] StoreError),
    #[error(transparent)] Classify(#[from] ClassifyError),
    #[error(transparent)] Config(#[from] ConfigError),
    #[error(transparent)] Guard(#[from] GuardError),
    #[error("rpc: {0}")] Rpc(String),
}
