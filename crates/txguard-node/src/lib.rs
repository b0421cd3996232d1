//! # txguard-node — service composition, RocksDB, RPC.
//!
//! Wires the txguard components into a running service:
//! - [`storage::RocksKvStore`] — RocksDB key-value backend for the ACL
//! - [`node::Node`] — shared access-control store and request guard
//! - [`rpc`] — JSON-RPC server for administration and request inspection
//! - [`config::NodeConfig`] — service configuration

pub mod config;
pub mod node;
pub mod rpc;
pub mod storage;

pub use config::NodeConfig;
pub use node::Node;
pub use rpc::start_rpc_server;
pub use storage::RocksKvStore;
