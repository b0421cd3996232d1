//! # txguard-acl
//! Persistent allow / deny / whitelist state per address, stored as `"0"`
//! (denied) or `"1"` (whitelisted) under the address's canonical string.
//! An address with no entry is allowed.

pub mod memory;
pub mod store;

pub use memory::MemoryKvStore;
pub use store::AccessControlStore;
