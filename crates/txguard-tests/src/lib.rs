//! Integration test suite for txguard.
//!
//! Exercises the guard pipeline end to end: sybil scenarios on a manual
//! clock, access-control properties over both backends, IP ban escalation,
//! and the JSON-RPC surface of a running node.

pub mod helpers;
