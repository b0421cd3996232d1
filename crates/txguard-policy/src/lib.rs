//! # txguard-policy — request-path abuse policy.
//!
//! Correlates source IPs with the signers seen from them, runs the per-signer
//! sybil state machine, keeps the set of signers excluded from staging, and
//! escalates rate-limit overages into IP bans.
//!
//! The main entry point is [`RequestGuard::inspect`], which a transport
//! adapter calls once per inbound request.

pub mod classifier;
pub mod clients;
pub mod config;
pub mod detector;
pub mod escalator;
pub mod guard;
pub mod registry;
pub mod stage;

pub use classifier::{ClassifiedRequest, InboundRequest, RequestClassifier};
pub use clients::ClientRegistry;
pub use config::GuardConfig;
pub use detector::{AbuseDetector, AgentState, Decision};
pub use escalator::{IpBanEscalator, IpBanList, IpBanRecord, RuleViolation};
pub use guard::{RejectReason, RequestGuard, Verdict};
pub use registry::IpSignerRegistry;
pub use stage::{StageBan, StagePolicyGate};
