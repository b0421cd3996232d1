//! Protocol constants and policy defaults.

use std::time::Duration;

/// Distinct signers seen from one IP above which sybil evaluation starts.
///
/// With the default of 49, the 50th distinct signer on an IP triggers it.
pub const DEFAULT_ASSOCIATION_THRESHOLD: usize = 49;

/// Window within which a re-triggering signer is moved to managed status.
pub const DEFAULT_TX_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// How long a managed signer stays excluded from staging.
pub const DEFAULT_MANAGE_DURATION: Duration = Duration::from_secs(10 * 60);

/// Rate-limit overage at or above which the offending IP is banned.
pub const DEFAULT_IP_BAN_THRESHOLD_COUNT: u64 = 10;

/// Largest request payload the classifier will attempt to decode.
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Stored value marking an address as denied.
pub const DENIED_VALUE: &str = "0";

/// Stored value marking an address as whitelisted.
pub const WHITELISTED_VALUE: &str = "1";

/// gRPC method that registers a client for action evaluation pushes.
pub const METHOD_ADD_CLIENT: &str = "AddClient";

/// gRPC method returning the next transaction nonce for an address.
pub const METHOD_GET_NEXT_TX_NONCE: &str = "GetNextTxNonce";

/// gRPC method submitting a signed transaction.
pub const METHOD_PUT_TRANSACTION: &str = "PutTransaction";

/// Marker of a GraphQL transaction-staging mutation.
pub const GRAPHQL_STAGE_TRANSACTION: &str = "stageTransaction";

/// Marker of a GraphQL state query keyed by agent address.
pub const GRAPHQL_AGENT_QUERY: &str = "agent(address:";

/// Action name reported for transactions that carry no actions.
pub const NO_ACTION: &str = "NoAction";

/// Default port for the access-control admin RPC.
pub const DEFAULT_ACL_RPC_PORT: u16 = 31_280;

/// Default deadline for a single access-control store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
