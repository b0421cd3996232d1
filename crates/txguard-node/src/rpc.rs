//! JSON-RPC server for txguard.
//!
//! Uses jsonrpsee 0.24 to expose two groups of methods:
//! - access-control administration (`denyaccess`, `allowaccess`,
//!   `denywhitelist`, `allowwhitelist`, `listblockedaddresses`,
//!   `getaccessstate`); store failures and timeouts are returned as errors;
//! - request guarding (`inspectrequest`, `reportviolation`, `listipbans`,
//!   `unbanip`, `getagentstatus`, `releaseagent`, `getguardinfo`).

use std::net::IpAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonrpsee::core::async_trait;
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use txguard_core::address::Address;
use txguard_core::clock::Clock;
use txguard_core::error::{StoreError, TxGuardError};
use txguard_core::types::{AccessState, DeviceClass, RequestKind};
use txguard_policy::clients::DeviceCounts;
use txguard_policy::{AgentState, InboundRequest, IpBanRecord, RejectReason, RuleViolation, Verdict};

use crate::node::Node;

/// Malformed parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// The access-control store failed.
pub const STORE_ERROR: i32 = -32001;
/// The access-control store did not answer in time.
pub const STORE_TIMEOUT: i32 = -32002;

/// A request submitted for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectRequestJson {
    /// gRPC method path or HTTP route.
    pub method: String,
    /// Hex-encoded raw payload.
    #[serde(default)]
    pub payload: String,
    /// Request headers as name/value pairs.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    /// Socket peer address.
    #[serde(default)]
    pub remote_ip: Option<IpAddr>,
}

/// The guard's decision on an inspected request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictJson {
    /// `true` if the request may proceed.
    pub proceed: bool,
    /// Rejection reason, `"ip_banned"` or `"access_denied"`.
    pub reason: Option<String>,
    pub ip: Option<IpAddr>,
    pub signer: Option<Address>,
    pub kind: Option<RequestKind>,
    pub device: Option<DeviceClass>,
    pub action: Option<String>,
}

/// Sybil-tracking status of one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatusJson {
    pub address: Address,
    /// Tracking record; `None` means clean.
    pub record: Option<AgentState>,
    pub staging_banned: bool,
    pub banned_at: Option<DateTime<Utc>>,
    /// Source IP of the submission that triggered the staging ban.
    #[serde(default)]
    pub banned_from: Option<IpAddr>,
}

/// Aggregate guard state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardInfoJson {
    pub tracked_ips: usize,
    pub tracked_agents: usize,
    pub managed_agents: usize,
    pub staging_banned: usize,
    pub ip_banned: usize,
    pub clients: usize,
    pub devices: DeviceCounts,
}

/// Parse an address parameter.
pub fn parse_address(s: &str) -> Result<Address, ErrorObjectOwned> {
    s.parse::<Address>()
        .map_err(|e| rpc_error(INVALID_PARAMS, &format!("invalid address: {e}")))
}

/// Create a JSON-RPC error.
fn rpc_error(code: i32, msg: &str) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, msg.to_string(), None::<()>)
}

fn store_error(e: StoreError) -> ErrorObjectOwned {
    let code = match e {
        StoreError::Timeout(_) => STORE_TIMEOUT,
        _ => STORE_ERROR,
    };
    rpc_error(code, &e.to_string())
}

impl From<Verdict> for VerdictJson {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Proceed(c) => Self {
                proceed: true,
                reason: None,
                ip: c.ip,
                signer: c.signer,
                kind: Some(c.kind),
                device: Some(c.device),
                action: c.action_name,
            },
            Verdict::Reject(reason) => {
                let (name, ip, signer) = match reason {
                    RejectReason::IpBanned(ip) => ("ip_banned", Some(ip), None),
                    RejectReason::AccessDenied(a) => ("access_denied", None, Some(a)),
                };
                Self {
                    proceed: false,
                    reason: Some(name.to_string()),
                    ip,
                    signer,
                    kind: None,
                    device: None,
                    action: None,
                }
            }
        }
    }
}

/// The txguard JSON-RPC interface.
#[rpc(server)]
pub trait TxGuardRpc {
    /// Marks an address as denied.
    #[method(name = "denyaccess")]
    async fn deny_access(&self, address: String) -> Result<(), ErrorObjectOwned>;

    /// Clears a denial. Returns `true` if the address was denied.
    #[method(name = "allowaccess")]
    async fn allow_access(&self, address: String) -> Result<bool, ErrorObjectOwned>;

    /// Clears a whitelist entry. Returns `true` if the address was whitelisted.
    #[method(name = "denywhitelist")]
    async fn deny_whitelist(&self, address: String) -> Result<bool, ErrorObjectOwned>;

    /// Whitelists an address, overwriting a denial.
    #[method(name = "allowwhitelist")]
    async fn allow_whitelist(&self, address: String) -> Result<(), ErrorObjectOwned>;

    /// Returns a page of addresses with an access-control entry.
    #[method(name = "listblockedaddresses")]
    async fn list_blocked_addresses(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Address>, ErrorObjectOwned>;

    /// Returns the access state of an address.
    #[method(name = "getaccessstate")]
    async fn get_access_state(&self, address: String) -> Result<AccessState, ErrorObjectOwned>;

    /// Runs a request through the guard pipeline.
    #[method(name = "inspectrequest")]
    async fn inspect_request(
        &self,
        request: InspectRequestJson,
    ) -> Result<VerdictJson, ErrorObjectOwned>;

    /// Reports a rate-limit violation. Returns `true` if the IP was banned.
    #[method(name = "reportviolation")]
    async fn report_violation(&self, violation: RuleViolation) -> Result<bool, ErrorObjectOwned>;

    /// Lists banned IPs.
    #[method(name = "listipbans")]
    async fn list_ip_bans(&self) -> Result<Vec<IpBanRecord>, ErrorObjectOwned>;

    /// Lifts an IP ban. Returns `true` if the IP was banned.
    #[method(name = "unbanip")]
    async fn unban_ip(&self, ip: IpAddr) -> Result<bool, ErrorObjectOwned>;

    /// Returns the sybil-tracking status of an address.
    #[method(name = "getagentstatus")]
    async fn get_agent_status(&self, address: String) -> Result<AgentStatusJson, ErrorObjectOwned>;

    /// Returns an address to clean and lifts its staging ban.
    #[method(name = "releaseagent")]
    async fn release_agent(&self, address: String) -> Result<bool, ErrorObjectOwned>;

    /// Returns aggregate guard state.
    #[method(name = "getguardinfo")]
    async fn get_guard_info(&self) -> Result<GuardInfoJson, ErrorObjectOwned>;
}

/// Implementation of the txguard JSON-RPC server.
pub struct RpcServerImpl {
    node: Arc<Node>,
}

impl RpcServerImpl {
    /// Create a new RPC server implementation wrapping the given node.
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }
}

#[async_trait]
impl TxGuardRpcServer for RpcServerImpl {
    async fn deny_access(&self, address: String) -> Result<(), ErrorObjectOwned> {
        let address = parse_address(&address)?;
        self.node
            .run_store(move |acl| acl.deny(&address))
            .await
            .map_err(store_error)
    }

    async fn allow_access(&self, address: String) -> Result<bool, ErrorObjectOwned> {
        let address = parse_address(&address)?;
        self.node
            .run_store(move |acl| acl.allow(&address))
            .await
            .map_err(store_error)
    }

    async fn deny_whitelist(&self, address: String) -> Result<bool, ErrorObjectOwned> {
        let address = parse_address(&address)?;
        self.node
            .run_store(move |acl| acl.deny_whitelist(&address))
            .await
            .map_err(store_error)
    }

    async fn allow_whitelist(&self, address: String) -> Result<(), ErrorObjectOwned> {
        let address = parse_address(&address)?;
        self.node
            .run_store(move |acl| acl.allow_whitelist(&address))
            .await
            .map_err(store_error)
    }

    async fn list_blocked_addresses(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Address>, ErrorObjectOwned> {
        self.node
            .run_store(move |acl| acl.list_denied(offset, limit))
            .await
            .map_err(store_error)
    }

    async fn get_access_state(&self, address: String) -> Result<AccessState, ErrorObjectOwned> {
        let address = parse_address(&address)?;
        self.node
            .run_store(move |acl| acl.access_state(&address))
            .await
            .map_err(store_error)
    }

    async fn inspect_request(
        &self,
        request: InspectRequestJson,
    ) -> Result<VerdictJson, ErrorObjectOwned> {
        let payload = hex::decode(request.payload.trim())
            .map_err(|_| rpc_error(INVALID_PARAMS, "invalid hex in payload"))?;
        let inbound = InboundRequest {
            method: request.method,
            payload,
            headers: request.headers,
            remote_ip: request.remote_ip,
        };
        let guard = self.node.guard();
        let classified = match guard.screen(&inbound) {
            Ok(classified) => classified,
            Err(reason) => return Ok(Verdict::Reject(reason).into()),
        };
        // Bounded by the store timeout; a slow store admits the request.
        let access = match classified.access_subject() {
            Some(subject) => Some(
                self.node
                    .run_store(move |acl| acl.access_state(&subject))
                    .await,
            ),
            None => None,
        };
        Ok(guard.admit(classified, access).into())
    }

    async fn report_violation(&self, violation: RuleViolation) -> Result<bool, ErrorObjectOwned> {
        Ok(self.node.guard().on_rule_violation(&violation))
    }

    async fn list_ip_bans(&self) -> Result<Vec<IpBanRecord>, ErrorObjectOwned> {
        Ok(self.node.guard().ip_bans().list())
    }

    async fn unban_ip(&self, ip: IpAddr) -> Result<bool, ErrorObjectOwned> {
        let guard = self.node.guard();
        Ok(guard.ip_bans().unban(&ip, guard.clock().now()))
    }

    async fn get_agent_status(&self, address: String) -> Result<AgentStatusJson, ErrorObjectOwned> {
        let address = parse_address(&address)?;
        let guard = self.node.guard();
        let ban = guard.stage_gate().get(&address);
        Ok(AgentStatusJson {
            address,
            record: guard.detector().status(&address),
            staging_banned: ban.is_some(),
            banned_at: ban.map(|b| b.banned_at),
            banned_from: ban.and_then(|b| b.ip),
        })
    }

    async fn release_agent(&self, address: String) -> Result<bool, ErrorObjectOwned> {
        let address = parse_address(&address)?;
        Ok(self.node.guard().release_agent(&address))
    }

    async fn get_guard_info(&self) -> Result<GuardInfoJson, ErrorObjectOwned> {
        let guard = self.node.guard();
        Ok(GuardInfoJson {
            tracked_ips: guard.registry().tracked_ips(),
            tracked_agents: guard.detector().len(),
            managed_agents: guard.detector().managed_agents().len(),
            staging_banned: guard.stage_gate().len(),
            ip_banned: guard.ip_bans().len(),
            clients: guard.clients().len(),
            devices: guard.clients().device_counts(),
        })
    }
}

/// Start the JSON-RPC server on the given address.
///
/// Returns a [`ServerHandle`] that can be used to stop the server.
pub async fn start_rpc_server(addr: &str, node: Arc<Node>) -> Result<ServerHandle, TxGuardError> {
    let server = Server::builder()
        .build(addr)
        .await
        .map_err(|e| TxGuardError::Rpc(format!("RPC server error: {e}")))?;

    let rpc_impl = RpcServerImpl::new(node);
    let handle = server.start(rpc_impl.into_rpc());

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};
    use txguard_core::clock::SystemClock;
    use txguard_core::traits::KeyValueStore;
    use txguard_policy::ClassifiedRequest;

    use crate::config::NodeConfig;

    /// A store whose reads hang well past any sane timeout.
    struct SlowStore;

    impl KeyValueStore for SlowStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            std::thread::sleep(Duration::from_secs(1));
            Ok(None)
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Ok(())
        }

        fn delete(&self, _key: &str) -> Result<bool, StoreError> {
            Ok(false)
        }

        fn keys(&self) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn parse_address_valid() {
        let hex_str = format!("0x{}", "ab".repeat(20));
        assert_eq!(parse_address(&hex_str).unwrap(), Address::new([0xAB; 20]));
    }

    #[test]
    fn parse_address_invalid() {
        let err = parse_address("0x1234").unwrap_err();
        assert_eq!(err.code(), INVALID_PARAMS);
    }

    #[test]
    fn timeout_maps_to_its_own_code() {
        assert_eq!(store_error(StoreError::Timeout(5)).code(), STORE_TIMEOUT);
        assert_eq!(store_error(StoreError::Unavailable("x".into())).code(), STORE_ERROR);
    }

    #[test]
    fn verdict_json_from_reject() {
        let ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
        let json = VerdictJson::from(Verdict::Reject(RejectReason::IpBanned(ip)));
        assert!(!json.proceed);
        assert_eq!(json.reason.as_deref(), Some("ip_banned"));
        assert_eq!(json.ip, Some(ip));
    }

    #[test]
    fn verdict_json_from_proceed() {
        let json = VerdictJson::from(Verdict::Proceed(ClassifiedRequest {
            ip: None,
            signer: Some(Address::new([1; 20])),
            kind: RequestKind::AddClient,
            device: DeviceClass::Pc,
            action_name: None,
        }));
        assert!(json.proceed);
        assert_eq!(json.kind, Some(RequestKind::AddClient));
        assert!(json.reason.is_none());
    }

    #[tokio::test]
    async fn slow_store_does_not_stall_inspection() {
        let config = NodeConfig { store_timeout_ms: 50, ..NodeConfig::default() };
        let node = Node::with_store(config, Box::new(SlowStore), Arc::new(SystemClock)).unwrap();
        let rpc = RpcServerImpl::new(node.clone());
        let signer = Address::new([7; 20]);
        let request = InspectRequestJson {
            method: "/IBlockChainService/AddClient".into(),
            payload: hex::encode(signer.as_bytes()),
            headers: Vec::new(),
            remote_ip: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
        };

        let started = Instant::now();
        let verdict = rpc.inspect_request(request).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(verdict.proceed);
        assert_eq!(verdict.signer, Some(signer));
        assert!(node.guard().clients().contains(&signer));
    }

    #[test]
    fn inspect_request_optional_fields_default() {
        let req: InspectRequestJson =
            serde_json::from_str(r#"{"method":"/IBlockChainService/AddClient"}"#).unwrap();
        assert!(req.payload.is_empty());
        assert!(req.headers.is_empty());
        assert_eq!(req.remote_ip, None);
    }
}
