//! Request classification.
//!
//! Turns a transport-agnostic [`InboundRequest`] into the facts the guard
//! needs: resolved client IP, signer address (if the payload carries one),
//! request kind, device class, and for transactions the first action name.
//!
//! gRPC methods are matched on the final path segment so both
//! `/IBlockChainService/PutTransaction` and `PutTransaction` are recognized.
//! GraphQL bodies carry their argument as the first escaped-quoted segment
//! (`\"…\"`) of the query text.

use std::net::IpAddr;

use tracing::{debug, warn};

use txguard_core::address::Address;
use txguard_core::constants::{
    GRAPHQL_AGENT_QUERY, GRAPHQL_STAGE_TRANSACTION, MAX_PAYLOAD_SIZE, METHOD_ADD_CLIENT,
    METHOD_GET_NEXT_TX_NONCE, METHOD_PUT_TRANSACTION,
};
use txguard_core::error::ClassifyError;
use txguard_core::types::{DeviceClass, RequestKind, SignedTransaction};

const ESCAPED_QUOTE: &str = "\\\"";

/// A request as seen by the transport adapter.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    /// gRPC method path or HTTP route (`/graphql` for GraphQL bodies).
    pub method: String,
    /// Raw request payload.
    pub payload: Vec<u8>,
    /// Request headers; names are matched case-insensitively.
    pub headers: Vec<(String, String)>,
    /// Socket peer address, if the transport knows it.
    pub remote_ip: Option<IpAddr>,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            method: method.into(),
            payload: payload.into(),
            ..Self::default()
        }
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.remote_ip = Some(ip);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Result of classifying one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRequest {
    pub ip: Option<IpAddr>,
    pub signer: Option<Address>,
    pub kind: RequestKind,
    pub device: DeviceClass,
    /// First action of a submitted transaction; observability only.
    pub action_name: Option<String>,
}

impl ClassifiedRequest {
    /// Address whose access state decides admission.
    ///
    /// A state query carries the account being looked up, not the caller, so
    /// it has no subject.
    pub fn access_subject(&self) -> Option<Address> {
        match self.kind {
            RequestKind::StateQuery => None,
            _ => self.signer,
        }
    }
}

/// Stateless request classifier.
#[derive(Debug, Clone, Default)]
pub struct RequestClassifier {
    trust_proxy_headers: bool,
}

impl RequestClassifier {
    pub fn new(trust_proxy_headers: bool) -> Self {
        Self { trust_proxy_headers }
    }

    /// Classify `request`. Malformed payloads never fail the request: they
    /// are logged and yield no signer.
    pub fn classify(&self, request: &InboundRequest) -> ClassifiedRequest {
        let ip = self.client_ip(request);
        let device = request
            .header("user-agent")
            .map(DeviceClass::from_user_agent)
            .unwrap_or(DeviceClass::Other);
        let kind = Self::kind(request);

        let (signer, action_name) = match Self::extract(kind, &request.payload) {
            Ok(found) => found,
            Err(e) => {
                warn!(method = %request.method, %kind, error = %e,
                    "classifier: malformed payload, no signer extracted");
                (None, None)
            }
        };

        debug!(method = %request.method, %kind, ?ip, ?signer, %device, "classifier: request classified");
        ClassifiedRequest { ip, signer, kind, device, action_name }
    }

    /// Resolve the client IP.
    ///
    /// With `trust_proxy_headers`, `cf-connecting-ip` wins, then the first
    /// `x-forwarded-for` hop; unparsable header values fall back to the peer.
    pub fn client_ip(&self, request: &InboundRequest) -> Option<IpAddr> {
        if self.trust_proxy_headers {
            if let Some(ip) = request
                .header("cf-connecting-ip")
                .and_then(|v| v.trim().parse().ok())
            {
                return Some(ip);
            }
            if let Some(ip) = request
                .header("x-forwarded-for")
                .and_then(|v| v.split(',').next())
                .and_then(|v| v.trim().parse().ok())
            {
                return Some(ip);
            }
        }
        request.remote_ip
    }

    /// Determine the request kind from the method and, for GraphQL, the body.
    pub fn kind(request: &InboundRequest) -> RequestKind {
        let segment = request.method.rsplit('/').next().unwrap_or_default();
        match segment {
            METHOD_ADD_CLIENT => return RequestKind::AddClient,
            METHOD_GET_NEXT_TX_NONCE => return RequestKind::GetNextTxNonce,
            METHOD_PUT_TRANSACTION => return RequestKind::PutTransaction,
            _ => {}
        }
        // Only sniff bodies that could be GraphQL text.
        if request.payload.len() > MAX_PAYLOAD_SIZE {
            return RequestKind::Other;
        }
        match std::str::from_utf8(&request.payload) {
            Ok(body) if body.contains(GRAPHQL_STAGE_TRANSACTION) => RequestKind::StageTransaction,
            Ok(body) if body.contains(GRAPHQL_AGENT_QUERY) => RequestKind::StateQuery,
            _ => RequestKind::Other,
        }
    }

    fn extract(
        kind: RequestKind,
        payload: &[u8],
    ) -> Result<(Option<Address>, Option<String>), ClassifyError> {
        if kind == RequestKind::Other {
            return Ok((None, None));
        }
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ClassifyError::OversizedPayload {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        match kind {
            RequestKind::AddClient | RequestKind::GetNextTxNonce => {
                Ok((Some(Address::from_slice(payload)?), None))
            }
            RequestKind::PutTransaction => {
                let tx = SignedTransaction::deserialize(payload)?;
                Ok((Some(tx.signer), Some(tx.first_action_name().to_string())))
            }
            RequestKind::StageTransaction => {
                let arg = quoted_argument(payload)?;
                let bytes = hex::decode(arg.trim())
                    .map_err(|e| ClassifyError::MalformedTransaction(e.to_string()))?;
                let tx = SignedTransaction::deserialize(&bytes)?;
                Ok((Some(tx.signer), Some(tx.first_action_name().to_string())))
            }
            RequestKind::StateQuery => {
                let arg = quoted_argument(payload)?;
                Ok((Some(arg.parse::<Address>()?), None))
            }
            RequestKind::Other => Ok((None, None)),
        }
    }
}

/// The text between the first and second `\"` of a GraphQL body.
fn quoted_argument(payload: &[u8]) -> Result<&str, ClassifyError> {
    let body = std::str::from_utf8(payload)
        .map_err(|e| ClassifyError::MalformedTransaction(e.to_string()))?;
    body.split(ESCAPED_QUOTE)
        .nth(1)
        .filter(|_| body.matches(ESCAPED_QUOTE).count() >= 2)
        .ok_or(ClassifyError::MissingArgument)
}
