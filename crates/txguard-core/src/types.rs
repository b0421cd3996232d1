//! Shared domain types: access states, request kinds, device classes, and the
//! signed transaction envelope submitted through the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::address::Address;
use crate::constants::{DENIED_VALUE, NO_ACTION, WHITELISTED_VALUE};
use crate::error::ClassifyError;

/// Access-control state of an address.
///
/// Absence of a stored entry means [`AccessState::Allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessState {
    #[default]
    Allowed,
    Denied,
    Whitelisted,
}

impl AccessState {
    /// Interpret a stored value. `None` (no entry) is `Allowed`; unknown
    /// values yield `None` so the caller can report corruption.
    pub fn from_stored(value: Option<&str>) -> Option<Self> {
        match value {
            None => Some(Self::Allowed),
            Some(DENIED_VALUE) => Some(Self::Denied),
            Some(WHITELISTED_VALUE) => Some(Self::Whitelisted),
            Some(_) => None,
        }
    }

    /// The value this state is stored as, or `None` for the implicit default.
    pub fn stored_value(&self) -> Option<&'static str> {
        match self {
            Self::Allowed => None,
            Self::Denied => Some(DENIED_VALUE),
            Self::Whitelisted => Some(WHITELISTED_VALUE),
        }
    }
}

impl fmt::Display for AccessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Denied => write!(f, "denied"),
            Self::Whitelisted => write!(f, "whitelisted"),
        }
    }
}

/// The kind of inbound request, as far as abuse policy is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    /// Client registration for evaluation pushes (payload: raw address).
    AddClient,
    /// Nonce lookup (payload: raw address).
    GetNextTxNonce,
    /// Signed transaction submission over gRPC.
    PutTransaction,
    /// Signed transaction submission through a GraphQL mutation.
    StageTransaction,
    /// State query keyed by an agent address.
    StateQuery,
    /// Anything else; passes through untouched.
    Other,
}

impl RequestKind {
    /// Whether the request submits a transaction for staging.
    pub fn is_submission(&self) -> bool {
        matches!(self, Self::PutTransaction | Self::StageTransaction)
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AddClient => "AddClient",
            Self::GetNextTxNonce => "GetNextTxNonce",
            Self::PutTransaction => "PutTransaction",
            Self::StageTransaction => "StageTransaction",
            Self::StateQuery => "StateQuery",
            Self::Other => "Other",
        };
        f.write_str(name)
    }
}

/// Coarse device class derived from a User-Agent header. Telemetry only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Pc,
    Mobile,
    Other,
}

impl DeviceClass {
    /// Classify a User-Agent string with case-insensitive substring checks.
    pub fn from_user_agent(user_agent: &str) -> Self {
        let ua = user_agent.to_ascii_lowercase();
        if ["windows", "macintosh", "linux"].iter().any(|k| ua.contains(k)) {
            Self::Pc
        } else if ["android", "iphone", "ipad"].iter().any(|k| ua.contains(k)) {
            Self::Mobile
        } else {
            Self::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pc => "pc",
            Self::Mobile => "mobile",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single action carried by a transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Action {
    /// Action type identifier, e.g. `"transfer_asset"`.
    pub type_id: String,
    /// Opaque action arguments.
    pub values: Vec<u8>,
}

/// A signed transaction as submitted to the gateway.
///
/// Signature verification belongs to the chain; txguard only reads the
/// signer and the first action name.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct SignedTransaction {
    /// Per-signer sequence number.
    pub nonce: u64,
    /// Address that authorized the transaction.
    pub signer: Address,
    /// Signer's public key.
    pub public_key: Vec<u8>,
    /// Creation time, Unix seconds.
    pub timestamp: i64,
    /// Actions in execution order.
    pub actions: Vec<Action>,
    /// Signature over the unsigned fields.
    pub signature: Vec<u8>,
}

impl SignedTransaction {
    /// Canonical binary encoding.
    pub fn serialize(&self) -> Result<Vec<u8>, ClassifyError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ClassifyError::MalformedTransaction(e.to_string()))
    }

    /// Decode a transaction from its canonical binary encoding.
    ///
    /// Trailing bytes are rejected.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, ClassifyError> {
        let (tx, read): (Self, usize) =
            bincode::decode_from_slice(bytes, bincode::config::standard())
                .map_err(|e| ClassifyError::MalformedTransaction(e.to_string()))?;
        if read != bytes.len() {
            return Err(ClassifyError::MalformedTransaction(format!(
                "{} trailing bytes",
                bytes.len() - read
            )));
        }
        Ok(tx)
    }

    /// Name of the first action, or `"NoAction"`.
    pub fn first_action_name(&self) -> &str {
        self.actions
            .first()
            .map(|a| a.type_id.as_str())
            .unwrap_or(NO_ACTION)
    }
}
