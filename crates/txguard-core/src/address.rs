//! Account addresses.
//!
//! An [`Address`] is a 20-byte account identifier. Its canonical string form
//! is `0x` followed by 40 lowercase hex characters; that string is also the
//! key used by the access-control store.
//!
//! Parsing accepts the `0x` prefix optionally and either letter case, so
//! addresses copied from checksummed wallets still resolve to the same key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::AddressError;

/// Length of an address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// A 20-byte account address.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    /// The all-zero address.
    pub const ZERO: Self = Self([0u8; ADDRESS_LEN]);

    /// Create an address from its raw bytes.
    pub const fn new(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Create an address from a byte slice of exactly [`ADDRESS_LEN`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, AddressError> {
        let arr: [u8; ADDRESS_LEN] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Canonical string form: `0x` + lowercase hex.
    pub fn encode(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parse an address string, with or without the `0x` prefix.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength(digits.len() / 2));
        }
        let bytes = hex::decode(digits).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        Self::from_slice(&bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl From<[u8; ADDRESS_LEN]> for Address {
    fn from(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Address {
        Address::new([0xAB; ADDRESS_LEN])
    }

    #[test]
    fn encode_is_prefixed_lowercase_hex() {
        let s = sample().encode();
        assert!(s.starts_with("0x"));
        assert_eq!(s.len(), 2 + ADDRESS_LEN * 2);
        assert_eq!(s, format!("0x{}", "ab".repeat(ADDRESS_LEN)));
    }

    #[test]
    fn decode_accepts_missing_prefix() {
        let s = "ab".repeat(ADDRESS_LEN);
        assert_eq!(Address::decode(&s).unwrap(), sample());
    }

    #[test]
    fn decode_is_case_insensitive() {
        let s = format!("0x{}", "AB".repeat(ADDRESS_LEN));
        assert_eq!(Address::decode(&s).unwrap(), sample());
    }

    #[test]
    fn decode_rejects_wrong_length() {
        assert_eq!(Address::decode("0xabcd"), Err(AddressError::InvalidLength(2)));
    }

    #[test]
    fn decode_rejects_bad_hex() {
        let s = format!("0x{}", "zz".repeat(ADDRESS_LEN));
        assert!(matches!(Address::decode(&s), Err(AddressError::InvalidHex(_))));
    }

    #[test]
    fn decode_rejects_empty() {
        assert_eq!(Address::decode("   "), Err(AddressError::Empty));
    }

    #[test]
    fn from_slice_checks_length() {
        assert_eq!(Address::from_slice(&[1, 2, 3]), Err(AddressError::InvalidLength(3)));
        assert_eq!(Address::from_slice(&[0xAB; ADDRESS_LEN]).unwrap(), sample());
    }

    #[test]
    fn display_matches_encode() {
        assert_eq!(sample().to_string(), sample().encode());
    }

    #[test]
    fn serde_json_uses_string_form() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert_eq!(json, format!("\"{}\"", sample().encode()));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn error_display() {
        let err = AddressError::InvalidLength(3);
        assert_eq!(err.to_string(), "invalid length: 3 bytes");
    }
}
