//! Identifiers and address helpers shared across the dispatch node

use ethereum_types::{Address, U256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::{DispatchError, Result};

/// Escrow job identifier.
///
/// The contract assigns ids as `uint256` indices, but clients may send them
/// either as JSON strings or integers, so the id is kept opaque and only
/// converted when a contract call needs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        let id: String = id.into();
        JobId(id.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Accepts a non-empty JSON string or a non-negative JSON integer.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.trim().is_empty() => Some(JobId::new(s.as_str())),
            Value::Number(n) if n.is_u64() => Some(JobId::new(n.to_string())),
            _ => None,
        }
    }

    /// Interprets the id as the contract's `uint256` job index (decimal or 0x-hex).
    pub fn to_u256(&self) -> Option<U256> {
        let raw = self.0.as_str();
        if let Some(digits) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            if digits.is_empty() || digits.len() > 64 {
                return None;
            }
            let padded = format!("{:0>64}", digits);
            let bytes = hex::decode(padded).ok()?;
            return Some(U256::from_big_endian(&bytes));
        }
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        U256::from_dec_str(raw).ok()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        JobId::new(id)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        JobId::new(id)
    }
}

impl From<u64> for JobId {
    fn from(id: u64) -> Self {
        JobId(id.to_string())
    }
}

impl<'de> Deserialize<'de> for JobId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JobId::from_json(&value).ok_or_else(|| {
            serde::de::Error::custom("jobId must be a non-empty string or a non-negative integer")
        })
    }
}

/// Full lower-case `0x` + 40 hex rendering of an address.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Parses a `0x`-prefixed 20-byte hex address.
pub fn parse_address(raw: &str) -> Result<Address> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| DispatchError::InvalidAddress(raw.to_string(), "missing 0x prefix".into()))?;
    if digits.len() != 40 {
        return Err(DispatchError::InvalidAddress(
            raw.to_string(),
            format!("expected 40 hex digits, got {}", digits.len()),
        ));
    }
    let bytes = hex::decode(digits)
        .map_err(|e| DispatchError::InvalidAddress(raw.to_string(), e.to_string()))?;
    Ok(Address::from_slice(&bytes))
}

/// Serde adapter rendering addresses with [`format_address`].
pub mod address_hex {
    use super::{format_address, parse_address};
    use ethereum_types::Address;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(address: &Address, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_address(address))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Address, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_address(&raw).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional addresses; `None` renders as `null`.
pub mod option_address_hex {
    use super::format_address;
    use ethereum_types::Address;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(
        address: &Option<Address>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match address {
            Some(address) => serializer.serialize_str(&format_address(address)),
            None => serializer.serialize_none(),
        }
    }
}
