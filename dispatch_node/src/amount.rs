//! Canonical escrow amount in the chain's smallest unit (wei)
//!
//! Amounts reach the node as ABI `uint256` words, integer strings, decimal
//! ether strings or plain JSON numbers. They are coerced into [`Amount`] once,
//! where they enter the system, and never re-inspected afterwards.

use ethereum_types::U256;
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Decimal places between ether and wei.
pub const ETHER_DECIMALS: usize = 18;

/// Share of the escrowed amount owed to the delivering drone.
pub const DRONE_FEE_PERCENT: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount {0:?}")]
    Invalid(String),

    #[error("negative amount {0:?}")]
    Negative(String),

    #[error("amount {0:?} has more than 18 decimal places")]
    TooPrecise(String),

    #[error("amount {0:?} overflows uint256")]
    Overflow(String),

    #[error("unsupported amount representation: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(U256);

impl Amount {
    pub fn zero() -> Self {
        Amount(U256::zero())
    }

    pub fn from_wei(wei: U256) -> Self {
        Amount(wei)
    }

    pub fn wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parses a decimal ether quantity such as `"0.1"` or `"2"`.
    pub fn parse_ether(raw: &str) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }
        if trimmed.starts_with('-') {
            return Err(AmountError::Negative(raw.to_string()));
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if !digits_only(whole) || !digits_only(fraction) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        if fraction.len() > ETHER_DECIMALS {
            return Err(AmountError::TooPrecise(raw.to_string()));
        }

        let whole = if whole.is_empty() { "0" } else { whole };
        let scaled = format!("{}{:0<width$}", whole, fraction, width = ETHER_DECIMALS);
        U256::from_dec_str(&scaled)
            .map(Amount)
            .map_err(|_| AmountError::Overflow(raw.to_string()))
    }

    /// Integer strings are wei; strings containing a decimal point are ether.
    pub fn parse_str(raw: &str) -> Result<Self, AmountError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AmountError::Empty);
        }
        if trimmed.contains('.') {
            return Self::parse_ether(trimmed);
        }
        if trimmed.starts_with('-') {
            return Err(AmountError::Negative(raw.to_string()));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountError::Invalid(raw.to_string()));
        }
        U256::from_dec_str(trimmed)
            .map(Amount)
            .map_err(|_| AmountError::Overflow(raw.to_string()))
    }

    /// Coerces an amount received in a JSON body.
    ///
    /// Strings follow [`Amount::parse_str`]; bare numbers are ether quantities.
    pub fn from_json(value: &Value) -> Result<Self, AmountError> {
        match value {
            Value::String(s) => Self::parse_str(s),
            Value::Number(n) => Self::parse_ether(&n.to_string()),
            Value::Null => Err(AmountError::Empty),
            other => Err(AmountError::Unsupported(other.to_string())),
        }
    }

    /// Drone fee: [`DRONE_FEE_PERCENT`] of the amount, remainder discarded.
    pub fn drone_fee(&self) -> Amount {
        let percent = U256::from(DRONE_FEE_PERCENT);
        let hundred = U256::from(100u64);
        match self.0.checked_mul(percent) {
            Some(scaled) => Amount(scaled / hundred),
            None => Amount(self.0 / hundred * percent),
        }
    }

    /// JSON-RPC quantity encoding (`0x`-prefixed, no leading zeros).
    pub fn to_hex_quantity(&self) -> String {
        format!("0x{:x}", self.0)
    }

    /// Human-readable ether rendering for log lines.
    pub fn format_ether(&self) -> String {
        let wei = self.0.to_string();
        let padded = format!("{:0>width$}", wei, width = ETHER_DECIMALS + 1);
        let (whole, fraction) = padded.split_at(padded.len() - ETHER_DECIMALS);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            whole.to_string()
        } else {
            format!("{}.{}", whole, fraction)
        }
    }
}

impl From<u64> for Amount {
    fn from(wei: u64) -> Self {
        Amount(U256::from(wei))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} wei", self.0)
    }
}

/// Serialized as a decimal wei string, uint256 values do not fit JSON numbers.
impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ether(n: u64) -> U256 {
        U256::from(n) * U256::exp10(ETHER_DECIMALS)
    }

    #[test]
    fn test_parse_ether() {
        assert_eq!(Amount::parse_ether("1").unwrap().wei(), ether(1));
        assert_eq!(
            Amount::parse_ether("0.1").unwrap().wei(),
            U256::from(100_000_000_000_000_000u64)
        );
        assert_eq!(Amount::parse_ether(".5").unwrap().wei(), ether(5) / 10);
        assert_eq!(Amount::parse_ether("2.").unwrap().wei(), ether(2));
        assert_eq!(Amount::parse_ether("0.000000000000000001").unwrap().wei(), U256::one());
    }

    #[test]
    fn test_parse_ether_rejects_garbage() {
        assert_eq!(Amount::parse_ether(""), Err(AmountError::Empty));
        assert!(matches!(Amount::parse_ether("."), Err(AmountError::Invalid(_))));
        assert!(matches!(Amount::parse_ether("-1"), Err(AmountError::Negative(_))));
        assert!(matches!(Amount::parse_ether("1.2.3"), Err(AmountError::Invalid(_))));
        assert!(matches!(Amount::parse_ether("1e18"), Err(AmountError::Invalid(_))));
        assert!(matches!(
            Amount::parse_ether("0.0000000000000000001"),
            Err(AmountError::TooPrecise(_))
        ));
    }

    #[test]
    fn test_parse_str_distinguishes_wei_and_ether() {
        assert_eq!(Amount::parse_str("1000000").unwrap(), Amount::from(1_000_000));
        assert_eq!(Amount::parse_str("1.5").unwrap().wei(), ether(3) / 2);
        assert!(matches!(Amount::parse_str("abc"), Err(AmountError::Invalid(_))));
    }

    #[test]
    fn test_from_json_representations() {
        assert_eq!(Amount::from_json(&json!("7")).unwrap(), Amount::from(7));
        assert_eq!(Amount::from_json(&json!("0.1")).unwrap(), Amount::parse_ether("0.1").unwrap());
        assert_eq!(Amount::from_json(&json!(0.1)).unwrap(), Amount::parse_ether("0.1").unwrap());
        assert_eq!(Amount::from_json(&json!(2)).unwrap().wei(), ether(2));
        assert!(Amount::from_json(&json!(true)).is_err());
        assert!(Amount::from_json(&json!(null)).is_err());
    }

    #[test]
    fn test_drone_fee_is_ten_percent_floor() {
        assert_eq!(Amount::from(1_000_000).drone_fee(), Amount::from(100_000));
        assert_eq!(Amount::from(7).drone_fee(), Amount::zero());
        assert_eq!(Amount::from(19).drone_fee(), Amount::from(1));
        assert_eq!(Amount::from_wei(U256::MAX).drone_fee().wei(), U256::MAX / 100 * 10);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(Amount::from(255).to_hex_quantity(), "0xff");
        assert_eq!(Amount::zero().to_hex_quantity(), "0x0");
        assert_eq!(Amount::parse_ether("0.1").unwrap().format_ether(), "0.1");
        assert_eq!(Amount::parse_ether("12").unwrap().format_ether(), "12");
        assert_eq!(serde_json::to_value(Amount::from(5)).unwrap(), json!("5"));
    }
}
