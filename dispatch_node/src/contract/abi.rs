//! Minimal Solidity ABI encoding for the escrow contract's call surface

use ethereum_types::{Address, U256};
use sha3::{Digest, Keccak256};

use super::{ContractError, OnChainJob};
use crate::amount::Amount;

pub const JOBS: &str = "jobs(uint256)";
pub const CONFIRM_DELIVERY: &str = "confirmDelivery(uint256)";
pub const ASSIGN_DRONE: &str = "assignDrone(uint256,address)";

const WORD: usize = 32;

/// Static head words of the `jobs(uint256)` return tuple:
/// `(address poster, address recipient, address droneWallet, string details,
///   uint256 amount, bool funded, bool completed)`.
const JOB_HEAD_WORDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Uint(U256),
    Address(Address),
}

/// First four bytes of the Keccak-256 hash of a function signature.
pub fn function_selector(signature: &str) -> [u8; 4] {
    let mut hasher = Keccak256::new();
    hasher.update(signature.as_bytes());
    let hash = hasher.finalize();
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Encodes a call with static arguments as `0x`-prefixed calldata.
pub fn encode_call(signature: &str, args: &[Token]) -> String {
    let mut data = Vec::with_capacity(4 + args.len() * WORD);
    data.extend_from_slice(&function_selector(signature));
    for arg in args {
        data.extend_from_slice(&encode_word(arg));
    }
    format!("0x{}", hex::encode(data))
}

fn encode_word(token: &Token) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    match token {
        Token::Uint(value) => value.to_big_endian(&mut word),
        Token::Address(address) => word[12..].copy_from_slice(address.as_bytes()),
    }
    word
}

/// Decodes `0x`-prefixed return data of `jobs(uint256)`.
pub fn decode_job(return_data: &str) -> Result<OnChainJob, ContractError> {
    let digits = return_data.strip_prefix("0x").unwrap_or(return_data);
    let data = hex::decode(digits).map_err(|e| ContractError::Decode(e.to_string()))?;
    if data.len() < JOB_HEAD_WORDS * WORD {
        return Err(ContractError::Decode(format!(
            "jobs() returned {} bytes, expected at least {}",
            data.len(),
            JOB_HEAD_WORDS * WORD
        )));
    }

    Ok(OnChainJob {
        poster: decode_address(word(&data, 0)?)?,
        recipient: decode_address(word(&data, 1)?)?,
        drone_wallet: decode_address(word(&data, 2)?)?,
        details: decode_string(&data, word(&data, 3)?)?,
        amount: Amount::from_wei(U256::from_big_endian(word(&data, 4)?)),
        funded: decode_bool(word(&data, 5)?)?,
        completed: decode_bool(word(&data, 6)?)?,
    })
}

fn word(data: &[u8], index: usize) -> Result<&[u8], ContractError> {
    let start = index * WORD;
    data.get(start..start + WORD)
        .ok_or_else(|| ContractError::Decode(format!("missing word {}", index)))
}

fn decode_address(word: &[u8]) -> Result<Address, ContractError> {
    if word[..12].iter().any(|b| *b != 0) {
        return Err(ContractError::Decode("address word has dirty high bytes".into()));
    }
    Ok(Address::from_slice(&word[12..]))
}

fn decode_bool(word: &[u8]) -> Result<bool, ContractError> {
    if word[..WORD - 1].iter().any(|b| *b != 0) {
        return Err(ContractError::Decode("bool word has dirty high bytes".into()));
    }
    match word[WORD - 1] {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(ContractError::Decode(format!("invalid bool byte {}", other))),
    }
}

fn decode_usize(word: &[u8]) -> Result<usize, ContractError> {
    let value = U256::from_big_endian(word);
    if value.bits() > 32 {
        return Err(ContractError::Decode(format!("offset {} out of range", value)));
    }
    Ok(value.low_u64() as usize)
}

fn decode_string(data: &[u8], offset_word: &[u8]) -> Result<String, ContractError> {
    let offset = decode_usize(offset_word)?;
    let len_word = data
        .get(offset..offset + WORD)
        .ok_or_else(|| ContractError::Decode(format!("string offset {} past end", offset)))?;
    let len = decode_usize(len_word)?;
    let start = offset + WORD;
    let bytes = data
        .get(start..start + len)
        .ok_or_else(|| ContractError::Decode(format!("string of {} bytes past end", len)))?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}
