//! Operator key held by the node for `eth_sendRawTransaction`

use ethereum_types::{Address, U256};
use rlp::RlpStream;
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, SignOnly};
use sha3::{Digest, Keccak256};
use std::fmt;

use super::ContractError;

/// Legacy transaction, signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTransaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas: u64,
    pub to: Address,
    pub value: U256,
    pub data: Vec<u8>,
}

impl LegacyTransaction {
    pub fn signing_hash(&self, chain_id: u64) -> [u8; 32] {
        let mut stream = RlpStream::new_list(9);
        self.append_fields(&mut stream);
        stream.append(&chain_id);
        stream.append_empty_data();
        stream.append_empty_data();
        keccak256(&stream.out())
    }

    fn append_fields(&self, stream: &mut RlpStream) {
        stream.append(&self.nonce);
        stream.append(&trimmed(self.gas_price));
        stream.append(&self.gas);
        stream.append(&self.to.as_bytes().to_vec());
        stream.append(&trimmed(self.value));
        stream.append(&self.data);
    }
}

#[derive(Clone)]
pub struct LocalSigner {
    secp: Secp256k1<SignOnly>,
    secret: SecretKey,
    address: Address,
}

impl LocalSigner {
    /// Parses a 32-byte hex private key, with or without `0x`.
    pub fn from_hex(raw: &str) -> Result<Self, ContractError> {
        let bytes = hex::decode(raw.trim().trim_start_matches("0x"))
            .map_err(|e| ContractError::Signing(format!("private key is not hex: {}", e)))?;
        let secret = SecretKey::from_slice(&bytes)
            .map_err(|e| ContractError::Signing(format!("invalid private key: {}", e)))?;
        let secp = Secp256k1::signing_only();
        let address = public_key_address(&PublicKey::from_secret_key(&secp, &secret));
        Ok(LocalSigner {
            secp,
            secret,
            address,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// RLP-encoded signed transaction, ready for `eth_sendRawTransaction`.
    pub fn sign(&self, tx: &LegacyTransaction, chain_id: u64) -> Vec<u8> {
        let message = Message::from_digest(tx.signing_hash(chain_id));
        let signature = self.secp.sign_ecdsa_recoverable(&message, &self.secret);
        let (recovery_id, compact) = signature.serialize_compact();
        let v = chain_id * 2 + 35 + recovery_id.to_i32() as u64;

        let mut stream = RlpStream::new_list(9);
        tx.append_fields(&mut stream);
        stream.append(&v);
        stream.append(&strip_zeros(&compact[..32]));
        stream.append(&strip_zeros(&compact[32..]));
        stream.out().to_vec()
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Ethereum address of a public key: last 20 bytes of the Keccak-256 of its
/// uncompressed form.
pub fn public_key_address(public: &PublicKey) -> Address {
    let uncompressed = public.serialize_uncompressed();
    let hash = keccak256(&uncompressed[1..]);
    Address::from_slice(&hash[12..])
}

fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn trimmed(value: U256) -> Vec<u8> {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    strip_zeros(&buf)
}

fn strip_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::parse_address;

    // Sample key and transaction from EIP-155
    const EIP155_KEY: &str = "0x4646464646464646464646464646464646464646464646464646464646464646";

    fn eip155_transaction() -> LegacyTransaction {
        LegacyTransaction {
            nonce: 9,
            gas_price: U256::from(20_000_000_000u64),
            gas: 21_000,
            to: Address::repeat_byte(0x35),
            value: U256::from(1_000_000_000_000_000_000u64),
            data: Vec::new(),
        }
    }

    #[test]
    fn test_address_from_key() {
        let signer = LocalSigner::from_hex(EIP155_KEY).unwrap();
        assert_eq!(
            signer.address(),
            parse_address("0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f").unwrap()
        );
        assert!(format!("{:?}", signer).contains("address"));
        assert!(!format!("{:?}", signer).contains("4646"));
    }

    #[test]
    fn test_eip155_vector() {
        let tx = eip155_transaction();
        assert_eq!(
            hex::encode(tx.signing_hash(1)),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );

        let raw = LocalSigner::from_hex(EIP155_KEY).unwrap().sign(&tx, 1);
        assert_eq!(
            hex::encode(raw),
            "f86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83"
        );
    }

    #[test]
    fn test_rejects_bad_keys() {
        assert!(matches!(LocalSigner::from_hex("0xzz"), Err(ContractError::Signing(_))));
        assert!(matches!(LocalSigner::from_hex("0x1234"), Err(ContractError::Signing(_))));
        assert!(matches!(LocalSigner::from_hex(&"00".repeat(32)), Err(ContractError::Signing(_))));
    }
}
