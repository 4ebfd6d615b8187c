//! Escrow contract client
//!
//! The coordinator only sees the [`EscrowContract`] trait. Two implementations
//! exist:
//! - **Live**: [`RpcEscrowClient`], JSON-RPC calls against an EVM node. Writes
//!   are signed locally by a [`LocalSigner`] when an operator key is
//!   configured, else sent from an account unlocked on the node.
//! - **Mock**: [`MockEscrowClient`], in-memory contract state with failure
//!   injection, for local runs and tests.

pub mod abi;
mod mock;
mod rpc;
mod signer;

pub use mock::{ContractOp, FailureMode, MockEscrowClient, Payment};
pub use rpc::{RpcEscrowClient, RpcSettings};
pub use signer::{public_key_address, LegacyTransaction, LocalSigner};

use async_trait::async_trait;
use ethereum_types::Address;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::amount::Amount;
use crate::error::{DispatchError, Result};
use crate::types::JobId;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("RPC transport failed: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("No result in RPC response to {0}")]
    MissingResult(String),

    #[error("Transaction {0} reverted")]
    Reverted(String),

    #[error("No receipt for transaction {tx_hash} after {polls} polls")]
    ReceiptTimeout { tx_hash: String, polls: u32 },

    #[error("ABI decode failed: {0}")]
    Decode(String),

    #[error("Job id {0:?} is not a uint256")]
    InvalidJobId(String),

    #[error("Contract does not support {0}")]
    Unsupported(&'static str),

    #[error("Job {0} does not exist on the contract")]
    UnknownJob(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Injected failure for {0}")]
    Injected(String),
}

pub type TxHash = String;

/// Job as stored by the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnChainJob {
    pub poster: Address,
    pub recipient: Address,
    pub drone_wallet: Address,
    pub details: String,
    pub amount: Amount,
    pub funded: bool,
    pub completed: bool,
}

impl OnChainJob {
    /// Drone wallet recorded on-chain; the zero address means none.
    pub fn recorded_drone_wallet(&self) -> Option<Address> {
        if self.drone_wallet.is_zero() {
            None
        } else {
            Some(self.drone_wallet)
        }
    }
}

/// Optional contract functions, resolved once at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractCapabilities {
    pub assign_drone: bool,
}

impl ContractCapabilities {
    /// Inspects an ABI document, either a bare entry array or a build
    /// artifact carrying it under `"abi"`.
    pub fn from_abi_json(abi: &Value) -> Self {
        let entries = abi.get("abi").unwrap_or(abi);
        let assign_drone = entries
            .as_array()
            .map(|items| {
                items.iter().any(|item| {
                    item.get("type").and_then(Value::as_str) == Some("function")
                        && item.get("name").and_then(Value::as_str) == Some("assignDrone")
                })
            })
            .unwrap_or(false);
        Self { assign_drone }
    }

    /// ABI file wins over the declared flag; neither means no optional functions.
    pub fn resolve(abi_path: Option<&Path>, declared: Option<bool>) -> Result<Self> {
        if let Some(path) = abi_path {
            let raw = std::fs::read_to_string(path).map_err(|e| {
                DispatchError::Config(format!("cannot read ABI {}: {}", path.display(), e))
            })?;
            let abi: Value = serde_json::from_str(&raw)?;
            return Ok(Self::from_abi_json(&abi));
        }
        Ok(Self {
            assign_drone: declared.unwrap_or(false),
        })
    }
}

#[async_trait]
pub trait EscrowContract: Send + Sync {
    /// Reads the job struct from the contract.
    async fn get_job(&self, job_id: &JobId) -> std::result::Result<OnChainJob, ContractError>;

    /// Releases escrowed funds; returns once the transaction is mined.
    async fn confirm_delivery(&self, job_id: &JobId) -> std::result::Result<TxHash, ContractError>;

    /// Records the drone wallet on-chain. Fails with `Unsupported` when the
    /// contract lacks the function.
    async fn assign_drone(
        &self,
        job_id: &JobId,
        wallet: Address,
    ) -> std::result::Result<TxHash, ContractError>;

    /// Plain value transfer from the operator account.
    async fn send_payment(
        &self,
        to: Address,
        amount: Amount,
    ) -> std::result::Result<TxHash, ContractError>;

    fn capabilities(&self) -> ContractCapabilities;

    /// Account that signs every write.
    fn operator(&self) -> Address;
}
