use async_trait::async_trait;
use ethereum_types::{Address, U256};
use log::{debug, info};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

use super::abi::{self, Token};
use super::signer::{LegacyTransaction, LocalSigner};
use super::{ContractCapabilities, ContractError, EscrowContract, OnChainJob, TxHash};
use crate::amount::Amount;
use crate::types::{format_address, JobId};

/// Connection settings for the live escrow client
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub rpc_url: String,
    pub escrow_address: Address,
    pub operator: Address,
    pub receipt_poll_interval: Duration,
    pub receipt_max_polls: u32,
    pub gas_limit: Option<u64>,
    /// Operator key; without one the node must hold the operator account
    pub signer: Option<LocalSigner>,
}

/// Escrow client speaking Ethereum JSON-RPC over HTTP.
///
/// With a [`LocalSigner`] every write is signed here and sent through
/// `eth_sendRawTransaction`. Otherwise writes go through `eth_sendTransaction`
/// from the operator account, so the node behind `rpc_url` must hold (or
/// proxy) that account's key.
pub struct RpcEscrowClient {
    settings: RpcSettings,
    capabilities: ContractCapabilities,
    client: reqwest::Client,
    next_id: AtomicU64,
    chain_id: OnceCell<u64>,
    /// Held from the nonce lookup until the raw transaction is accepted
    nonce_lock: Mutex<()>,
}

impl RpcEscrowClient {
    pub fn new(settings: RpcSettings, capabilities: ContractCapabilities) -> Self {
        RpcEscrowClient {
            settings,
            capabilities,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
            chain_id: OnceCell::new(),
            nonce_lock: Mutex::new(()),
        }
    }

    fn job_index(job_id: &JobId) -> Result<U256, ContractError> {
        job_id
            .to_u256()
            .ok_or_else(|| ContractError::InvalidJobId(job_id.to_string()))
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, ContractError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
        });

        let response = self
            .client
            .post(&self.settings.rpc_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ContractError::Transport(format!("{}: {}", method, e)))?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| ContractError::Transport(format!("{}: failed to parse response: {}", method, e)))?;

        if let Some(err) = body.get("error") {
            return Err(ContractError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }

        body.get("result")
            .cloned()
            .ok_or_else(|| ContractError::MissingResult(method.to_string()))
    }

    async fn call(&self, data: String) -> Result<String, ContractError> {
        let result = self
            .rpc(
                "eth_call",
                json!([{
                    "to": format_address(&self.settings.escrow_address),
                    "data": data,
                }, "latest"]),
            )
            .await?;

        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ContractError::MissingResult("eth_call".into()))
    }

    async fn quantity(&self, method: &str, params: Value) -> Result<U256, ContractError> {
        let result = self.rpc(method, params).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ContractError::MissingResult(method.to_string()))?;
        U256::from_str_radix(raw.trim_start_matches("0x"), 16)
            .map_err(|e| ContractError::Decode(format!("{}: bad quantity {:?}: {:?}", method, raw, e)))
    }

    async fn quantity_u64(&self, method: &str, params: Value) -> Result<u64, ContractError> {
        let value = self.quantity(method, params).await?;
        if value > U256::from(u64::MAX) {
            return Err(ContractError::Decode(format!("{}: {} does not fit in 64 bits", method, value)));
        }
        Ok(value.low_u64())
    }

    async fn chain_id(&self) -> Result<u64, ContractError> {
        self.chain_id
            .get_or_try_init(|| self.quantity_u64("eth_chainId", json!([])))
            .await
            .copied()
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Option<String>,
        value: Option<Amount>,
    ) -> Result<TxHash, ContractError> {
        let mut tx = json!({
            "from": format_address(&self.operator()),
            "to": format_address(&to),
        });
        if let Some(data) = &data {
            tx["data"] = Value::String(data.clone());
        }
        if let Some(value) = value {
            tx["value"] = Value::String(value.to_hex_quantity());
        }

        let tx_hash = match &self.settings.signer {
            Some(signer) => self.send_signed(signer, tx, to, data.as_deref(), value).await?,
            None => {
                if let Some(gas) = self.settings.gas_limit {
                    tx["gas"] = Value::String(format!("0x{:x}", gas));
                }
                let result = self.rpc("eth_sendTransaction", json!([tx])).await?;
                hash_result("eth_sendTransaction", result)?
            }
        };

        debug!("Submitted transaction {}", tx_hash);
        self.wait_for_receipt(&tx_hash).await?;
        Ok(tx_hash)
    }

    /// Fills nonce, gas price and gas from the node, signs locally and
    /// submits the raw transaction. `call` is the same transaction as a JSON
    /// call object, used for gas estimation.
    async fn send_signed(
        &self,
        signer: &LocalSigner,
        call: Value,
        to: Address,
        data: Option<&str>,
        value: Option<Amount>,
    ) -> Result<TxHash, ContractError> {
        let data = match data {
            Some(data) => hex::decode(data.trim_start_matches("0x"))
                .map_err(|e| ContractError::Signing(format!("calldata is not hex: {}", e)))?,
            None => Vec::new(),
        };
        let chain_id = self.chain_id().await?;

        let _nonce_guard = self.nonce_lock.lock().await;
        let nonce = self
            .quantity_u64(
                "eth_getTransactionCount",
                json!([format_address(&signer.address()), "pending"]),
            )
            .await?;
        let gas_price = self.quantity("eth_gasPrice", json!([])).await?;
        let gas = match self.settings.gas_limit {
            Some(gas) => gas,
            None => self.quantity_u64("eth_estimateGas", json!([call])).await?,
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price,
            gas,
            to,
            value: value.map(|v| v.wei()).unwrap_or_default(),
            data,
        };
        let raw = signer.sign(&tx, chain_id);
        debug!("Signed transaction nonce {} on chain {}", nonce, chain_id);

        let result = self
            .rpc("eth_sendRawTransaction", json!([format!("0x{}", hex::encode(raw))]))
            .await?;
        hash_result("eth_sendRawTransaction", result)
    }

    /// Polls until the transaction is mined; a `0x0` status is a revert.
    async fn wait_for_receipt(&self, tx_hash: &str) -> Result<(), ContractError> {
        for poll in 0..self.settings.receipt_max_polls {
            if poll > 0 {
                tokio::time::sleep(self.settings.receipt_poll_interval).await;
            }

            let receipt = self
                .rpc("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;
            if receipt.is_null() {
                continue;
            }

            return match receipt.get("status").and_then(Value::as_str) {
                Some("0x0") => Err(ContractError::Reverted(tx_hash.to_string())),
                _ => Ok(()),
            };
        }

        Err(ContractError::ReceiptTimeout {
            tx_hash: tx_hash.to_string(),
            polls: self.settings.receipt_max_polls,
        })
    }
}

#[async_trait]
impl EscrowContract for RpcEscrowClient {
    async fn get_job(&self, job_id: &JobId) -> Result<OnChainJob, ContractError> {
        let index = Self::job_index(job_id)?;
        let data = abi::encode_call(abi::JOBS, &[Token::Uint(index)]);
        let result = self.call(data).await?;
        let job = abi::decode_job(&result)?;
        debug!("Fetched job {} from escrow contract", job_id);
        Ok(job)
    }

    async fn confirm_delivery(&self, job_id: &JobId) -> Result<TxHash, ContractError> {
        let index = Self::job_index(job_id)?;
        let data = abi::encode_call(abi::CONFIRM_DELIVERY, &[Token::Uint(index)]);
        let tx_hash = self
            .send_transaction(self.settings.escrow_address, Some(data), None)
            .await?;
        info!("confirmDelivery({}) mined in {}", job_id, tx_hash);
        Ok(tx_hash)
    }

    async fn assign_drone(&self, job_id: &JobId, wallet: Address) -> Result<TxHash, ContractError> {
        if !self.capabilities.assign_drone {
            return Err(ContractError::Unsupported("assignDrone"));
        }
        let index = Self::job_index(job_id)?;
        let data = abi::encode_call(abi::ASSIGN_DRONE, &[Token::Uint(index), Token::Address(wallet)]);
        let tx_hash = self
            .send_transaction(self.settings.escrow_address, Some(data), None)
            .await?;
        info!("assignDrone({}, {}) mined in {}", job_id, format_address(&wallet), tx_hash);
        Ok(tx_hash)
    }

    async fn send_payment(&self, to: Address, amount: Amount) -> Result<TxHash, ContractError> {
        let tx_hash = self.send_transaction(to, None, Some(amount)).await?;
        info!("Transferred {} to {} in {}", amount, format_address(&to), tx_hash);
        Ok(tx_hash)
    }

    fn capabilities(&self) -> ContractCapabilities {
        self.capabilities
    }

    fn operator(&self) -> Address {
        match &self.settings.signer {
            Some(signer) => signer.address(),
            None => self.settings.operator,
        }
    }
}

fn hash_result(method: &str, result: Value) -> Result<TxHash, ContractError> {
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ContractError::MissingResult(method.to_string()))
}
