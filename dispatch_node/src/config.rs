//! Node configuration
//!
//! Loaded from YAML, then overridden from the environment and the command
//! line. [`DispatchConfig::validate`] turns the raw strings into typed
//! settings once, at startup.

use axum::http::HeaderValue;
use ethereum_types::Address;
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::amount::Amount;
use crate::contract::{ContractCapabilities, LocalSigner, RpcSettings};
use crate::coordinator::{CoordinatorSettings, DeliveryTrigger, FallbackJob, DEFAULT_PLACEHOLDER_TTL};
use crate::error::{DispatchError, Result};
use crate::types::{format_address, parse_address};

pub const ENV_RPC_URL: &str = "DISPATCH_RPC_URL";
pub const ENV_ESCROW_ADDR: &str = "ESCROW_CONTRACT_ADDR";
pub const ENV_OPERATOR_ADDR: &str = "OPERATOR_ADDR";
pub const ENV_OPERATOR_KEY: &str = "OPERATOR_PRIVATE_KEY";
pub const ENV_LISTEN_ADDR: &str = "DISPATCH_LISTEN_ADDR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub server: ServerConfig,
    pub contract: ContractConfig,
    pub confirmation: ConfirmationConfig,
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Frontend origin allowed by CORS; unset allows any
    pub cors_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3001".to_string(),
            cors_origin: Some("http://localhost:3000".to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractMode {
    Live,
    Mock,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractConfig {
    pub mode: ContractMode,
    pub rpc_url: String,
    pub escrow_address: String,
    /// Operator account; must be unlocked on the node when no key is set
    pub operator_address: Option<String>,
    /// Hex operator key for local signing; prefer the environment override
    #[serde(skip_serializing)]
    pub private_key: Option<String>,
    /// Contract ABI or build artifact used to detect optional functions
    pub abi_path: Option<PathBuf>,
    pub assign_drone_supported: Option<bool>,
    pub receipt_poll_interval_ms: u64,
    pub receipt_max_polls: u32,
    pub gas_limit: Option<u64>,
    /// Escrow amount of jobs the mock contract makes up
    pub mock_job_amount: String,
}

impl Default for ContractConfig {
    fn default() -> Self {
        Self {
            mode: ContractMode::Live,
            rpc_url: "https://evm-rpc-testnet.sei-apis.com".to_string(),
            escrow_address: "0x233D7487e447248DF9f71C6db46e8454254EB808".to_string(),
            operator_address: None,
            private_key: None,
            abi_path: None,
            assign_drone_supported: None,
            receipt_poll_interval_ms: 1000,
            receipt_max_polls: 120,
            gas_limit: None,
            mock_job_amount: "0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    Timer,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfirmationConfig {
    pub trigger: TriggerMode,
    pub delay_secs: u64,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    /// How long a manual assignment waits for its job to be submitted
    pub placeholder_ttl_secs: u64,
    /// Fixed seed for drone selection jitter
    pub drone_seed: Option<u64>,
}

impl Default for ConfirmationConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerMode::Timer,
            delay_secs: 10,
            retries: 0,
            retry_backoff_ms: 2000,
            placeholder_ttl_secs: DEFAULT_PLACEHOLDER_TTL.as_secs(),
            drone_seed: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub recipient: Option<String>,
    pub amount: Option<String>,
    pub details: Option<String>,
}

/// Configuration after validation, ready to build the node from.
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub listen_addr: SocketAddr,
    pub cors_origin: Option<HeaderValue>,
    pub mode: ContractMode,
    pub rpc: RpcSettings,
    pub capabilities: ContractCapabilities,
    pub coordinator: CoordinatorSettings,
    pub mock_job_amount: Amount,
    pub drone_seed: Option<u64>,
}

impl DispatchConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Reads `path` if it exists, else starts from defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            info!("Config file {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.contract.rpc_url = url;
        }
        if let Some(addr) = lookup(ENV_ESCROW_ADDR) {
            self.contract.escrow_address = addr;
        }
        if let Some(addr) = lookup(ENV_OPERATOR_ADDR) {
            self.contract.operator_address = Some(addr);
        }
        if let Some(key) = lookup(ENV_OPERATOR_KEY) {
            self.contract.private_key = Some(key);
        }
        if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
            self.server.listen_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<ValidatedConfig> {
        let listen_addr: SocketAddr = self.server.listen_addr.parse().map_err(|e| {
            DispatchError::Config(format!("invalid listen address {:?}: {}", self.server.listen_addr, e))
        })?;
        let cors_origin = self
            .server
            .cors_origin
            .as_deref()
            .map(|origin| {
                HeaderValue::from_str(origin).map_err(|e| {
                    DispatchError::Config(format!("invalid CORS origin {:?}: {}", origin, e))
                })
            })
            .transpose()?;

        let contract = &self.contract;
        let signer = contract
            .private_key
            .as_deref()
            .map(LocalSigner::from_hex)
            .transpose()?;
        let declared = contract
            .operator_address
            .as_deref()
            .map(parse_address)
            .transpose()?;
        let operator = match (&signer, declared) {
            (Some(signer), Some(declared)) if declared != signer.address() => {
                return Err(DispatchError::Config(format!(
                    "operator address {} does not match the private key's account {}",
                    format_address(&declared),
                    format_address(&signer.address())
                )));
            }
            (Some(signer), _) => signer.address(),
            (None, declared) => declared.unwrap_or_else(Address::zero),
        };
        if contract.mode == ContractMode::Live {
            if operator.is_zero() {
                return Err(DispatchError::Config(format!(
                    "live mode needs an operator key ({}) or an unlocked operator address ({})",
                    ENV_OPERATOR_KEY, ENV_OPERATOR_ADDR
                )));
            }
            if contract.rpc_url.trim().is_empty() {
                return Err(DispatchError::Config("contract.rpc_url is empty".to_string()));
            }
        }
        if contract.receipt_max_polls == 0 {
            return Err(DispatchError::Config(
                "contract.receipt_max_polls must be at least 1".to_string(),
            ));
        }

        let rpc = RpcSettings {
            rpc_url: contract.rpc_url.clone(),
            escrow_address: parse_address(&contract.escrow_address)?,
            operator,
            receipt_poll_interval: Duration::from_millis(contract.receipt_poll_interval_ms),
            receipt_max_polls: contract.receipt_max_polls,
            gas_limit: contract.gas_limit,
            signer,
        };
        let capabilities =
            ContractCapabilities::resolve(contract.abi_path.as_deref(), contract.assign_drone_supported)?;

        let confirmation = &self.confirmation;
        let trigger = match confirmation.trigger {
            TriggerMode::Timer => DeliveryTrigger::Timer(Duration::from_secs(confirmation.delay_secs)),
            TriggerMode::Manual => DeliveryTrigger::Manual,
        };

        let mut fallback = FallbackJob::default();
        if let Some(recipient) = self.fallback.recipient.as_deref() {
            fallback.recipient = parse_address(recipient)?;
        }
        if let Some(amount) = self.fallback.amount.as_deref() {
            fallback.amount = Amount::parse_str(amount)?;
        }
        if let Some(details) = &self.fallback.details {
            fallback.details = details.clone();
        }

        Ok(ValidatedConfig {
            listen_addr,
            cors_origin,
            mode: contract.mode,
            rpc,
            capabilities,
            coordinator: CoordinatorSettings {
                trigger,
                confirm_retries: confirmation.retries,
                retry_backoff: Duration::from_millis(confirmation.retry_backoff_ms),
                placeholder_ttl: Duration::from_secs(confirmation.placeholder_ttl_secs),
                fallback,
            },
            mock_job_amount: Amount::parse_str(&contract.mock_job_amount)?,
            drone_seed: confirmation.drone_seed,
        })
    }
}
