use thiserror::Error;

use crate::amount::AmountError;
use crate::contract::ContractError;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Contract error: {0}")]
    Contract(#[from] ContractError),

    #[error("Invalid amount: {0}")]
    Amount(#[from] AmountError),

    #[error("Invalid address {0:?}: {1}")]
    InvalidAddress(String, String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No drone available: {0}")]
    NoDroneAvailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DispatchError>;
