//! Delivery dispatch node
//!
//! Watches escrow jobs posted by a frontend, assigns a drone to each one,
//! confirms the delivery on-chain and pays the drone off-chain when the
//! contract could not.

pub mod amount;
pub mod api;
pub mod config;
pub mod contract;
pub mod coordinator;
pub mod drone;
pub mod error;
pub mod node;
pub mod types;

pub use amount::Amount;
pub use config::{DispatchConfig, ValidatedConfig};
pub use coordinator::{JobCoordinator, JobStatus};
pub use error::{DispatchError, Result};
pub use types::JobId;
