//! Wires configuration, contract client, fleet and coordinator together

use axum::Router;
use log::{info, warn};
use std::sync::Arc;

use crate::api::create_router;
use crate::config::{ContractMode, ValidatedConfig};
use crate::contract::{EscrowContract, MockEscrowClient, RpcEscrowClient};
use crate::coordinator::{InMemoryJobStore, JobCoordinator};
use crate::drone::DroneFleet;
use crate::error::Result;
use crate::types::format_address;

pub fn build_contract(config: &ValidatedConfig) -> Arc<dyn EscrowContract> {
    match config.mode {
        ContractMode::Live => {
            info!(
                "Escrow contract {} via {}, operator {} ({})",
                format_address(&config.rpc.escrow_address),
                config.rpc.rpc_url,
                format_address(&config.rpc.operator),
                if config.rpc.signer.is_some() {
                    "signing locally"
                } else {
                    "unlocked on the node"
                }
            );
            Arc::new(RpcEscrowClient::new(config.rpc.clone(), config.capabilities))
        }
        ContractMode::Mock => {
            warn!("Running against the in-memory mock contract");
            Arc::new(
                MockEscrowClient::new(config.rpc.operator, config.capabilities)
                    .with_auto_jobs(config.mock_job_amount),
            )
        }
    }
}

pub fn build_coordinator(config: &ValidatedConfig) -> Arc<JobCoordinator> {
    let roster = DroneFleet::default_roster();
    let fleet = match config.drone_seed {
        Some(seed) => DroneFleet::with_seed(roster, seed),
        None => DroneFleet::new(roster),
    };
    info!(
        "Fleet of {} drones, assignDrone supported: {}",
        fleet.roster().len(),
        config.capabilities.assign_drone
    );

    Arc::new(JobCoordinator::new(
        Arc::new(InMemoryJobStore::new()),
        build_contract(config),
        Arc::new(fleet),
        config.coordinator.clone(),
    ))
}

pub fn build_router(config: &ValidatedConfig) -> Router {
    create_router(build_coordinator(config), config.cors_origin.clone())
}

/// Binds the listen address and serves the API until the process exits.
pub async fn serve(config: ValidatedConfig) -> Result<()> {
    let app = build_router(&config);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    info!("Dispatch node listening on {}", config.listen_addr);
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
