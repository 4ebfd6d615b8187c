use anyhow::Result;
use clap::Parser;
use dispatch_node::config::{ContractMode, DispatchConfig, TriggerMode};
use dispatch_node::node;
use log::info;
use std::path::PathBuf;

/// Dispatch daemon arguments
#[derive(Parser)]
#[clap(name = "dispatchd")]
#[clap(about = "Delivery dispatch node - confirms escrow jobs and pays drones")]
struct Args {
    /// Path to the YAML configuration file
    #[clap(long, default_value = "config/dispatch.yaml")]
    config_path: PathBuf,

    /// Address to serve the API on, overrides the config file
    #[clap(long)]
    listen_addr: Option<String>,

    /// Use the in-memory mock contract instead of the RPC node
    #[clap(long)]
    mock: bool,

    /// Wait for POST /job/:jobId/delivered instead of the confirmation timer
    #[clap(long)]
    manual_delivery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    info!("Starting dispatch node...");
    info!("Config path: {:?}", args.config_path);

    let mut config = DispatchConfig::load(&args.config_path)?;
    config.apply_env_overrides();
    if let Some(listen_addr) = args.listen_addr {
        config.server.listen_addr = listen_addr;
    }
    if args.mock {
        config.contract.mode = ContractMode::Mock;
    }
    if args.manual_delivery {
        config.confirmation.trigger = TriggerMode::Manual;
    }

    let config = config.validate()?;
    info!("Contract mode: {:?}", config.mode);
    info!("Delivery trigger: {:?}", config.coordinator.trigger);

    node::serve(config).await?;
    Ok(())
}
