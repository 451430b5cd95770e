//! Deployment Runner
//!
//! Declares, deploys and upgrades the contract system on one network, then
//! prints the deployment summary as JSON.
//!
//! ## Usage
//!
//! ```bash
//! STARKNET_NETWORK=sepolia cargo run --bin deploy -- --plan config/deployment.toml
//! ```

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use deployer::config::{resolve_network_with_env, NetworkRegistry};
use deployer::deployment::{evm_signer_from_env, ArtifactStore, DeploymentPipeline, DeploymentPlan, DeploymentStore};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "deploy")]
#[command(about = "Declare, deploy and upgrade contracts on a Starknet network")]
struct Args {
    /// Path to the network registry (default: config/networks.toml or NETWORKS_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Path to the deployment plan (default: config/deployment.toml or DEPLOYMENT_PLAN_PATH env var)
    #[arg(short, long)]
    plan: Option<String>,

    /// Network name, overrides STARKNET_NETWORK
    #[arg(short, long)]
    network: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let registry = NetworkRegistry::load_from_path(args.config.as_deref())?;
    let network = args.network.clone();
    let profile = resolve_network_with_env(&registry, |key| match (key, &network) {
        ("STARKNET_NETWORK", Some(name)) => Some(name.clone()),
        _ => std::env::var(key).ok(),
    })
    .await?;
    info!(
        "Network: {} (ledger chain id {:#x}, companion chain id {})",
        profile.name, profile.ledger_chain_id, profile.companion_chain_id
    );
    if !profile.relayers.is_empty() {
        info!("Relayers: {} (companion accounts are funded from them)", profile.relayers.len());
    }

    let plan = DeploymentPlan::load_from_path(args.plan.as_deref())?;
    let plan_dir = args
        .plan
        .as_deref()
        .and_then(|p| Path::new(p).parent())
        .map(|p| p.to_path_buf())
        .unwrap_or_default();
    let evm_signer = evm_signer_from_env(&plan, &profile)?;

    let artifacts = ArtifactStore::from_env();
    let store = DeploymentStore::from_env(&profile.name);
    info!("State directory: {}", store.dir().display());

    let mut pipeline = DeploymentPipeline::new(profile, plan, artifacts, store)?.with_plan_dir(plan_dir);
    if let Some(signer) = evm_signer {
        info!("EVM deployer: {}", signer.address());
        pipeline = pipeline.with_evm_signer(signer);
    }

    match pipeline.run().await {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(e) => {
            error!("❌ Deployment failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
