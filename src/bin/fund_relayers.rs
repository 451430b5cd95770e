//! Relayer Funding
//!
//! Tops up every relayer below the lower limit from the funding account and
//! alerts when the funding account itself runs low. Prints
//! `{"statusCode": 200|500, "body": <report>}` and exits non-zero on 500.
//!
//! Relayers come from the secret named by `RELAYERS_SECRET` (or the network's
//! configured relayers), the funding account from `FUNDING_SECRET` (or the
//! network's operator account).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use deployer::account::{LocalSigner, StarknetAccount};
use deployer::chains::StarknetClient;
use deployer::config::{resolve_network, NetworkRegistry};
use deployer::funding::{check_and_fund_relayers, FundingPolicy};
use deployer::notify::notifier_from_env;
use deployer::secrets::secret_store_from_env;
use deployer::token::format_ether;
use serde_json::json;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fund_relayers")]
#[command(about = "Top up relayer accounts below the funding threshold")]
struct Args {
    /// Path to the network registry (default: config/networks.toml or NETWORKS_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let registry = NetworkRegistry::load_from_path(args.config.as_deref())?;
    let profile = resolve_network(&registry).await?;
    let secrets = secret_store_from_env()?;

    let relayers = match std::env::var("RELAYERS_SECRET") {
        Ok(name) => secrets
            .get_secret_list(&name)?
            .iter()
            .map(|secret| secret.address_felt())
            .collect::<Result<Vec<_>>>()
            .context("Invalid relayer address in secret")?,
        Err(_) => profile.relayers.iter().map(|r| r.address).collect(),
    };
    let (master_address, master_key) = match std::env::var("FUNDING_SECRET") {
        Ok(name) => {
            let credentials = secrets.get_secret(&name)?.credentials()?;
            (credentials.address, credentials.private_key)
        }
        Err(_) => (profile.account_address, profile.private_key),
    };

    let policy = FundingPolicy::from_env()?;
    info!(
        "Checking {} relayers on {} (lower limit {}, top-up {})",
        relayers.len(),
        profile.name,
        format_ether(policy.lower_limit),
        format_ether(policy.top_up_amount)
    );

    let client = Arc::new(StarknetClient::new(&profile.rpc_url, profile.poll)?);
    let master = StarknetAccount::new(
        client,
        Arc::new(LocalSigner::new(master_address, master_key)),
        profile.ledger_chain_id,
        profile.max_fee,
    );
    let notifier = notifier_from_env();

    let report = check_and_fund_relayers(
        &master,
        &profile.fee_token_address,
        &relayers,
        &policy,
        notifier.as_ref(),
    )
    .await;

    let status_code = report.status_code();
    let output = json!({ "statusCode": status_code, "body": report });
    println!("{}", serde_json::to_string_pretty(&output)?);
    if status_code != 200 {
        std::process::exit(1);
    }
    Ok(())
}
