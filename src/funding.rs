//! Funding & Balance Reconciliation
//!
//! Balance lookups across both address spaces, single transfers (faucet on
//! development networks, relayer transfer elsewhere) and the relayer top-up
//! sweep run by the `fund_relayers` binary.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::Serialize;
use starknet_types_core::felt::Felt;
use tracing::{error, info, warn};

use crate::account::StarknetAccount;
use crate::chains::{build_http_client, EvmClient, StarknetClient};
use crate::config::NetworkProfile;
use crate::crypto::{felt_to_hex, parse_felt, EvmAddress};
use crate::error::DeployerError;
use crate::notify::Notifier;
use crate::relayer::RelayerPool;
use crate::resolver::AddressResolver;
use crate::token::{balance_of, format_ether, parse_ether, transfer_call};

/// 0.05 ETH
pub const DEFAULT_LOWER_LIMIT: u128 = 50_000_000_000_000_000;
/// 0.1 ETH
pub const DEFAULT_TOP_UP_AMOUNT: u128 = 100_000_000_000_000_000;
/// 1 ETH
pub const DEFAULT_MASTER_LOWER_LIMIT: u128 = 1_000_000_000_000_000_000;

// ============================================================================
// ADDRESSES
// ============================================================================

/// Address in either VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountAddress {
    Starknet(Felt),
    Evm(EvmAddress),
}

impl FromStr for AccountAddress {
    type Err = anyhow::Error;

    /// 20-byte hex strings are EVM addresses, anything else a felt.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s.strip_prefix("0x").unwrap_or(s);
        if digits.len() == 40 {
            return Ok(AccountAddress::Evm(s.parse()?));
        }
        Ok(AccountAddress::Starknet(parse_felt(s)?))
    }
}

impl fmt::Display for AccountAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountAddress::Starknet(felt) => write!(f, "{}", felt_to_hex(felt)),
            AccountAddress::Evm(address) => write!(f, "{}", address),
        }
    }
}

// ============================================================================
// SINGLE TRANSFERS
// ============================================================================

#[derive(Debug, Serialize)]
struct MintRequest {
    address: String,
    amount: u128,
    unit: &'static str,
}

/// How `fund_address` delivered the funds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    Minted,
    Transferred { from: Felt, transaction_hash: Felt },
}

/// Balance queries and transfers on one network.
pub struct Funder {
    client: Arc<StarknetClient>,
    fee_token: Felt,
    faucet_url: Option<String>,
    development: bool,
    pool: Option<Arc<RelayerPool>>,
    resolver: Option<AddressResolver>,
    companion: Option<EvmClient>,
    http: Client,
}

impl Funder {
    pub fn new(client: Arc<StarknetClient>, profile: &NetworkProfile) -> Result<Self> {
        Ok(Self {
            client,
            fee_token: profile.fee_token_address,
            faucet_url: profile.faucet_url.clone(),
            development: profile.is_development(),
            pool: None,
            resolver: None,
            companion: None,
            http: build_http_client()?,
        })
    }

    /// Relayers paying for transfers outside development networks.
    pub fn with_relayers(mut self, pool: Arc<RelayerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Resolver mapping EVM addresses to their companion accounts.
    pub fn with_resolver(mut self, resolver: AddressResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Companion RPC answering `eth_getBalance` for EVM addresses.
    pub fn with_companion(mut self, companion: EvmClient) -> Self {
        self.companion = Some(companion);
        self
    }

    async fn starknet_address(&self, address: &AccountAddress) -> Result<Felt> {
        match address {
            AccountAddress::Starknet(felt) => Ok(*felt),
            AccountAddress::Evm(evm) => {
                let resolver = self.resolver.as_ref().ok_or_else(|| {
                    DeployerError::Config(format!("no address resolver to map {}", evm))
                })?;
                resolver.resolve_companion_address(evm).await
            }
        }
    }

    /// Native balance of `address` in wei.
    ///
    /// EVM addresses go through the companion RPC when connected, otherwise
    /// through the fee-token balance of their companion account.
    pub async fn get_balance(&self, address: &AccountAddress) -> Result<u128> {
        if let (AccountAddress::Evm(evm), Some(companion)) = (address, &self.companion) {
            return companion.get_balance(evm).await;
        }
        let owner = self.starknet_address(address).await?;
        balance_of(&self.client, &self.fee_token, &owner).await
    }

    /// Sends `amount` wei to `address`.
    ///
    /// # Returns
    ///
    /// * `Ok(FundingOutcome)` - Faucet mint or finalized relayer transfer
    /// * `Err(anyhow::Error)` - [`DeployerError::InsufficientBalance`] when the
    ///   relayer cannot cover `amount`; faucet, RPC or finality failure otherwise
    pub async fn fund_address(&self, address: &AccountAddress, amount: u128) -> Result<FundingOutcome> {
        let recipient = self.starknet_address(address).await?;

        if let (true, Some(faucet_url)) = (self.development, &self.faucet_url) {
            self.mint(faucet_url, &recipient, amount).await?;
            return Ok(FundingOutcome::Minted);
        }

        let pool = self.pool.as_ref().ok_or_else(|| {
            DeployerError::Config("no relayers configured to fund from".to_string())
        })?;
        let relayer = pool.next();
        let relayer_address = relayer.address();
        let balance = balance_of(&self.client, &self.fee_token, &relayer_address).await?;
        if balance < amount {
            return Err(DeployerError::InsufficientBalance {
                address: felt_to_hex(&relayer_address),
                balance,
                required: amount,
            }
            .into());
        }

        info!(
            "⏳ Funding {} with {} from {}",
            address,
            format_ether(amount),
            felt_to_hex(&relayer_address)
        );
        let (transaction_hash, status) = relayer
            .execute_and_wait(&[transfer_call(&self.fee_token, &recipient, amount)?])
            .await?;
        if !status.is_success() {
            anyhow::bail!(
                "Funding transfer {} to {} did not finalize: {:?}",
                felt_to_hex(&transaction_hash),
                address,
                status
            );
        }
        info!("✅ Funded {}", address);
        Ok(FundingOutcome::Transferred {
            from: relayer_address,
            transaction_hash,
        })
    }

    async fn mint(&self, faucet_url: &str, recipient: &Felt, amount: u128) -> Result<()> {
        info!(
            "⏳ Minting {} to {} via faucet",
            format_ether(amount),
            felt_to_hex(recipient)
        );
        let request = MintRequest {
            address: felt_to_hex(recipient),
            amount,
            unit: "WEI",
        };
        let response = self
            .http
            .post(faucet_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach faucet {}", faucet_url))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Faucet returned {}: {}", status, body);
        }
        Ok(())
    }
}

// ============================================================================
// RELAYER SWEEP
// ============================================================================

/// Thresholds of the relayer top-up sweep, in wei.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    pub lower_limit: u128,
    pub top_up_amount: u128,
    pub master_lower_limit: u128,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        Self {
            lower_limit: DEFAULT_LOWER_LIMIT,
            top_up_amount: DEFAULT_TOP_UP_AMOUNT,
            master_lower_limit: DEFAULT_MASTER_LOWER_LIMIT,
        }
    }
}

impl FundingPolicy {
    /// Defaults overridden by `RELAYER_LOWER_LIMIT`, `RELAYER_TOP_UP_AMOUNT`
    /// and `MASTER_LOWER_LIMIT` (decimal ether).
    pub fn from_env() -> Result<Self> {
        let read = |key: &str, default: u128| -> Result<u128> {
            match std::env::var(key) {
                Ok(value) => parse_ether(&value).with_context(|| format!("Invalid {}", key)),
                Err(_) => Ok(default),
            }
        };
        Ok(Self {
            lower_limit: read("RELAYER_LOWER_LIMIT", DEFAULT_LOWER_LIMIT)?,
            top_up_amount: read("RELAYER_TOP_UP_AMOUNT", DEFAULT_TOP_UP_AMOUNT)?,
            master_lower_limit: read("MASTER_LOWER_LIMIT", DEFAULT_MASTER_LOWER_LIMIT)?,
        })
    }
}

/// What happened to one relayer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RelayerFunding {
    Sufficient { balance: String },
    ToppedUp { balance: String, amount: String, transaction_hash: String },
    Failed { error: String },
}

/// Per-relayer result line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelayerReport {
    pub address: String,
    #[serde(flatten)]
    pub outcome: RelayerFunding,
}

/// Result of [`check_and_fund_relayers`].
#[derive(Debug, Clone, Serialize)]
pub struct FundingReport {
    pub master: String,
    pub master_balance: Option<String>,
    pub master_below_limit: bool,
    pub relayers: Vec<RelayerReport>,
}

impl FundingReport {
    pub fn failures(&self) -> usize {
        self.relayers
            .iter()
            .filter(|r| matches!(r.outcome, RelayerFunding::Failed { .. }))
            .count()
    }

    /// 200 when every relayer is funded, 500 otherwise.
    pub fn status_code(&self) -> u16 {
        if self.failures() == 0 {
            200
        } else {
            500
        }
    }
}

async fn fund_relayer(
    master: &StarknetAccount,
    fee_token: &Felt,
    relayer: &Felt,
    policy: &FundingPolicy,
) -> Result<RelayerFunding> {
    let balance = balance_of(master.client(), fee_token, relayer).await?;
    if balance >= policy.lower_limit {
        return Ok(RelayerFunding::Sufficient {
            balance: format_ether(balance),
        });
    }

    info!(
        "⏳ Relayer {} at {}, topping up {}",
        felt_to_hex(relayer),
        format_ether(balance),
        format_ether(policy.top_up_amount)
    );
    let (transaction_hash, status) = master
        .execute_and_wait(&[transfer_call(fee_token, relayer, policy.top_up_amount)?])
        .await?;
    if !status.is_success() {
        anyhow::bail!(
            "top-up {} did not finalize: {:?}",
            felt_to_hex(&transaction_hash),
            status
        );
    }
    Ok(RelayerFunding::ToppedUp {
        balance: format_ether(balance + policy.top_up_amount),
        amount: format_ether(policy.top_up_amount),
        transaction_hash: felt_to_hex(&transaction_hash),
    })
}

/// Tops up every relayer below `policy.lower_limit` from `master`.
///
/// Relayers are processed one by one and independently: a failed top-up is
/// recorded and the sweep continues. A master balance below
/// `policy.master_lower_limit` is reported through `notifier`.
pub async fn check_and_fund_relayers(
    master: &StarknetAccount,
    fee_token: &Felt,
    relayers: &[Felt],
    policy: &FundingPolicy,
    notifier: &dyn Notifier,
) -> FundingReport {
    let master_address = master.address();
    let master_balance = match balance_of(master.client(), fee_token, &master_address).await {
        Ok(balance) => Some(balance),
        Err(e) => {
            warn!("⚠️  Could not read master balance: {:#}", e);
            None
        }
    };
    let master_below_limit = master_balance
        .map(|b| b < policy.master_lower_limit)
        .unwrap_or(false);
    if let (true, Some(balance)) = (master_below_limit, master_balance) {
        let message = format!(
            "Master account {} is low on funds: {} (limit {})",
            felt_to_hex(&master_address),
            format_ether(balance),
            format_ether(policy.master_lower_limit)
        );
        warn!("⚠️  {}", message);
        notifier.post(&message).await;
    }

    let mut reports = Vec::with_capacity(relayers.len());
    for relayer in relayers {
        let outcome = match fund_relayer(master, fee_token, relayer, policy).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ Funding relayer {} failed: {:#}", felt_to_hex(relayer), e);
                RelayerFunding::Failed {
                    error: format!("{:#}", e),
                }
            }
        };
        reports.push(RelayerReport {
            address: felt_to_hex(relayer),
            outcome,
        });
    }

    let report = FundingReport {
        master: felt_to_hex(&master_address),
        master_balance: master_balance.map(format_ether),
        master_below_limit,
        relayers: reports,
    };
    if report.failures() > 0 {
        notifier
            .post(&format!(
                "Relayer funding: {} of {} relayers failed",
                report.failures(),
                relayers.len()
            ))
            .await;
    }
    report
}
