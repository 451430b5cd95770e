//! Cross-VM Address Resolver
//!
//! Maps EVM addresses to their Starknet counterparts through the core
//! contract, and makes sure a counterpart account exists and is funded.
//!
//! Top-ups come from a [`Funder`] when one is attached (faucet or relayer
//! pool), otherwise from the operator account.

use std::sync::Arc;

use anyhow::{Context, Result};
use starknet_types_core::felt::Felt;
use tracing::info;

use crate::account::StarknetAccount;
use crate::core_contract::CoreContract;
use crate::crypto::{felt_to_hex, EvmAddress};
use crate::error::DeployerError;
use crate::funding::{AccountAddress, Funder};
use crate::token::{balance_of, format_ether, transfer_call};

/// What `deploy_and_fund` had to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionAccount {
    pub evm_address: EvmAddress,
    pub starknet_address: Felt,
    /// Amount sent to reach the target balance (0 when already funded)
    pub topped_up: u128,
    /// Whether the account contract had to be deployed
    pub deployed: bool,
}

/// Resolves companion addresses against a core contract.
pub struct AddressResolver {
    core: Option<CoreContract>,
    network: String,
    operator: Arc<StarknetAccount>,
    funder: Option<Arc<Funder>>,
    fee_token: Felt,
}

impl AddressResolver {
    /// # Arguments
    ///
    /// * `core` - Core contract, `None` when it has no deployment record yet
    /// * `network` - Network name used in error messages
    /// * `operator` - Account paying for account deployments, and for
    ///   top-ups unless a funder is attached
    /// * `fee_token` - Native fee token address
    pub fn new(
        core: Option<CoreContract>,
        network: &str,
        operator: Arc<StarknetAccount>,
        fee_token: Felt,
    ) -> Self {
        Self {
            core,
            network: network.to_string(),
            operator,
            funder: None,
            fee_token,
        }
    }

    /// Routes top-ups through `funder` instead of the operator.
    pub fn with_funder(mut self, funder: Arc<Funder>) -> Self {
        self.funder = Some(funder);
        self
    }

    async fn core(&self) -> Result<&CoreContract> {
        let core = self.core.as_ref().ok_or_else(|| DeployerError::CoreNotDeployed {
            network: self.network.clone(),
        })?;
        core.ensure_deployed().await?;
        Ok(core)
    }

    /// Deterministic Starknet address of `evm_address`.
    ///
    /// Independent of whether an account is deployed there.
    pub async fn compute_companion_address(&self, evm_address: &EvmAddress) -> Result<Felt> {
        self.core()
            .await?
            .compute_starknet_address(evm_address)
            .await
            .with_context(|| format!("Failed to compute companion address of {}", evm_address))
    }

    /// Registered Starknet address of `evm_address`, falling back to the
    /// deterministic one when the registry has no entry.
    pub async fn resolve_companion_address(&self, evm_address: &EvmAddress) -> Result<Felt> {
        let core = self.core().await?;
        let registered = core.get_starknet_address(evm_address).await?;
        if registered != Felt::ZERO {
            return Ok(registered);
        }
        core.compute_starknet_address(evm_address).await
    }

    /// Ensures the companion account of `evm_address` holds at least `amount`
    /// and is deployed. Safe to call repeatedly.
    pub async fn deploy_and_fund(&self, evm_address: &EvmAddress, amount: u128) -> Result<CompanionAccount> {
        let core = self.core().await?;
        let starknet_address = core.compute_starknet_address(evm_address).await?;
        let client = core.client();

        let balance = balance_of(client, &self.fee_token, &starknet_address).await?;
        let mut topped_up = 0;
        if balance < amount {
            let missing = amount - balance;
            info!(
                "⏳ Funding {} ({}) with {}",
                evm_address,
                felt_to_hex(&starknet_address),
                format_ether(missing)
            );
            match &self.funder {
                Some(funder) => {
                    funder
                        .fund_address(&AccountAddress::Starknet(starknet_address), missing)
                        .await
                        .map(|_| ())
                }
                None => self
                    .operator
                    .execute_confirmed(&[transfer_call(&self.fee_token, &starknet_address, missing)?])
                    .await
                    .map(|_| ()),
            }
            .with_context(|| format!("Failed to fund companion account of {}", evm_address))?;
            topped_up = missing;
        }

        let deployed = if client.is_deployed(&starknet_address).await? {
            false
        } else {
            info!(
                "⏳ Deploying account for {} at {}",
                evm_address,
                felt_to_hex(&starknet_address)
            );
            self.operator
                .execute_confirmed(&[core.deploy_externally_owned_account_call(evm_address)?])
                .await
                .with_context(|| format!("Failed to deploy companion account of {}", evm_address))?;
            true
        };

        if topped_up > 0 || deployed {
            info!(
                "✅ Companion account of {} ready at {}",
                evm_address,
                felt_to_hex(&starknet_address)
            );
        }

        Ok(CompanionAccount {
            evm_address: *evm_address,
            starknet_address,
            topped_up,
            deployed,
        })
    }

    pub fn core_contract(&self) -> Option<&CoreContract> {
        self.core.as_ref()
    }
}
