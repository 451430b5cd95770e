//! Core Contract
//!
//! Thin facade over the core singleton that runs the EVM on Starknet. Only the
//! entry points this tooling consumes are wrapped; administrative setters
//! (`set_base_fee`, `set_coinbase`, `set_authorized_cairo_precompile_caller`)
//! are issued through deployment plans as plain invocations.

use std::sync::Arc;

use anyhow::{Context, Result};
use starknet_types_core::felt::Felt;

use crate::account::{build_call, Call};
use crate::chains::StarknetClient;
use crate::crypto::{felt_to_hex, felt_to_u128, EvmAddress};
use crate::error::DeployerError;

/// Entry point the EVM-side accounts call with a packed transaction.
pub const ETH_SEND_TRANSACTION: &str = "eth_send_transaction";

/// Event carrying the result of an EVM transaction.
pub const TRANSACTION_EXECUTED_EVENT: &str = "transaction_executed";

/// Handle on a deployed (or expected) core contract.
#[derive(Debug, Clone)]
pub struct CoreContract {
    client: Arc<StarknetClient>,
    address: Felt,
    network: String,
}

impl CoreContract {
    pub fn new(client: Arc<StarknetClient>, address: Felt, network: &str) -> Self {
        Self {
            client,
            address,
            network: network.to_string(),
        }
    }

    pub fn address(&self) -> Felt {
        self.address
    }

    pub fn client(&self) -> &Arc<StarknetClient> {
        &self.client
    }

    /// Fails with [`DeployerError::CoreNotDeployed`] when nothing lives at the address.
    pub async fn ensure_deployed(&self) -> Result<()> {
        if self.client.is_deployed(&self.address).await? {
            Ok(())
        } else {
            Err(DeployerError::CoreNotDeployed {
                network: self.network.clone(),
            }
            .into())
        }
    }

    /// Deterministic Starknet address of an EVM address (view).
    pub async fn compute_starknet_address(&self, evm_address: &EvmAddress) -> Result<Felt> {
        let result = self
            .client
            .call_function(&self.address, "compute_starknet_address", &[evm_address.to_felt()])
            .await?;
        result.first().copied().ok_or_else(|| {
            DeployerError::malformed("compute_starknet_address response", "empty result").into()
        })
    }

    /// Registered Starknet address of an EVM address, zero when unregistered.
    pub async fn get_starknet_address(&self, evm_address: &EvmAddress) -> Result<Felt> {
        let result = self
            .client
            .call_function(&self.address, "get_starknet_address", &[evm_address.to_felt()])
            .await?;
        Ok(result.first().copied().unwrap_or(Felt::ZERO))
    }

    /// Current base fee in wei.
    pub async fn get_base_fee(&self) -> Result<u128> {
        let result = self.client.call_function(&self.address, "get_base_fee", &[]).await?;
        let fee = result
            .first()
            .ok_or_else(|| DeployerError::malformed("get_base_fee response", "empty result"))?;
        felt_to_u128(fee).with_context(|| format!("Base fee of {} out of range", felt_to_hex(&self.address)))
    }

    /// `deploy_externally_owned_account(evm_address)`
    pub fn deploy_externally_owned_account_call(&self, evm_address: &EvmAddress) -> Result<Call> {
        build_call(
            self.address,
            "deploy_externally_owned_account",
            vec![evm_address.to_felt()],
        )
    }

    /// `eth_send_transaction(packed...)`
    pub fn eth_send_transaction_call(&self, packed_transaction: Vec<Felt>) -> Result<Call> {
        build_call(self.address, ETH_SEND_TRANSACTION, packed_transaction)
    }
}
