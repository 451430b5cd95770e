//! Singleton deployments
//!
//! Deploy-or-upgrade for contracts that exist once per network. Deployments go
//! through the Universal Deployer so the address only depends on class hash,
//! salt and constructor calldata; upgrades keep the address.

use std::sync::Arc;

use anyhow::{Context, Result};
use starknet_types_core::felt::Felt;
use tracing::{info, warn};

use super::store::{DeclarationTable, DeploymentRecord};
use crate::account::{build_call, udc_deploy_call, Call, StarknetAccount};
use crate::batching::{CallBatcher, InvokeOutcome};
use crate::crypto::felt_to_hex;
use crate::error::DeployerError;

/// Fully resolved singleton description.
#[derive(Debug, Clone)]
pub struct SingletonSpec {
    pub name: String,
    /// Logical class name (for error messages and records).
    pub class: String,
    pub salt: Felt,
    pub constructor_calldata: Vec<Felt>,
    /// `(entrypoint, class_hash)` invoked after an upgrade.
    pub class_hash_setters: Vec<(String, Felt)>,
}

/// What `deploy_or_upgrade` did.
///
/// `transaction_hash` is `None` when the calls were queued in the batcher
/// and will land with the next flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployOutcome {
    Deployed {
        address: Felt,
        class_hash: Felt,
        transaction_hash: Option<Felt>,
        /// Recorded address that held no contract and was superseded.
        replaced: Option<Felt>,
    },
    Upgraded {
        address: Felt,
        from: Felt,
        to: Felt,
        transaction_hash: Option<Felt>,
    },
    UpToDate {
        address: Felt,
        class_hash: Felt,
    },
}

impl DeployOutcome {
    pub fn address(&self) -> Felt {
        match self {
            DeployOutcome::Deployed { address, .. }
            | DeployOutcome::Upgraded { address, .. }
            | DeployOutcome::UpToDate { address, .. } => *address,
        }
    }

    pub fn class_hash(&self) -> Felt {
        match self {
            DeployOutcome::Deployed { class_hash, .. } | DeployOutcome::UpToDate { class_hash, .. } => *class_hash,
            DeployOutcome::Upgraded { to, .. } => *to,
        }
    }

    pub fn transaction_hash(&self) -> Option<Felt> {
        match self {
            DeployOutcome::Deployed { transaction_hash, .. } | DeployOutcome::Upgraded { transaction_hash, .. } => {
                *transaction_hash
            }
            DeployOutcome::UpToDate { .. } => None,
        }
    }

    /// Record reflecting this outcome.
    ///
    /// `transaction_hash` fills in a batched transaction; an up-to-date
    /// contract keeps the transaction of `previous`.
    pub fn to_record(
        &self,
        artifact: &str,
        previous: Option<&DeploymentRecord>,
        transaction_hash: Option<Felt>,
    ) -> DeploymentRecord {
        let tx = self
            .transaction_hash()
            .or(transaction_hash)
            .or_else(|| previous.map(|p| p.tx))
            .unwrap_or(Felt::ZERO);
        DeploymentRecord {
            address: self.address(),
            tx,
            artifact: artifact.to_string(),
            class_hash: Some(self.class_hash()),
            evm_address: previous.and_then(|p| p.evm_address),
        }
    }
}

/// Brings singletons to their declared class hash.
pub struct SingletonDeployer {
    account: Arc<StarknetAccount>,
    batcher: Arc<CallBatcher>,
}

impl SingletonDeployer {
    /// Calls are queued when `account` is registered with `batcher`,
    /// otherwise each operation is one confirmed transaction.
    pub fn new(account: Arc<StarknetAccount>, batcher: Arc<CallBatcher>) -> Self {
        Self { account, batcher }
    }

    async fn submit(&self, calls: Vec<Call>) -> Result<Option<Felt>> {
        if self.batcher.is_registered(&self.account.address()).await {
            for call in calls {
                if let InvokeOutcome::Submitted { transaction_hash } = self.batcher.invoke(&self.account, call).await? {
                    // Unregistered in the meantime, so it went out alone
                    self.account
                        .client()
                        .wait_for_transaction(&transaction_hash)
                        .await
                        .into_receipt(&transaction_hash)?;
                }
            }
            return Ok(None);
        }
        let (transaction_hash, _) = self.account.execute_confirmed(&calls).await?;
        Ok(Some(transaction_hash))
    }

    /// Deploys, upgrades or confirms `spec`.
    ///
    /// # Arguments
    ///
    /// * `spec` - Resolved singleton
    /// * `declarations` - Declared class hashes by class name
    /// * `existing` - Persisted record, if any
    ///
    /// # Returns
    ///
    /// * `Ok(DeployOutcome)` - `Deployed`, `Upgraded` (address kept) or `UpToDate` (no transaction)
    /// * `Err(anyhow::Error)` - [`DeployerError::ClassNotDeclared`] before any
    ///   transaction, or an RPC / transaction failure
    pub async fn deploy_or_upgrade(
        &self,
        spec: &SingletonSpec,
        declarations: &DeclarationTable,
        existing: Option<&DeploymentRecord>,
    ) -> Result<DeployOutcome> {
        let class_hash = *declarations
            .get(&spec.class)
            .ok_or_else(|| DeployerError::ClassNotDeclared(spec.class.clone()))?;
        let client = self.account.client();
        let (deploy_call, computed_address) =
            udc_deploy_call(&class_hash, &spec.salt, &spec.constructor_calldata)?;

        // A recorded address wins; otherwise look where a previous run would have deployed
        let address = existing.map(|r| r.address).unwrap_or(computed_address);
        let onchain = client
            .class_hash_at(&address)
            .await
            .with_context(|| format!("Failed to read class of {}", spec.name))?;

        match onchain {
            Some(current) if current == class_hash => {
                info!("✅ {} up to date at {}", spec.name, felt_to_hex(&address));
                Ok(DeployOutcome::UpToDate { address, class_hash })
            }
            Some(current) => {
                info!(
                    "⏳ Upgrading {} at {} from {} to {}",
                    spec.name,
                    felt_to_hex(&address),
                    felt_to_hex(&current),
                    felt_to_hex(&class_hash)
                );
                let mut calls = vec![build_call(address, "upgrade", vec![class_hash])?];
                for (entrypoint, hash) in &spec.class_hash_setters {
                    calls.push(build_call(address, entrypoint, vec![*hash])?);
                }
                let transaction_hash = self.submit(calls).await?;
                Ok(DeployOutcome::Upgraded {
                    address,
                    from: current,
                    to: class_hash,
                    transaction_hash,
                })
            }
            None => {
                let replaced = existing.map(|r| r.address).filter(|recorded| *recorded != computed_address);
                if let Some(recorded) = replaced {
                    warn!(
                        "⚠️ {} recorded at {} but nothing is deployed there, redeploying at {}",
                        spec.name,
                        felt_to_hex(&recorded),
                        felt_to_hex(&computed_address)
                    );
                }
                info!(
                    "⏳ Deploying {} ({}) at {}",
                    spec.name,
                    spec.class,
                    felt_to_hex(&computed_address)
                );
                let transaction_hash = self.submit(vec![deploy_call]).await?;
                Ok(DeployOutcome::Deployed {
                    address: computed_address,
                    class_hash,
                    transaction_hash,
                    replaced,
                })
            }
        }
    }
}
