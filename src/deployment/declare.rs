//! Class declarations
//!
//! Declare-or-skip for compiled classes: a class whose hash is already known
//! to the node is recorded without submitting anything.

use std::sync::Arc;

use anyhow::{Context, Result};
use starknet_types_core::felt::Felt;
use tracing::{error, info};

use super::artifacts::ArtifactStore;
use super::store::{DeclarationTable, DeploymentStore};
use crate::account::StarknetAccount;
use crate::crypto::felt_to_hex;

/// What happened to one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclareOutcome {
    Declared { class_hash: Felt, transaction_hash: Felt },
    AlreadyDeclared { class_hash: Felt },
}

impl DeclareOutcome {
    pub fn class_hash(&self) -> Felt {
        match self {
            DeclareOutcome::Declared { class_hash, .. } | DeclareOutcome::AlreadyDeclared { class_hash } => {
                *class_hash
            }
        }
    }

    pub fn transaction_hash(&self) -> Option<Felt> {
        match self {
            DeclareOutcome::Declared { transaction_hash, .. } => Some(*transaction_hash),
            DeclareOutcome::AlreadyDeclared { .. } => None,
        }
    }
}

/// Declares classes from an artifact store and records them.
pub struct Declarer {
    account: Arc<StarknetAccount>,
    artifacts: ArtifactStore,
    store: DeploymentStore,
}

impl Declarer {
    pub fn new(account: Arc<StarknetAccount>, artifacts: ArtifactStore, store: DeploymentStore) -> Self {
        Self {
            account,
            artifacts,
            store,
        }
    }

    /// Declares `name` unless the node already knows its class hash.
    ///
    /// Does not touch the persisted table; see [`Declarer::declare_all`].
    pub async fn declare(&self, name: &str) -> Result<DeclareOutcome> {
        let artifact = self.artifacts.load(name)?;
        let class_hash = artifact.class_hash;
        let client = self.account.client();

        if client.is_class_declared(&class_hash).await? {
            info!("✅ {} already declared as {}", name, felt_to_hex(&class_hash));
            return Ok(DeclareOutcome::AlreadyDeclared { class_hash });
        }

        info!("⏳ Declaring {}", name);
        let (transaction_hash, _) = self
            .account
            .declare(artifact.contract_class.clone(), &artifact.compiled_class_hash)
            .await?;
        client
            .wait_for_transaction(&transaction_hash)
            .await
            .into_receipt(&transaction_hash)
            .with_context(|| format!("Declaration of {} failed", name))?;
        info!("✅ {} declared as {}", name, felt_to_hex(&class_hash));

        Ok(DeclareOutcome::Declared {
            class_hash,
            transaction_hash,
        })
    }

    /// Declares every class in order and persists the table.
    ///
    /// The table is saved even when a declaration fails, so classes declared
    /// before the failure are not declared again on the next run.
    ///
    /// # Returns
    ///
    /// * `Ok((table, outcomes))` - Full declaration table and per-class outcomes
    /// * `Err(anyhow::Error)` - First failing class; later classes are not attempted
    pub async fn declare_all(&self, names: &[String]) -> Result<(DeclarationTable, Vec<(String, DeclareOutcome)>)> {
        let mut table = self.store.load_declarations()?;
        let mut outcomes = Vec::with_capacity(names.len());
        let mut failure = None;

        for name in names {
            match self.declare(name).await {
                Ok(outcome) => {
                    table.insert(name.clone(), outcome.class_hash());
                    outcomes.push((name.clone(), outcome));
                }
                Err(e) => {
                    error!("❌ Failed to declare {}: {:#}", name, e);
                    failure = Some(e);
                    break;
                }
            }
        }

        self.store.save_declarations(&table)?;
        match failure {
            Some(e) => Err(e),
            None => Ok((table, outcomes)),
        }
    }
}
