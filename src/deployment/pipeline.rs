//! Deployment Pipeline
//!
//! Runs a [`DeploymentPlan`] against one network in six ordered phases:
//! declarations, the core singleton, auxiliary singletons (batched into one
//! multicall), authorization invocations, pre-signed replays and EVM
//! deployments. Each phase persists its records before the next one starts,
//! so an interrupted run resumes where it stopped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use starknet_types_core::felt::Felt;
use tracing::{error, info, warn};

use super::artifacts::ArtifactStore;
use super::declare::{DeclareOutcome, Declarer};
use super::deploy::{DeployOutcome, SingletonDeployer, SingletonSpec};
use super::plan::{DeploymentPlan, ResolutionContext, SingletonEntry};
use super::store::{DeclarationTable, DeploymentRecord, DeploymentStore, DeploymentTable};
use crate::account::{build_call, LocalSigner, StarknetAccount};
use crate::batching::CallBatcher;
use crate::chains::starknet::StarknetClient;
use crate::config::NetworkProfile;
use crate::core_contract::CoreContract;
use crate::crypto::{felt_to_hex, parse_felt, EvmSigner};
use crate::error::DeployerError;
use crate::evm_tx::{create_address, EthTransactionSender, PresignedTransaction, SignedPayload, TransactionRequest};
use crate::funding::Funder;
use crate::relayer::RelayerPool;
use crate::resolver::AddressResolver;
use crate::token::parse_ether;

// ============================================================================
// SUMMARY
// ============================================================================

/// Outcome label of one summary entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Declared,
    AlreadyDeclared,
    Deployed,
    Upgraded,
    UpToDate,
    Replayed,
    Skipped,
}

/// One line of the deployment summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContractReport {
    pub name: String,
    pub status: ReportStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

impl ContractReport {
    fn new(name: &str, status: ReportStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            address: None,
            evm_address: None,
            class_hash: None,
            transaction_hash: None,
        }
    }

    fn from_declaration(name: &str, outcome: &DeclareOutcome) -> Self {
        let status = match outcome {
            DeclareOutcome::Declared { .. } => ReportStatus::Declared,
            DeclareOutcome::AlreadyDeclared { .. } => ReportStatus::AlreadyDeclared,
        };
        Self {
            class_hash: Some(felt_to_hex(&outcome.class_hash())),
            transaction_hash: outcome.transaction_hash().map(|h| felt_to_hex(&h)),
            ..Self::new(name, status)
        }
    }

    fn from_deployment(name: &str, outcome: &DeployOutcome, record: &DeploymentRecord) -> Self {
        let status = match outcome {
            DeployOutcome::Deployed { .. } => ReportStatus::Deployed,
            DeployOutcome::Upgraded { .. } => ReportStatus::Upgraded,
            DeployOutcome::UpToDate { .. } => ReportStatus::UpToDate,
        };
        let transaction_hash = match outcome {
            DeployOutcome::UpToDate { .. } => None,
            _ => Some(felt_to_hex(&record.tx)),
        };
        Self {
            address: Some(felt_to_hex(&record.address)),
            class_hash: Some(felt_to_hex(&outcome.class_hash())),
            transaction_hash,
            ..Self::new(name, status)
        }
    }

    fn from_evm_record(name: &str, status: ReportStatus, record: &DeploymentRecord) -> Self {
        Self {
            address: Some(felt_to_hex(&record.address)),
            evm_address: record.evm_address.map(|a| a.to_string()),
            transaction_hash: Some(felt_to_hex(&record.tx)),
            ..Self::new(name, status)
        }
    }
}

/// Everything one pipeline run did.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub network: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub declarations: Vec<ContractReport>,
    pub contracts: Vec<ContractReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocations_transaction: Option<String>,
    /// Invocations whose check showed them already applied.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub invocations_skipped: Vec<String>,
    pub replays: Vec<ContractReport>,
    pub evm_deployments: Vec<ContractReport>,
}

impl DeploymentSummary {
    fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            declarations: Vec::new(),
            contracts: Vec::new(),
            invocations_transaction: None,
            invocations_skipped: Vec::new(),
            replays: Vec::new(),
            evm_deployments: Vec::new(),
        }
    }

    /// Entry of a singleton by name.
    pub fn contract(&self, name: &str) -> Option<&ContractReport> {
        self.contracts.iter().find(|c| c.name == name)
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Resolves the EVM deployer key for a plan.
///
/// Reads `plan.evm.private_key_env`; development networks fall back to the
/// operator's Starknet key so local runs need no extra setup.
///
/// # Returns
///
/// * `Ok(Some(signer))` - Key found
/// * `Ok(None)` - No key configured (fine unless the plan has EVM deployments)
/// * `Err(anyhow::Error)` - Key present but invalid
pub fn evm_signer_from_env(plan: &DeploymentPlan, profile: &NetworkProfile) -> Result<Option<EvmSigner>> {
    match std::env::var(&plan.evm.private_key_env) {
        Ok(key) if !key.trim().is_empty() => EvmSigner::from_hex(key.trim())
            .with_context(|| format!("Invalid EVM key in {}", plan.evm.private_key_env))
            .map(Some),
        _ if profile.is_development() => {
            let key = hex::encode(profile.private_key.to_bytes_be());
            EvmSigner::from_hex(&key).map(Some)
        }
        _ => Ok(None),
    }
}

/// Runs a deployment plan against one network.
pub struct DeploymentPipeline {
    profile: NetworkProfile,
    plan: DeploymentPlan,
    plan_dir: PathBuf,
    account: Arc<StarknetAccount>,
    artifacts: ArtifactStore,
    store: DeploymentStore,
    batcher: Arc<CallBatcher>,
    evm_signer: Option<EvmSigner>,
    funder: Option<Arc<Funder>>,
}

impl DeploymentPipeline {
    /// Creates a pipeline operating with the profile's operator account.
    ///
    /// Companion top-ups come from the profile's relayers when it lists any,
    /// from the faucet on development networks that have one, and from the
    /// operator otherwise.
    ///
    /// # Arguments
    ///
    /// * `profile` - Resolved network
    /// * `plan` - Validated deployment plan
    /// * `artifacts` - Compiled classes
    /// * `store` - State files of `profile`'s network
    pub fn new(
        profile: NetworkProfile,
        plan: DeploymentPlan,
        artifacts: ArtifactStore,
        store: DeploymentStore,
    ) -> Result<Self> {
        plan.validate()?;
        let client = Arc::new(StarknetClient::new(&profile.rpc_url, profile.poll)?);
        let signer = Arc::new(LocalSigner::new(profile.account_address, profile.private_key));
        let account = Arc::new(StarknetAccount::new(
            client.clone(),
            signer,
            profile.ledger_chain_id,
            profile.max_fee,
        ));
        let funder = if !profile.relayers.is_empty() {
            let pool = RelayerPool::from_config(client.clone(), &profile, &profile.relayers)?;
            info!("Funding companion accounts from {} relayers", pool.len());
            Some(Arc::new(Funder::new(client, &profile)?.with_relayers(Arc::new(pool))))
        } else if profile.is_development() && profile.faucet_url.is_some() {
            Some(Arc::new(Funder::new(client, &profile)?))
        } else {
            None
        };
        Ok(Self {
            profile,
            plan,
            plan_dir: PathBuf::from("."),
            account,
            artifacts,
            store,
            batcher: Arc::new(CallBatcher::new()),
            evm_signer: None,
            funder,
        })
    }

    /// Directory `bytecode_path` entries are relative to.
    pub fn with_plan_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plan_dir = dir.into();
        self
    }

    /// Key signing the plan's EVM deployments.
    pub fn with_evm_signer(mut self, signer: EvmSigner) -> Self {
        self.evm_signer = Some(signer);
        self
    }

    pub fn account(&self) -> &Arc<StarknetAccount> {
        &self.account
    }

    /// Runs every phase in order.
    ///
    /// # Returns
    ///
    /// * `Ok(DeploymentSummary)` - Per-contract outcomes of all phases
    /// * `Err(anyhow::Error)` - First failing phase; records of completed work are persisted
    pub async fn run(&self) -> Result<DeploymentSummary> {
        let mut summary = DeploymentSummary::new(&self.profile.name);
        info!(
            "⏳ Deploying to {} as {}",
            self.profile.name,
            felt_to_hex(&self.account.address())
        );

        let declarations = self.declare_classes(&mut summary).await?;
        let mut deployments = self.store.load_deployments()?;

        self.deploy_core(&declarations, &mut deployments, &mut summary).await?;
        self.deploy_singletons(&declarations, &mut deployments, &mut summary).await?;
        self.run_invocations(&declarations, &deployments, &mut summary).await?;
        self.replay_presigned(&mut deployments, &mut summary).await?;
        self.deploy_evm_contracts(&mut deployments, &mut summary).await?;

        summary.finished_at = Some(Utc::now());
        info!("✅ Deployment to {} complete", self.profile.name);
        Ok(summary)
    }

    fn context<'a>(
        &self,
        declarations: &'a DeclarationTable,
        deployments: &'a DeploymentTable,
    ) -> ResolutionContext<'a> {
        ResolutionContext {
            declarations,
            deployments,
            account: self.account.address(),
            fee_token: self.profile.fee_token_address,
            chain_id: self.profile.companion_chain_id,
        }
    }

    fn resolve_singleton(
        &self,
        entry: &SingletonEntry,
        declarations: &DeclarationTable,
        deployments: &DeploymentTable,
    ) -> Result<SingletonSpec> {
        let context = self.context(declarations, deployments);
        let salt = parse_felt(&entry.salt).with_context(|| format!("Invalid salt of {}", entry.name))?;
        let constructor_calldata = context
            .resolve_all(&entry.constructor)
            .with_context(|| format!("Failed to resolve constructor of {}", entry.name))?;
        let class_hash_setters = entry
            .class_hash_setters
            .iter()
            .map(|setter| -> Result<(String, Felt)> {
                let hash = declarations
                    .get(&setter.class)
                    .copied()
                    .ok_or_else(|| DeployerError::ClassNotDeclared(setter.class.clone()))?;
                Ok((setter.entrypoint.clone(), hash))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SingletonSpec {
            name: entry.name.clone(),
            class: entry.class.clone(),
            salt,
            constructor_calldata,
            class_hash_setters,
        })
    }

    fn artifact_of(&self, class: &str) -> String {
        self.artifacts.sierra_path(class).display().to_string()
    }

    fn core_contract(&self, deployments: &DeploymentTable) -> Option<CoreContract> {
        let core = self.plan.core.as_ref()?;
        deployments
            .get(&core.name)
            .map(|record| CoreContract::new(self.account.client().clone(), record.address, &self.profile.name))
    }

    fn resolver(&self, core: Option<CoreContract>) -> AddressResolver {
        let resolver = AddressResolver::new(
            core,
            &self.profile.name,
            self.account.clone(),
            self.profile.fee_token_address,
        );
        match &self.funder {
            Some(funder) => resolver.with_funder(funder.clone()),
            None => resolver,
        }
    }

    fn sender(&self, deployments: &DeploymentTable) -> Result<EthTransactionSender> {
        let core = self.core_contract(deployments).ok_or_else(|| DeployerError::CoreNotDeployed {
            network: self.profile.name.clone(),
        })?;
        Ok(EthTransactionSender::new(
            core,
            self.profile.companion_chain_id,
            self.profile.max_fee,
        ))
    }

    // ------------------------------------------------------------------------
    // Phase 1
    // ------------------------------------------------------------------------

    async fn declare_classes(&self, summary: &mut DeploymentSummary) -> Result<DeclarationTable> {
        let declarer = Declarer::new(self.account.clone(), self.artifacts.clone(), self.store.clone());
        let (table, outcomes) = declarer.declare_all(&self.plan.classes).await?;
        summary.declarations = outcomes
            .iter()
            .map(|(name, outcome)| ContractReport::from_declaration(name, outcome))
            .collect();
        Ok(table)
    }

    // ------------------------------------------------------------------------
    // Phases 2 and 3
    // ------------------------------------------------------------------------

    async fn deploy_core(
        &self,
        declarations: &DeclarationTable,
        deployments: &mut DeploymentTable,
        summary: &mut DeploymentSummary,
    ) -> Result<()> {
        let Some(entry) = &self.plan.core else {
            return Ok(());
        };
        let spec = self.resolve_singleton(entry, declarations, deployments)?;
        let deployer = SingletonDeployer::new(self.account.clone(), self.batcher.clone());
        let outcome = deployer
            .deploy_or_upgrade(&spec, declarations, deployments.get(&entry.name))
            .await
            .with_context(|| format!("Failed to deploy {}", entry.name))?;

        let record = outcome.to_record(&self.artifact_of(&entry.class), deployments.get(&entry.name), None);
        summary.contracts.push(ContractReport::from_deployment(&entry.name, &outcome, &record));
        deployments.insert(entry.name.clone(), record);
        self.store.save_deployments(deployments)
    }

    async fn deploy_singletons(
        &self,
        declarations: &DeclarationTable,
        deployments: &mut DeploymentTable,
        summary: &mut DeploymentSummary,
    ) -> Result<()> {
        if self.plan.singletons.is_empty() {
            return Ok(());
        }
        let specs = self
            .plan
            .singletons
            .iter()
            .map(|entry| self.resolve_singleton(entry, declarations, deployments))
            .collect::<Result<Vec<_>>>()?;

        let deployer = SingletonDeployer::new(self.account.clone(), self.batcher.clone());
        self.batcher.register(self.account.clone()).await;
        let results = join_all(
            specs
                .iter()
                .map(|spec| deployer.deploy_or_upgrade(spec, declarations, deployments.get(&spec.name))),
        )
        .await;

        // Flush whatever was queued, even if a sibling failed
        let batch_transaction = self.batcher.unregister(&self.account.address()).await?;
        if let Some(hash) = batch_transaction {
            info!("✅ Singleton batch landed in {}", felt_to_hex(&hash));
        }

        let mut failures = Vec::new();
        for ((entry, spec), result) in self.plan.singletons.iter().zip(&specs).zip(results) {
            match result {
                Ok(outcome) => {
                    let record = outcome.to_record(
                        &self.artifact_of(&entry.class),
                        deployments.get(&spec.name),
                        batch_transaction,
                    );
                    summary.contracts.push(ContractReport::from_deployment(&spec.name, &outcome, &record));
                    deployments.insert(spec.name.clone(), record);
                }
                Err(e) => {
                    error!("❌ Failed to deploy {}: {:#}", spec.name, e);
                    failures.push(format!("{}: {:#}", spec.name, e));
                }
            }
        }
        self.store.save_deployments(deployments)?;

        if !failures.is_empty() {
            anyhow::bail!("Singleton deployment failed: {}", failures.join("; "));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 4
    // ------------------------------------------------------------------------

    async fn run_invocations(
        &self,
        declarations: &DeclarationTable,
        deployments: &DeploymentTable,
        summary: &mut DeploymentSummary,
    ) -> Result<()> {
        if self.plan.invocations.is_empty() {
            return Ok(());
        }
        let core = self.core_contract(deployments).ok_or_else(|| DeployerError::CoreNotDeployed {
            network: self.profile.name.clone(),
        })?;
        core.ensure_deployed().await?;

        let context = self.context(declarations, deployments);
        let client = self.account.client();
        let mut calls = Vec::with_capacity(self.plan.invocations.len());
        for invocation in &self.plan.invocations {
            let to = context.resolve(&invocation.contract.parse()?)?;
            if let Some(check) = &invocation.check {
                let expected = context
                    .resolve_all(invocation.expected())
                    .with_context(|| format!("Failed to resolve expected result of {}", invocation.entrypoint))?;
                let current = client
                    .call_function(&to, check, &[])
                    .await
                    .with_context(|| format!("Failed to check {}", invocation.entrypoint))?;
                if current == expected {
                    info!("✅ {} already applied", invocation.entrypoint);
                    summary.invocations_skipped.push(invocation.entrypoint.clone());
                    continue;
                }
            }
            let calldata = context
                .resolve_all(&invocation.calldata)
                .with_context(|| format!("Failed to resolve calldata of {}", invocation.entrypoint))?;
            calls.push(build_call(to, &invocation.entrypoint, calldata)?);
        }
        if calls.is_empty() {
            info!("✅ All invocations already applied");
            return Ok(());
        }

        info!("⏳ Running {} invocations", calls.len());
        let (transaction_hash, _) = self
            .account
            .execute_confirmed(&calls)
            .await
            .context("Authorization invocations failed")?;
        info!("✅ Invocations landed in {}", felt_to_hex(&transaction_hash));
        summary.invocations_transaction = Some(felt_to_hex(&transaction_hash));
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Phase 5
    // ------------------------------------------------------------------------

    async fn replay_presigned(&self, deployments: &mut DeploymentTable, summary: &mut DeploymentSummary) -> Result<()> {
        if self.plan.presigned.is_empty() {
            return Ok(());
        }
        let sender = self.sender(deployments)?;
        let resolver = self.resolver(Some(sender.core().clone()));

        for entry in &self.plan.presigned {
            let presigned = PresignedTransaction::from_hex(&entry.raw)
                .with_context(|| format!("Invalid pre-signed transaction {}", entry.name))?;
            let target = presigned.creation_address();

            if let Some(target) = &target {
                let companion = resolver.compute_companion_address(target).await?;
                if self.account.client().is_deployed(&companion).await? {
                    info!("✅ {} already replayed, {} has code", entry.name, target);
                    let record = deployments.entry(entry.name.clone()).or_insert_with(|| DeploymentRecord {
                        address: companion,
                        tx: Felt::ZERO,
                        artifact: format!("presigned:{}", entry.name),
                        class_hash: None,
                        evm_address: Some(*target),
                    });
                    summary
                        .replays
                        .push(ContractReport::from_evm_record(&entry.name, ReportStatus::Skipped, record));
                    continue;
                }
            } else if let Some(record) = deployments.get(&entry.name) {
                info!("✅ {} already replayed", entry.name);
                summary
                    .replays
                    .push(ContractReport::from_evm_record(&entry.name, ReportStatus::Skipped, record));
                continue;
            }

            let amount = parse_ether(&entry.fund_amount)?;
            resolver.deploy_and_fund(&presigned.sender, amount).await?;

            let nonce = sender.nonce_of(&presigned.sender).await?;
            if nonce != presigned.transaction.nonce {
                anyhow::bail!(
                    "Cannot replay {}: {} is at nonce {}, transaction expects {}",
                    entry.name,
                    presigned.sender,
                    nonce,
                    presigned.transaction.nonce
                );
            }

            info!("⏳ Replaying {} from {}", entry.name, presigned.sender);
            let outcome = sender.submit(&presigned.payload()?).await?;
            if !outcome.is_success() {
                anyhow::bail!(
                    "Replay of {} failed in {}: {:?}",
                    entry.name,
                    felt_to_hex(&outcome.starknet_transaction_hash),
                    outcome.status
                );
            }

            let address = match &target {
                Some(target) => resolver.compute_companion_address(target).await?,
                None => resolver.compute_companion_address(&presigned.sender).await?,
            };
            let record = DeploymentRecord {
                address,
                tx: outcome.starknet_transaction_hash,
                artifact: format!("presigned:{}", entry.name),
                class_hash: None,
                evm_address: target,
            };
            info!("✅ Replayed {} ({})", entry.name, outcome.evm_transaction_hash_hex());
            summary
                .replays
                .push(ContractReport::from_evm_record(&entry.name, ReportStatus::Replayed, &record));
            deployments.insert(entry.name.clone(), record);
            self.store.save_deployments(deployments)?;
        }
        self.store.save_deployments(deployments)
    }

    // ------------------------------------------------------------------------
    // Phase 6
    // ------------------------------------------------------------------------

    async fn deploy_evm_contracts(
        &self,
        deployments: &mut DeploymentTable,
        summary: &mut DeploymentSummary,
    ) -> Result<()> {
        if self.plan.evm_deployments.is_empty() {
            return Ok(());
        }
        let signer = self.evm_signer.as_ref().ok_or_else(|| {
            DeployerError::Config(format!(
                "EVM deployments need a key in {}",
                self.plan.evm.private_key_env
            ))
        })?;
        let sender = self.sender(deployments)?;
        let resolver = self.resolver(Some(sender.core().clone()));
        let client = self.account.client();

        let mut funded = false;
        for entry in &self.plan.evm_deployments {
            if let Some(record) = deployments.get(&entry.name).filter(|r| r.evm_address.is_some()) {
                if client.is_deployed(&record.address).await? {
                    info!("✅ {} already deployed", entry.name);
                    summary
                        .evm_deployments
                        .push(ContractReport::from_evm_record(&entry.name, ReportStatus::Skipped, record));
                    continue;
                }
                warn!("⚠️  {} is recorded but has no code, deploying again", entry.name);
            }

            if !funded {
                let amount = parse_ether(&self.plan.evm.fund_amount)?;
                resolver.deploy_and_fund(&signer.address(), amount).await?;
                funded = true;
            }

            let request = TransactionRequest {
                to: None,
                data: entry.init_code(&self.plan_dir)?,
                gas_limit: entry.gas_limit,
                ..Default::default()
            };
            let signed = sender.sign(signer, &request).await?;
            let created = create_address(&signer.address(), signed.transaction.nonce);

            info!("⏳ Deploying EVM contract {} at {}", entry.name, created);
            let outcome = sender
                .submit(&SignedPayload::from_signed(signer.address(), &signed)?)
                .await?;
            let execution_ok = outcome.execution.as_ref().map(|e| e.success).unwrap_or(false);
            if !outcome.is_success() || !execution_ok {
                anyhow::bail!(
                    "EVM deployment of {} failed in {}",
                    entry.name,
                    felt_to_hex(&outcome.starknet_transaction_hash)
                );
            }

            let record = DeploymentRecord {
                address: resolver.compute_companion_address(&created).await?,
                tx: outcome.starknet_transaction_hash,
                artifact: entry
                    .bytecode_path
                    .clone()
                    .unwrap_or_else(|| format!("inline:{}", entry.name)),
                class_hash: None,
                evm_address: Some(created),
            };
            info!("✅ {} deployed at {}", entry.name, created);
            summary
                .evm_deployments
                .push(ContractReport::from_evm_record(&entry.name, ReportStatus::Deployed, &record));
            deployments.insert(entry.name.clone(), record);
            self.store.save_deployments(deployments)?;
        }
        Ok(())
    }
}
