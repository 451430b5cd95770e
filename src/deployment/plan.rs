//! Deployment plan
//!
//! TOML description of what a network should end up with: declared classes,
//! the core singleton, auxiliary singletons, authorization invocations,
//! pre-signed replays and companion-VM deployments.
//!
//! Constructor arguments and calldata are literals (`"0x1"`, `"42"`) or
//! references resolved at run time:
//!
//! | Reference | Value |
//! |---|---|
//! | `$class:<name>` | declared class hash |
//! | `$contract:<name>` | deployed Starknet address |
//! | `$evm:<name>` | companion-VM address of an EVM deployment or replay |
//! | `$account` | deployer account address |
//! | `$fee_token` | fee token address |
//! | `$chain_id` | companion chain id |

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Deserialize;
use starknet_types_core::felt::Felt;

use super::store::{DeclarationTable, DeploymentTable};
use crate::crypto::parse_felt;
use crate::error::DeployerError;
use crate::token::parse_ether;

fn default_salt() -> String {
    "0x0".to_string()
}

fn default_fund_amount() -> String {
    "0.1".to_string()
}

fn default_evm_private_key_env() -> String {
    "EVM_PRIVATE_KEY".to_string()
}

fn default_gas_limit() -> u64 {
    5_000_000
}

// ============================================================================
// ARGUMENTS
// ============================================================================

/// A parsed constructor argument or calldata element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgRef {
    Literal(Felt),
    Class(String),
    Contract(String),
    Evm(String),
    Account,
    FeeToken,
    ChainId,
}

impl FromStr for ArgRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some(reference) = s.strip_prefix('$') else {
            return Ok(ArgRef::Literal(parse_felt(s)?));
        };
        match reference.split_once(':') {
            Some(("class", name)) if !name.is_empty() => Ok(ArgRef::Class(name.to_string())),
            Some(("contract", name)) if !name.is_empty() => Ok(ArgRef::Contract(name.to_string())),
            Some(("evm", name)) if !name.is_empty() => Ok(ArgRef::Evm(name.to_string())),
            None if reference == "account" => Ok(ArgRef::Account),
            None if reference == "fee_token" => Ok(ArgRef::FeeToken),
            None if reference == "chain_id" => Ok(ArgRef::ChainId),
            _ => anyhow::bail!("Unknown reference '{}'", s),
        }
    }
}

/// Values references resolve against.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionContext<'a> {
    pub declarations: &'a DeclarationTable,
    pub deployments: &'a DeploymentTable,
    pub account: Felt,
    pub fee_token: Felt,
    pub chain_id: u64,
}

impl ResolutionContext<'_> {
    pub fn resolve(&self, arg: &ArgRef) -> Result<Felt> {
        match arg {
            ArgRef::Literal(value) => Ok(*value),
            ArgRef::Class(name) => self
                .declarations
                .get(name)
                .copied()
                .ok_or_else(|| DeployerError::ClassNotDeclared(name.clone()).into()),
            ArgRef::Contract(name) => self
                .deployments
                .get(name)
                .map(|record| record.address)
                .ok_or_else(|| DeployerError::Config(format!("contract '{}' is not deployed", name)).into()),
            ArgRef::Evm(name) => self
                .deployments
                .get(name)
                .and_then(|record| record.evm_address)
                .map(|address| address.to_felt())
                .ok_or_else(|| {
                    DeployerError::Config(format!("EVM contract '{}' is not deployed", name)).into()
                }),
            ArgRef::Account => Ok(self.account),
            ArgRef::FeeToken => Ok(self.fee_token),
            ArgRef::ChainId => Ok(Felt::from(self.chain_id)),
        }
    }

    /// Parses and resolves a list of raw arguments.
    pub fn resolve_all(&self, raw: &[String]) -> Result<Vec<Felt>> {
        raw.iter()
            .map(|arg| self.resolve(&arg.parse()?))
            .collect()
    }
}

// ============================================================================
// PLAN ENTRIES
// ============================================================================

/// Auxiliary class-hash parameter that follows an upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassHashSetter {
    pub entrypoint: String,
    pub class: String,
}

/// A singleton deployed through the Universal Deployer.
#[derive(Debug, Clone, Deserialize)]
pub struct SingletonEntry {
    pub name: String,
    pub class: String,
    #[serde(default = "default_salt")]
    pub salt: String,
    #[serde(default)]
    pub constructor: Vec<String>,
    #[serde(default)]
    pub class_hash_setters: Vec<ClassHashSetter>,
}

/// A call issued once the core singleton exists.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationEntry {
    /// Target, usually `$contract:<name>`.
    pub contract: String,
    pub entrypoint: String,
    #[serde(default)]
    pub calldata: Vec<String>,
    /// View function on the same contract; the invocation is skipped while
    /// it already returns `expect`.
    #[serde(default)]
    pub check: Option<String>,
    /// Expected result of `check`, `calldata` when omitted.
    #[serde(default)]
    pub expect: Option<Vec<String>>,
}

impl InvocationEntry {
    /// Values `check` returns once this invocation is applied.
    pub fn expected(&self) -> &[String] {
        self.expect.as_deref().unwrap_or(&self.calldata)
    }
}

/// A raw pre-EIP-155 transaction to replay.
#[derive(Debug, Clone, Deserialize)]
pub struct PresignedEntry {
    pub name: String,
    pub raw: String,
    /// Balance the sender's companion account is topped up to, in ether.
    #[serde(default = "default_fund_amount")]
    pub fund_amount: String,
}

/// Companion-VM deployer settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmSettings {
    #[serde(default = "default_evm_private_key_env")]
    pub private_key_env: String,
    #[serde(default = "default_fund_amount")]
    pub fund_amount: String,
}

impl Default for EvmSettings {
    fn default() -> Self {
        Self {
            private_key_env: default_evm_private_key_env(),
            fund_amount: default_fund_amount(),
        }
    }
}

/// A contract deployed inside the companion VM.
#[derive(Debug, Clone, Deserialize)]
pub struct EvmDeploymentEntry {
    pub name: String,
    /// Hex init code.
    #[serde(default)]
    pub bytecode: Option<String>,
    /// Hex file, or a JSON artifact with `bytecode.object`.
    #[serde(default)]
    pub bytecode_path: Option<String>,
    /// Hex ABI-encoded constructor arguments appended to the init code.
    #[serde(default)]
    pub constructor_data: Option<String>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn decode_hex(value: &str, what: &str) -> Result<Vec<u8>> {
    let clean = value.trim();
    let clean = clean.strip_prefix("0x").unwrap_or(clean);
    hex::decode(clean).with_context(|| format!("Invalid hex in {}", what))
}

impl EvmDeploymentEntry {
    /// Init code followed by constructor data.
    pub fn init_code(&self, base_dir: &Path) -> Result<Vec<u8>> {
        let mut code = match (&self.bytecode, &self.bytecode_path) {
            (Some(bytecode), None) => decode_hex(bytecode, &self.name)?,
            (None, Some(path)) => {
                let path = base_dir.join(path);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    let artifact: serde_json::Value = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse {}", path.display()))?;
                    let object = artifact
                        .pointer("/bytecode/object")
                        .and_then(|o| o.as_str())
                        .ok_or_else(|| {
                            DeployerError::malformed(path.display().to_string(), "missing bytecode.object")
                        })?;
                    decode_hex(object, &self.name)?
                } else {
                    decode_hex(&content, &self.name)?
                }
            }
            _ => {
                return Err(DeployerError::Config(format!(
                    "EVM deployment '{}' needs exactly one of bytecode / bytecode_path",
                    self.name
                ))
                .into())
            }
        };
        if let Some(data) = &self.constructor_data {
            code.extend(decode_hex(data, &self.name)?);
        }
        Ok(code)
    }
}

// ============================================================================
// PLAN
// ============================================================================

/// Target state of one network.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeploymentPlan {
    /// Classes to declare, in order.
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub core: Option<SingletonEntry>,
    #[serde(default, rename = "singleton")]
    pub singletons: Vec<SingletonEntry>,
    #[serde(default, rename = "invocation")]
    pub invocations: Vec<InvocationEntry>,
    #[serde(default, rename = "presigned")]
    pub presigned: Vec<PresignedEntry>,
    #[serde(default)]
    pub evm: EvmSettings,
    #[serde(default, rename = "evm_deployment")]
    pub evm_deployments: Vec<EvmDeploymentEntry>,
}

impl DeploymentPlan {
    /// Loads a plan from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path. If None, uses DEPLOYMENT_PLAN_PATH env var or `config/deployment.toml`.
    pub fn load_from_path(path: Option<&str>) -> Result<Self> {
        let plan_path = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("DEPLOYMENT_PLAN_PATH").ok())
            .unwrap_or_else(|| "config/deployment.toml".to_string());

        if !Path::new(&plan_path).exists() {
            anyhow::bail!(
                "Deployment plan '{}' not found. Please copy the template:\n\
                cp config/deployment.template.toml config/deployment.toml",
                plan_path
            );
        }
        let content = std::fs::read_to_string(&plan_path)
            .with_context(|| format!("Failed to read {}", plan_path))?;
        Self::from_toml(&content).with_context(|| format!("Invalid deployment plan {}", plan_path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let plan: DeploymentPlan = toml::from_str(content).context("Failed to parse deployment plan")?;
        plan.validate()?;
        Ok(plan)
    }

    /// Core singleton followed by auxiliary singletons.
    pub fn all_singletons(&self) -> impl Iterator<Item = &SingletonEntry> {
        self.core.iter().chain(self.singletons.iter())
    }

    /// Checks names are unique, classes are planned and arguments parse.
    pub fn validate(&self) -> Result<()> {
        let classes: HashSet<&str> = self.classes.iter().map(|c| c.as_str()).collect();
        if classes.len() != self.classes.len() {
            return Err(DeployerError::Config("duplicate class in plan".into()).into());
        }

        let mut names = HashSet::new();
        let all_names = self
            .all_singletons()
            .map(|s| s.name.as_str())
            .chain(self.presigned.iter().map(|p| p.name.as_str()))
            .chain(self.evm_deployments.iter().map(|e| e.name.as_str()));
        for name in all_names {
            if name.is_empty() || !names.insert(name) {
                return Err(DeployerError::Config(format!("empty or duplicate contract name '{}'", name)).into());
            }
        }

        for singleton in self.all_singletons() {
            let referenced = std::iter::once(&singleton.class)
                .chain(singleton.class_hash_setters.iter().map(|s| &s.class));
            for class in referenced {
                if !classes.contains(class.as_str()) {
                    return Err(DeployerError::Config(format!(
                        "'{}' uses class '{}' which the plan does not declare",
                        singleton.name, class
                    ))
                    .into());
                }
            }
            parse_felt(&singleton.salt).with_context(|| format!("Invalid salt of '{}'", singleton.name))?;
            for arg in &singleton.constructor {
                arg.parse::<ArgRef>()
                    .with_context(|| format!("Invalid constructor argument of '{}'", singleton.name))?;
            }
        }

        if !self.invocations.is_empty() && self.core.is_none() {
            return Err(DeployerError::Config("invocations require a core singleton".into()).into());
        }
        for invocation in &self.invocations {
            if invocation.expect.is_some() && invocation.check.is_none() {
                return Err(DeployerError::Config(format!(
                    "invocation '{}' sets expect without check",
                    invocation.entrypoint
                ))
                .into());
            }
            let expected = invocation.expect.iter().flatten();
            for arg in std::iter::once(&invocation.contract)
                .chain(invocation.calldata.iter())
                .chain(expected)
            {
                arg.parse::<ArgRef>()
                    .with_context(|| format!("Invalid argument of '{}'", invocation.entrypoint))?;
            }
        }

        for entry in &self.presigned {
            parse_ether(&entry.fund_amount)?;
        }
        parse_ether(&self.evm.fund_amount)?;
        Ok(())
    }
}
