//! Deployment state persistence
//!
//! `declarations.json` (`{ name: class_hash }`) and `deployments.json`
//! (`{ name: { address, tx, artifact, class_hash? } }`) per network.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use starknet_types_core::felt::Felt;

use crate::crypto::{felt_to_hex, parse_felt, EvmAddress};
use crate::error::DeployerError;

/// Default root of the per-network state directories.
pub const DEFAULT_DEPLOYMENTS_DIR: &str = "deployments";

const DECLARATIONS_FILE: &str = "declarations.json";
const DEPLOYMENTS_FILE: &str = "deployments.json";

/// Class hashes by logical class name.
pub type DeclarationTable = BTreeMap<String, Felt>;

/// Deployment records by logical contract name.
pub type DeploymentTable = BTreeMap<String, DeploymentRecord>;

mod felt_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Felt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&felt_to_hex(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Felt, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_felt(&raw).map_err(serde::de::Error::custom)
    }
}

mod opt_felt_hex {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Felt>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(felt) => serializer.serialize_some(&felt_to_hex(felt)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Felt>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| parse_felt(&raw).map_err(serde::de::Error::custom))
            .transpose()
    }
}

mod opt_evm_address {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<EvmAddress>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(address) => serializer.serialize_some(&address.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<EvmAddress>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|raw| raw.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// Where a named contract lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    #[serde(with = "felt_hex")]
    pub address: Felt,
    #[serde(with = "felt_hex")]
    pub tx: Felt,
    pub artifact: String,
    /// Missing in records written by older tooling.
    #[serde(default, with = "opt_felt_hex", skip_serializing_if = "Option::is_none")]
    pub class_hash: Option<Felt>,
    /// Companion-VM address, for contracts deployed inside the EVM.
    #[serde(default, with = "opt_evm_address", skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<EvmAddress>,
}

/// JSON state files of one network.
#[derive(Debug, Clone)]
pub struct DeploymentStore {
    dir: PathBuf,
}

impl DeploymentStore {
    /// Store for `network` under `root` (`<root>/<network>/`).
    pub fn new(root: impl AsRef<Path>, network: &str) -> Self {
        Self {
            dir: root.as_ref().join(network),
        }
    }

    /// Store rooted at `DEPLOYMENTS_DIR`, or `deployments/` when unset.
    pub fn from_env(network: &str) -> Self {
        let root = std::env::var("DEPLOYMENTS_DIR").unwrap_or_else(|_| DEFAULT_DEPLOYMENTS_DIR.to_string());
        Self::new(root, network)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_json<T: DeserializeOwned + Default>(&self, file: &str) -> Result<T> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(T::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).map_err(|e| {
            DeployerError::malformed(path.display().to_string(), e.to_string()).into()
        })
    }

    fn write_json<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(file);
        let content = serde_json::to_string_pretty(value).context("Failed to serialize state")?;
        fs::write(&path, content + "\n").with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Loads the class table; a missing file is an empty table.
    pub fn load_declarations(&self) -> Result<DeclarationTable> {
        let raw: BTreeMap<String, String> = self.read_json(DECLARATIONS_FILE)?;
        raw.into_iter()
            .map(|(name, hash)| -> Result<(String, Felt)> {
                let felt = parse_felt(&hash).map_err(|e| {
                    DeployerError::malformed(
                        DECLARATIONS_FILE,
                        format!("class hash of '{}': {:#}", name, e),
                    )
                })?;
                Ok((name, felt))
            })
            .collect()
    }

    pub fn save_declarations(&self, declarations: &DeclarationTable) -> Result<()> {
        let raw: BTreeMap<&String, String> = declarations
            .iter()
            .map(|(name, hash)| (name, felt_to_hex(hash)))
            .collect();
        self.write_json(DECLARATIONS_FILE, &raw)
    }

    /// Loads the deployment table; a missing file is an empty table.
    pub fn load_deployments(&self) -> Result<DeploymentTable> {
        self.read_json(DEPLOYMENTS_FILE)
    }

    pub fn save_deployments(&self, deployments: &DeploymentTable) -> Result<()> {
        self.write_json(DEPLOYMENTS_FILE, deployments)
    }
}
