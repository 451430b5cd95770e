//! Contract artifacts
//!
//! Loads compiled Sierra classes and their CASM companions from the build
//! directory. The ABI is flattened the way the network expects it before the
//! class hash is taken, so the local hash is the one the node will report.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use starknet_core::types::contract::{CompiledClass, IntOrList, SierraClass};
use starknet_core::types::FlattenedSierraClass;
use starknet_types_core::felt::Felt;

use crate::error::DeployerError;

/// Default build directory.
pub const DEFAULT_BUILD_DIR: &str = "build";

const SIERRA_SUFFIX: &str = ".contract_class.json";
const CASM_SUFFIX: &str = ".compiled_contract_class.json";

/// A declarable class with its hashes.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub name: String,
    pub path: PathBuf,
    pub class_hash: Felt,
    pub compiled_class_hash: Felt,
    /// Flattened class as sent in a declare transaction.
    pub contract_class: Arc<FlattenedSierraClass>,
}

/// Reads artifacts from a build directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    build_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    /// Store at `BUILD_DIR`, or `build/` when unset.
    pub fn from_env() -> Self {
        Self::new(std::env::var("BUILD_DIR").unwrap_or_else(|_| DEFAULT_BUILD_DIR.to_string()))
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn sierra_path(&self, name: &str) -> PathBuf {
        self.build_dir.join(format!("{}{}", name, SIERRA_SUFFIX))
    }

    pub fn casm_path(&self, name: &str) -> PathBuf {
        self.build_dir.join(format!("{}{}", name, CASM_SUFFIX))
    }

    fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        serde_json::from_str(&content)
            .map_err(|e| DeployerError::malformed(path.display().to_string(), e.to_string()).into())
    }

    /// Loads `name` and computes both hashes.
    ///
    /// # Returns
    ///
    /// * `Ok(ContractArtifact)` - Artifact with class and compiled class hash
    /// * `Err(anyhow::Error)` - Missing file or unexpected artifact shape
    pub fn load(&self, name: &str) -> Result<ContractArtifact> {
        let path = self.sierra_path(name);
        let casm_path = self.casm_path(name);
        let sierra: SierraClass = Self::read(&path)?;
        let casm: CompiledClass = Self::read(&casm_path)?;

        let contract_class = sierra
            .flatten()
            .map_err(|e| DeployerError::malformed(path.display().to_string(), e.to_string()))?;
        if let Some(lengths) = &casm.bytecode_segment_lengths {
            let total = segment_total(lengths);
            if total != Some(casm.bytecode.len() as u64) {
                return Err(DeployerError::malformed(
                    casm_path.display().to_string(),
                    format!(
                        "bytecode segment lengths cover {:?} words, bytecode has {}",
                        total,
                        casm.bytecode.len()
                    ),
                )
                .into());
            }
        }
        let compiled_class_hash = casm
            .class_hash()
            .map_err(|e| DeployerError::malformed(casm_path.display().to_string(), e.to_string()))?;

        Ok(ContractArtifact {
            name: name.to_string(),
            class_hash: contract_class.class_hash(),
            path,
            compiled_class_hash,
            contract_class: Arc::new(contract_class),
        })
    }
}

/// Words covered by a segment length tree, `None` on overflow.
fn segment_total(lengths: &IntOrList) -> Option<u64> {
    match lengths {
        IntOrList::Int(length) => Some(*length),
        IntOrList::List(items) => items
            .iter()
            .try_fold(0u64, |acc, item| acc.checked_add(segment_total(item)?)),
    }
}
