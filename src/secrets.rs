//! Secrets Store
//!
//! Named `(address, private_key)` pairs for the ops binaries. Keys are never
//! logged; `AccountSecret`'s `Debug` redacts them.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use starknet_types_core::felt::Felt;

use crate::config::RelayerCredentials;
use crate::crypto::parse_felt;
use crate::error::DeployerError;

/// Account credentials stored under one secret name.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct AccountSecret {
    pub address: String,
    pub private_key: String,
}

impl AccountSecret {
    /// Parses both fields into felts.
    pub fn credentials(&self) -> Result<RelayerCredentials> {
        Ok(RelayerCredentials {
            address: parse_felt(&self.address).context("Invalid address in secret")?,
            private_key: parse_felt(&self.private_key).context("Invalid private key in secret")?,
        })
    }

    pub fn address_felt(&self) -> Result<Felt> {
        parse_felt(&self.address)
    }
}

impl fmt::Debug for AccountSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountSecret")
            .field("address", &self.address)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Read access to named secrets.
pub trait SecretStore: Send + Sync {
    /// Secret `name`, or a [`DeployerError::Config`] when it does not exist.
    fn get_secret(&self, name: &str) -> Result<AccountSecret>;

    /// Secret `name` holding several accounts.
    fn get_secret_list(&self, name: &str) -> Result<Vec<AccountSecret>> {
        Ok(vec![self.get_secret(name)?])
    }
}

fn env_name(name: &str) -> String {
    name.to_uppercase().replace(['-', '.', '/'], "_")
}

/// Secrets from `<NAME>_ADDRESS` / `<NAME>_PRIVATE_KEY`.
///
/// Lists use the same variables with comma-separated values.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn read(&self, name: &str) -> Result<(String, String)> {
        let prefix = env_name(name);
        let address_var = format!("{}_ADDRESS", prefix);
        let key_var = format!("{}_PRIVATE_KEY", prefix);
        let address = std::env::var(&address_var)
            .map_err(|_| DeployerError::Config(format!("secret '{}': {} is not set", name, address_var)))?;
        let private_key = std::env::var(&key_var)
            .map_err(|_| DeployerError::Config(format!("secret '{}': {} is not set", name, key_var)))?;
        Ok((address, private_key))
    }
}

impl SecretStore for EnvSecretStore {
    fn get_secret(&self, name: &str) -> Result<AccountSecret> {
        let (address, private_key) = self.read(name)?;
        Ok(AccountSecret {
            address: address.trim().to_string(),
            private_key: private_key.trim().to_string(),
        })
    }

    fn get_secret_list(&self, name: &str) -> Result<Vec<AccountSecret>> {
        let (addresses, keys) = self.read(name)?;
        let addresses: Vec<&str> = addresses.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        let keys: Vec<&str> = keys.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        if addresses.len() != keys.len() {
            return Err(DeployerError::Config(format!(
                "secret '{}': {} addresses but {} private keys",
                name,
                addresses.len(),
                keys.len()
            ))
            .into());
        }
        Ok(addresses
            .into_iter()
            .zip(keys)
            .map(|(address, private_key)| AccountSecret {
                address: address.to_string(),
                private_key: private_key.to_string(),
            })
            .collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SecretValue {
    One(AccountSecret),
    Many(Vec<AccountSecret>),
}

/// Secrets from a JSON file: `{ "name": {"address", "private_key"} }`.
///
/// A value may also be an array of such objects.
#[derive(Debug, Clone)]
pub struct JsonFileSecretStore {
    path: PathBuf,
    secrets: HashMap<String, SecretValue>,
}

impl JsonFileSecretStore {
    /// Reads and parses `path` once.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read secrets file {}", path.display()))?;
        let secrets = serde_json::from_str(&content)
            .map_err(|e| DeployerError::malformed(path.display().to_string(), e.to_string()))?;
        Ok(Self { path, secrets })
    }

    fn lookup(&self, name: &str) -> Result<&SecretValue> {
        self.secrets.get(name).ok_or_else(|| {
            DeployerError::Config(format!("secret '{}' not found in {}", name, self.path.display())).into()
        })
    }
}

impl SecretStore for JsonFileSecretStore {
    fn get_secret(&self, name: &str) -> Result<AccountSecret> {
        match self.lookup(name)? {
            SecretValue::One(secret) => Ok(secret.clone()),
            SecretValue::Many(list) => match list.as_slice() {
                [single] => Ok(single.clone()),
                _ => Err(DeployerError::Config(format!(
                    "secret '{}' holds {} accounts, expected one",
                    name,
                    list.len()
                ))
                .into()),
            },
        }
    }

    fn get_secret_list(&self, name: &str) -> Result<Vec<AccountSecret>> {
        match self.lookup(name)? {
            SecretValue::One(secret) => Ok(vec![secret.clone()]),
            SecretValue::Many(list) => Ok(list.clone()),
        }
    }
}

/// Secret store selected by `SECRETS_FILE`: the JSON file when set, the
/// environment otherwise.
pub fn secret_store_from_env() -> Result<Box<dyn SecretStore>> {
    match std::env::var("SECRETS_FILE") {
        Ok(path) if !path.trim().is_empty() => Ok(Box::new(JsonFileSecretStore::load(path.trim())?)),
        _ => Ok(Box::new(EnvSecretStore::new())),
    }
}
