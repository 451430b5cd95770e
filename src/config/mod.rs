//! Network Configuration Registry
//!
//! Named network definitions (TOML or built-in) and the resolution of the one
//! active [`NetworkProfile`] a process works against.
//!
//! ## Selection
//!
//! 1. `STARKNET_NETWORK` names a registry entry
//! 2. `RPC_URL` points at a custom development node
//! 3. otherwise the default development network (`katana`)
//!
//! Chain identifiers are fetched once; an unreachable node degrades to the
//! `KKRT` fallback chain id instead of failing.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use starknet_types_core::felt::Felt;
use tracing::{info, warn};

use crate::chains::{EvmClient, StarknetClient};
use crate::crypto::{felt_to_hex, parse_felt};
use crate::error::DeployerError;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Network used when neither `STARKNET_NETWORK` nor `RPC_URL` is set.
pub const DEFAULT_NETWORK: &str = "katana";

/// Name given to the network built from `RPC_URL`.
pub const CUSTOM_NETWORK: &str = "custom";

/// Chain id used on both sides when the lookup fails.
pub const FALLBACK_CHAIN_ID: u64 = u32::from_be_bytes(*b"KKRT") as u64;

/// ETH fee token, same address on every public Starknet network.
pub const DEFAULT_FEE_TOKEN: &str =
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";

// ============================================================================
// POLLING
// ============================================================================

/// Finality polling policy: one query every `interval`, for at most `max_wait`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Builds a policy from decimal seconds.
    pub fn from_secs_f64(interval: f64, max_wait: f64) -> Result<Self> {
        if !(interval.is_finite() && interval > 0.0) {
            anyhow::bail!("Poll interval must be positive, got {}", interval);
        }
        if !(max_wait.is_finite() && max_wait >= 0.0) {
            anyhow::bail!("Max wait must be non-negative, got {}", max_wait);
        }
        Ok(Self::new(
            Duration::from_secs_f64(interval),
            Duration::from_secs_f64(max_wait),
        ))
    }

    /// `max_wait / interval`, at least one attempt.
    pub fn max_attempts(&self) -> u64 {
        let interval = self.interval.as_nanos().max(1);
        let attempts = (self.max_wait.as_nanos() / interval).max(1);
        u64::try_from(attempts).unwrap_or(u64::MAX)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(60))
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Operational class of a network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Production,
    Staging,
    Development,
}

/// Static relayer account entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub address: String,
    /// Inline key, only for public development accounts
    #[serde(default)]
    pub private_key: Option<String>,
    /// Environment variable holding the key
    #[serde(default)]
    pub private_key_env: Option<String>,
}

/// One named network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub rpc_url: String,
    #[serde(default)]
    pub companion_rpc_url: Option<String>,
    pub class: NetworkClass,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
    /// Derive the companion chain id modulo 2**53 instead of 2**32
    #[serde(default)]
    pub legacy_chain_id_modulus: bool,
    /// Default: `<NAME>_ACCOUNT_ADDRESS`
    #[serde(default)]
    pub account_address_env: Option<String>,
    /// Default: `<NAME>_PRIVATE_KEY`
    #[serde(default)]
    pub private_key_env: Option<String>,
    /// Prefunded account of a development node, used when the env vars are unset
    #[serde(default)]
    pub default_account_address: Option<String>,
    #[serde(default)]
    pub default_private_key: Option<String>,
    #[serde(default)]
    pub relayers: Vec<RelayerConfig>,
    #[serde(default = "default_fee_token")]
    pub fee_token_address: String,
    /// Max fee per transaction in wei (hex or decimal)
    #[serde(default = "default_max_fee")]
    pub max_fee: String,
    #[serde(default)]
    pub faucet_url: Option<String>,
}

fn default_poll_interval_secs() -> f64 {
    0.1
}

fn default_max_wait_secs() -> f64 {
    60.0
}

fn default_fee_token() -> String {
    DEFAULT_FEE_TOKEN.to_string()
}

fn default_max_fee() -> String {
    // 0.01 ETH
    "0x2386f26fc10000".to_string()
}

fn env_prefix(name: &str) -> String {
    name.to_uppercase().replace('-', "_")
}

impl NetworkConfig {
    /// Env var holding the operator account address.
    pub fn account_address_env(&self) -> String {
        self.account_address_env
            .clone()
            .unwrap_or_else(|| format!("{}_ACCOUNT_ADDRESS", env_prefix(&self.name)))
    }

    /// Env var holding the operator private key.
    pub fn private_key_env(&self) -> String {
        self.private_key_env
            .clone()
            .unwrap_or_else(|| format!("{}_PRIVATE_KEY", env_prefix(&self.name)))
    }

    /// Development network reached through `RPC_URL`.
    pub fn custom(rpc_url: &str) -> Self {
        Self {
            name: CUSTOM_NETWORK.to_string(),
            rpc_url: rpc_url.to_string(),
            companion_rpc_url: None,
            class: NetworkClass::Development,
            poll_interval_secs: default_poll_interval_secs(),
            max_wait_secs: default_max_wait_secs(),
            legacy_chain_id_modulus: false,
            account_address_env: None,
            private_key_env: None,
            default_account_address: None,
            default_private_key: None,
            relayers: Vec::new(),
            fee_token_address: default_fee_token(),
            max_fee: default_max_fee(),
            faucet_url: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Configuration error: network name must not be empty");
        }
        url::Url::parse(&self.rpc_url)
            .with_context(|| format!("Network '{}' has an invalid rpc_url", self.name))?;
        if let Some(companion) = &self.companion_rpc_url {
            url::Url::parse(companion).with_context(|| {
                format!("Network '{}' has an invalid companion_rpc_url", self.name)
            })?;
        }
        PollPolicy::from_secs_f64(self.poll_interval_secs, self.max_wait_secs)
            .with_context(|| format!("Network '{}' has an invalid polling policy", self.name))?;
        parse_felt(&self.fee_token_address)
            .with_context(|| format!("Network '{}' has an invalid fee_token_address", self.name))?;
        parse_felt(&self.max_fee)
            .with_context(|| format!("Network '{}' has an invalid max_fee", self.name))?;
        for relayer in &self.relayers {
            parse_felt(&relayer.address).with_context(|| {
                format!("Network '{}' has an invalid relayer address", self.name)
            })?;
            if relayer.private_key.is_none() && relayer.private_key_env.is_none() {
                anyhow::bail!(
                    "Configuration error: relayer {} on network '{}' has neither private_key nor private_key_env",
                    relayer.address,
                    self.name
                );
            }
        }
        Ok(())
    }
}

/// Set of named networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkRegistry {
    #[serde(rename = "network", default)]
    pub networks: Vec<NetworkConfig>,
}

impl NetworkRegistry {
    /// Loads the registry from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Optional path. If None, uses NETWORKS_CONFIG_PATH env var or `config/networks.toml`.
    ///
    /// # Returns
    ///
    /// * `Ok(NetworkRegistry)` - Loaded and validated registry (built-in registry when no file exists)
    /// * `Err(anyhow::Error)` - File unreadable, unparseable or invalid
    pub fn load_from_path(path: Option<&str>) -> Result<Self> {
        let explicit = path
            .map(|p| p.to_string())
            .or_else(|| std::env::var("NETWORKS_CONFIG_PATH").ok());
        let config_path = explicit
            .clone()
            .unwrap_or_else(|| "config/networks.toml".to_string());

        if std::path::Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path))?;
            let registry: NetworkRegistry = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path))?;
            registry.validate()?;
            Ok(registry)
        } else if explicit.is_some() {
            Err(anyhow::anyhow!(
                "Configuration file '{}' not found. Please copy the template:\n\
                cp config/networks.template.toml config/networks.toml",
                config_path
            ))
        } else {
            Ok(Self::builtin())
        }
    }

    /// Known public and local networks.
    pub fn builtin() -> Self {
        let devnet = NetworkConfig {
            name: "starknet-devnet".to_string(),
            rpc_url: "http://127.0.0.1:5050/rpc".to_string(),
            default_account_address: Some(
                "0x64b48806902a367c8598f4f95c305e8c1a1acba5f082d294a43793113115691".to_string(),
            ),
            default_private_key: Some("0x71d7bb07b9a64f6f78ac4c816aff4da9".to_string()),
            faucet_url: Some("http://127.0.0.1:5050/mint".to_string()),
            ..NetworkConfig::custom("http://127.0.0.1:5050/rpc")
        };
        let katana = NetworkConfig {
            name: "katana".to_string(),
            companion_rpc_url: Some("http://127.0.0.1:3030".to_string()),
            default_account_address: Some(
                "0xb3ff441a68610b30fd5e2abbf3a1548eb6ba6f3559f2862bf2dc757e5828ca".to_string(),
            ),
            default_private_key: Some(
                "0x2bbf4f9fd0bbb2e60b0316c1fe0b76cf7a4d0198bd493ced9b8df2a3a24d68a".to_string(),
            ),
            ..NetworkConfig::custom("http://127.0.0.1:5050")
        };
        let sepolia = NetworkConfig {
            name: "sepolia".to_string(),
            class: NetworkClass::Staging,
            poll_interval_secs: 1.0,
            max_wait_secs: 600.0,
            ..NetworkConfig::custom("https://starknet-sepolia.public.blastapi.io/rpc/v0_7")
        };
        let kakarot_sepolia = NetworkConfig {
            name: "kakarot-sepolia".to_string(),
            companion_rpc_url: Some("https://sepolia-rpc.kakarot.org".to_string()),
            legacy_chain_id_modulus: true,
            ..sepolia.clone()
        };
        let mainnet = NetworkConfig {
            name: "mainnet".to_string(),
            class: NetworkClass::Production,
            poll_interval_secs: 1.0,
            max_wait_secs: 600.0,
            ..NetworkConfig::custom("https://starknet-mainnet.public.blastapi.io/rpc/v0_7")
        };
        Self {
            networks: vec![devnet, katana, sepolia, kakarot_sepolia, mainnet],
        }
    }

    /// Validates every entry and rejects duplicate names.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for network in &self.networks {
            network.validate()?;
            if !seen.insert(network.name.as_str()) {
                anyhow::bail!(
                    "Configuration error: network '{}' is defined more than once",
                    network.name
                );
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&NetworkConfig> {
        self.networks.iter().find(|n| n.name == name)
    }
}

// ============================================================================
// PROFILE
// ============================================================================

/// Credentials of one relayer account.
#[derive(Clone, PartialEq, Eq)]
pub struct RelayerCredentials {
    pub address: Felt,
    pub private_key: Felt,
}

impl fmt::Debug for RelayerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerCredentials")
            .field("address", &felt_to_hex(&self.address))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Resolved, immutable description of the active network.
#[derive(Clone)]
pub struct NetworkProfile {
    pub name: String,
    pub rpc_url: String,
    pub companion_rpc_url: Option<String>,
    pub class: NetworkClass,
    pub poll: PollPolicy,
    pub ledger_chain_id: Felt,
    pub companion_chain_id: u64,
    pub account_address: Felt,
    pub private_key: Felt,
    pub relayers: Vec<RelayerCredentials>,
    pub fee_token_address: Felt,
    pub max_fee: Felt,
    pub faucet_url: Option<String>,
}

impl NetworkProfile {
    pub fn is_development(&self) -> bool {
        self.class == NetworkClass::Development
    }
}

impl fmt::Debug for NetworkProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkProfile")
            .field("name", &self.name)
            .field("rpc_url", &self.rpc_url)
            .field("companion_rpc_url", &self.companion_rpc_url)
            .field("class", &self.class)
            .field("poll", &self.poll)
            .field("ledger_chain_id", &felt_to_hex(&self.ledger_chain_id))
            .field("companion_chain_id", &self.companion_chain_id)
            .field("account_address", &felt_to_hex(&self.account_address))
            .field("relayers", &self.relayers)
            .finish_non_exhaustive()
    }
}

/// Companion chain id derived from the ledger chain id.
pub fn derive_companion_chain_id(ledger_chain_id: &Felt, legacy_modulus: bool) -> u64 {
    let bytes = ledger_chain_id.to_bytes_be();
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[24..]);
    let value = u64::from_be_bytes(low);
    if legacy_modulus {
        value & ((1u64 << 53) - 1)
    } else {
        value & 0xffff_ffff
    }
}

/// Probes both chain ids, degrading to [`FALLBACK_CHAIN_ID`] on failure.
pub async fn fetch_chain_ids(
    rpc_url: &str,
    companion_rpc_url: Option<&str>,
    legacy_modulus: bool,
    poll: PollPolicy,
) -> (Felt, u64) {
    let ledger = match StarknetClient::new(rpc_url, poll) {
        Ok(client) => client.chain_id().await,
        Err(e) => Err(e),
    };
    let ledger_chain_id = match ledger {
        Ok(chain_id) => chain_id,
        Err(e) => {
            warn!(
                "⚠️  Could not get chain id from {}: {:#}. Using fallback {}",
                rpc_url, e, FALLBACK_CHAIN_ID
            );
            return (Felt::from(FALLBACK_CHAIN_ID), FALLBACK_CHAIN_ID);
        }
    };

    if let Some(companion_url) = companion_rpc_url {
        if let Ok(client) = EvmClient::new(companion_url, poll) {
            match client.chain_id().await {
                Ok(chain_id) => return (ledger_chain_id, chain_id),
                Err(e) => info!(
                    "Companion RPC {} not reachable ({:#}), deriving chain id",
                    companion_url, e
                ),
            }
        }
    }

    (
        ledger_chain_id,
        derive_companion_chain_id(&ledger_chain_id, legacy_modulus),
    )
}

/// Resolves the active network from the process environment.
pub async fn resolve_network(registry: &NetworkRegistry) -> Result<NetworkProfile> {
    resolve_network_with_env(registry, |key| std::env::var(key).ok()).await
}

/// Resolves the active network, reading variables through `env`.
///
/// # Arguments
///
/// * `registry` - Named networks
/// * `env` - Variable lookup (the process environment in production)
///
/// # Returns
///
/// * `Ok(NetworkProfile)` - Fully resolved profile, chain ids set
/// * `Err(anyhow::Error)` - Unknown network or missing credentials
pub async fn resolve_network_with_env<F>(registry: &NetworkRegistry, env: F) -> Result<NetworkProfile>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    let config = if let Some(name) = non_empty("STARKNET_NETWORK") {
        registry
            .get(&name)
            .cloned()
            .ok_or_else(|| DeployerError::Config(format!("unknown network '{}'", name)))?
    } else if let Some(rpc_url) = non_empty("RPC_URL") {
        let config = NetworkConfig::custom(&rpc_url);
        config.validate()?;
        config
    } else {
        registry.get(DEFAULT_NETWORK).cloned().ok_or_else(|| {
            DeployerError::Config(format!(
                "default network '{}' missing from registry",
                DEFAULT_NETWORK
            ))
        })?
    };

    let companion_rpc_url = non_empty("COMPANION_RPC_URL").or_else(|| config.companion_rpc_url.clone());

    let poll_interval = match non_empty("POLL_INTERVAL") {
        Some(v) => v.parse::<f64>().context("POLL_INTERVAL must be a number of seconds")?,
        None => config.poll_interval_secs,
    };
    let max_wait = match non_empty("MAX_WAIT") {
        Some(v) => v.parse::<f64>().context("MAX_WAIT must be a number of seconds")?,
        None => config.max_wait_secs,
    };
    let poll = PollPolicy::from_secs_f64(poll_interval, max_wait)?;

    let account_address = non_empty(&config.account_address_env())
        .or_else(|| config.default_account_address.clone())
        .ok_or_else(|| {
            DeployerError::Config(format!(
                "environment variable '{}' not set for network '{}'",
                config.account_address_env(),
                config.name
            ))
        })?;
    let private_key = non_empty(&config.private_key_env())
        .or_else(|| config.default_private_key.clone())
        .ok_or_else(|| {
            DeployerError::Config(format!(
                "environment variable '{}' not set for network '{}'",
                config.private_key_env(),
                config.name
            ))
        })?;

    let mut relayers = Vec::with_capacity(config.relayers.len());
    for relayer in &config.relayers {
        let key = match (&relayer.private_key, &relayer.private_key_env) {
            (Some(key), _) => key.clone(),
            (None, Some(var)) => non_empty(var).ok_or_else(|| {
                DeployerError::Config(format!("environment variable '{}' not set", var))
            })?,
            (None, None) => {
                return Err(DeployerError::Config(format!(
                    "relayer {} has no private key",
                    relayer.address
                ))
                .into())
            }
        };
        relayers.push(RelayerCredentials {
            address: parse_felt(&relayer.address)?,
            private_key: parse_felt(&key).context("Invalid relayer private key")?,
        });
    }

    let (ledger_chain_id, companion_chain_id) = fetch_chain_ids(
        &config.rpc_url,
        companion_rpc_url.as_deref(),
        config.legacy_chain_id_modulus,
        poll,
    )
    .await;

    info!(
        "Resolved network '{}' ({:?}): ledger chain id {}, companion chain id {}",
        config.name,
        config.class,
        felt_to_hex(&ledger_chain_id),
        companion_chain_id
    );

    Ok(NetworkProfile {
        name: config.name.clone(),
        rpc_url: config.rpc_url.clone(),
        companion_rpc_url,
        class: config.class,
        poll,
        ledger_chain_id,
        companion_chain_id,
        account_address: parse_felt(&account_address).context("Invalid account address")?,
        private_key: parse_felt(&private_key).context("Invalid account private key")?,
        relayers,
        fee_token_address: parse_felt(&config.fee_token_address)?,
        max_fee: parse_felt(&config.max_fee)?,
        faucet_url: config.faucet_url.clone(),
    })
}
