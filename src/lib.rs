//! Deployment and ops library for an EVM running on Starknet
//!
//! Provides network resolution, account and relayer management, call
//! batching, cross-VM address resolution, the declare/deploy/upgrade
//! pipeline, EVM transaction submission and relayer funding.

pub mod account;
pub mod batching;
pub mod chains;
pub mod compile;
pub mod config;
pub mod core_contract;
pub mod crypto;
pub mod deployment;
pub mod error;
pub mod evm_tx;
pub mod funding;
pub mod notify;
pub mod relayer;
pub mod resolver;
pub mod secrets;
pub mod token;

// Re-export public types for convenience
pub use account::{AccountSigner, Call, LocalSigner, StarknetAccount};
pub use batching::{CallBatcher, InvokeOutcome};
pub use chains::{EvmClient, StarknetClient, TransactionStatus};
pub use compile::{CompileConfig, CompileJob, WorkerPool};
pub use config::{resolve_network, NetworkProfile, NetworkRegistry, PollPolicy};
pub use core_contract::CoreContract;
pub use deployment::{DeploymentPipeline, DeploymentPlan, DeploymentSummary};
pub use error::DeployerError;
pub use evm_tx::{EthTransactionSender, TransactionRequest};
pub use funding::{check_and_fund_relayers, AccountAddress, Funder, FundingPolicy, FundingReport};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use relayer::RelayerPool;
pub use resolver::AddressResolver;
pub use secrets::{AccountSecret, EnvSecretStore, JsonFileSecretStore, SecretStore};
