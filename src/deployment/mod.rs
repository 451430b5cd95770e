//! Declaration & Deployment
//!
//! Idempotent declare/deploy/upgrade of the contract system, driven by a
//! TOML plan and recorded in per-network JSON state files.

pub mod artifacts;
pub mod declare;
pub mod deploy;
pub mod pipeline;
pub mod plan;
pub mod store;

pub use artifacts::{ArtifactStore, ContractArtifact};
pub use declare::{DeclareOutcome, Declarer};
pub use deploy::{DeployOutcome, SingletonDeployer, SingletonSpec};
pub use pipeline::{evm_signer_from_env, ContractReport, DeploymentPipeline, DeploymentSummary, ReportStatus};
pub use plan::{ArgRef, DeploymentPlan, ResolutionContext};
pub use store::{DeclarationTable, DeploymentRecord, DeploymentStore, DeploymentTable};
