//! Error Taxonomy
//!
//! Typed error categories that callers need to branch on. Everything else
//! travels as a plain `anyhow::Error` with context attached at the boundary.
//!
//! Callers recover the category with `err.downcast_ref::<DeployerError>()`.

use thiserror::Error;

/// Errors the deployment and ops workflows distinguish between.
#[derive(Debug, Error)]
pub enum DeployerError {
    /// Missing or invalid configuration (unknown network, missing key, empty pool).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The core singleton is not deployed on the active network.
    #[error("Core contract not deployed on network '{network}'")]
    CoreNotDeployed { network: String },

    /// A deployment referenced a class that has no declaration record.
    #[error("Class '{0}' is not declared; run the declaration phase first")]
    ClassNotDeclared(String),

    /// A funding source cannot cover a transfer.
    #[error("Insufficient balance on {address}: has {balance}, needs {required}")]
    InsufficientBalance {
        address: String,
        balance: u128,
        required: u128,
    },

    /// A receipt did not contain exactly one matching result event.
    #[error("Expected exactly one '{event}' event in transaction {transaction_hash}, found {found}")]
    EventCount {
        event: String,
        transaction_hash: String,
        found: usize,
    },

    /// Stored or received data does not have the expected shape.
    #[error("Malformed {what}: {reason}")]
    Malformed { what: String, reason: String },
}

impl DeployerError {
    /// Shorthand for a [`DeployerError::Malformed`] value.
    pub fn malformed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        DeployerError::Malformed {
            what: what.into(),
            reason: reason.into(),
        }
    }
}

/// Returns true when `err` carries the given category at any level of its chain.
pub fn is_core_not_deployed(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DeployerError>(),
            Some(DeployerError::CoreNotDeployed { .. })
        )
    })
}

/// Returns true when `err` is an insufficient-balance failure.
pub fn is_insufficient_balance(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<DeployerError>(),
            Some(DeployerError::InsufficientBalance { .. })
        )
    })
}
