//! Starknet Client
//!
//! JSON-RPC client for the native ledger: contract calls, class and nonce
//! queries, transaction submission, and bounded finality polling.
//!
//! Requests and responses are the `starknet-core` RPC types, so parameter
//! order and receipt shapes follow the node API exactly.

use anyhow::{Context, Result};
use starknet_core::types::requests::{
    AddDeclareTransactionRequestRef, AddInvokeTransactionRequestRef, CallRequestRef, ChainIdRequest,
    GetClassHashAtRequestRef, GetClassRequestRef, GetNonceRequestRef, GetTransactionReceiptRequestRef,
};
use starknet_core::types::{
    BlockId, BlockTag, BroadcastedDeclareTransaction, BroadcastedDeclareTransactionV2,
    BroadcastedInvokeTransaction, BroadcastedInvokeTransactionV1, DeclareTransactionResult, ExecutionResult,
    FunctionCall, InvokeTransactionResult, TransactionReceiptWithBlockInfo,
};
use starknet_types_core::felt::Felt;
use tracing::{debug, warn};

use super::{rpc_error_code, JsonRpcTransport, CLASS_HASH_NOT_FOUND, CONTRACT_NOT_FOUND, TXN_HASH_NOT_FOUND};
use crate::config::PollPolicy;
use crate::crypto::{felt_to_hex, selector};

const LATEST: BlockId = BlockId::Tag(BlockTag::Latest);
const PENDING: BlockId = BlockId::Tag(BlockTag::Pending);

// ============================================================================
// TRANSACTION STATUS
// ============================================================================

/// Outcome of finality polling. Not an error type: callers branch on it.
#[derive(Debug, Clone)]
pub enum TransactionStatus {
    /// Accepted and executed successfully.
    Accepted(TransactionReceiptWithBlockInfo),
    /// Included but reverted.
    Reverted { reason: String },
    /// Polling budget exhausted without a final receipt.
    TimedOut { attempts: u64 },
}

impl TransactionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TransactionStatus::Accepted(_))
    }

    pub fn receipt(&self) -> Option<&TransactionReceiptWithBlockInfo> {
        match self {
            TransactionStatus::Accepted(receipt) => Some(receipt),
            _ => None,
        }
    }

    /// Converts a failure status into an error, for callers that cannot continue.
    pub fn into_receipt(self, transaction_hash: &Felt) -> Result<TransactionReceiptWithBlockInfo> {
        match self {
            TransactionStatus::Accepted(receipt) => Ok(receipt),
            TransactionStatus::Reverted { reason } => anyhow::bail!(
                "Transaction {} reverted: {}",
                felt_to_hex(transaction_hash),
                reason
            ),
            TransactionStatus::TimedOut { attempts } => anyhow::bail!(
                "Transaction {} not final after {} polling attempts",
                felt_to_hex(transaction_hash),
                attempts
            ),
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Client for the Starknet JSON-RPC API.
#[derive(Debug, Clone)]
pub struct StarknetClient {
    transport: JsonRpcTransport,
    poll: PollPolicy,
}

impl StarknetClient {
    /// Creates a new client
    ///
    /// # Arguments
    ///
    /// * `rpc_url` - Starknet JSON-RPC endpoint
    /// * `poll` - Finality polling policy used by `wait_for_transaction`
    ///
    /// # Returns
    ///
    /// * `Ok(StarknetClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create HTTP client
    pub fn new(rpc_url: &str, poll: PollPolicy) -> Result<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(rpc_url)?,
            poll,
        })
    }

    pub fn rpc_url(&self) -> &str {
        self.transport.url()
    }

    pub fn poll_policy(&self) -> PollPolicy {
        self.poll
    }

    /// Chain identifier of the connected network.
    pub async fn chain_id(&self) -> Result<Felt> {
        self.transport.request("starknet_chainId", ChainIdRequest).await
    }

    /// Calls a view function by selector.
    pub async fn call(&self, contract: &Felt, selector: &Felt, calldata: &[Felt]) -> Result<Vec<Felt>> {
        let request = FunctionCall {
            contract_address: *contract,
            entry_point_selector: *selector,
            calldata: calldata.to_vec(),
        };
        self.transport
            .request(
                "starknet_call",
                CallRequestRef {
                    request: &request,
                    block_id: &LATEST,
                },
            )
            .await
    }

    /// Calls a view function by name.
    pub async fn call_function(
        &self,
        contract: &Felt,
        function: &str,
        calldata: &[Felt],
    ) -> Result<Vec<Felt>> {
        self.call(contract, &selector(function)?, calldata)
            .await
            .with_context(|| format!("Call to {} on {} failed", function, felt_to_hex(contract)))
    }

    /// Nonce of `address` including pending transactions.
    pub async fn get_nonce(&self, address: &Felt) -> Result<Felt> {
        self.transport
            .request(
                "starknet_getNonce",
                GetNonceRequestRef {
                    block_id: &PENDING,
                    contract_address: address,
                },
            )
            .await
            .with_context(|| format!("Failed to fetch nonce of {}", felt_to_hex(address)))
    }

    /// Class hash deployed at `address`, or `None` when nothing is deployed there.
    pub async fn class_hash_at(&self, address: &Felt) -> Result<Option<Felt>> {
        let result: Result<Felt> = self
            .transport
            .request(
                "starknet_getClassHashAt",
                GetClassHashAtRequestRef {
                    block_id: &LATEST,
                    contract_address: address,
                },
            )
            .await;
        match result {
            Ok(hash) => Ok(Some(hash)),
            Err(e) if rpc_error_code(&e) == Some(CONTRACT_NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Whether anything is deployed at `address`.
    pub async fn is_deployed(&self, address: &Felt) -> Result<bool> {
        Ok(self.class_hash_at(address).await?.is_some())
    }

    /// Whether `class_hash` is declared on-chain.
    pub async fn is_class_declared(&self, class_hash: &Felt) -> Result<bool> {
        // The class body is not needed, only whether the node knows it
        let result: Result<serde_json::Value> = self
            .transport
            .request(
                "starknet_getClass",
                GetClassRequestRef {
                    block_id: &LATEST,
                    class_hash,
                },
            )
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(e) if rpc_error_code(&e) == Some(CLASS_HASH_NOT_FOUND) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Submits an INVOKE v1 transaction, returning its hash.
    pub async fn add_invoke_transaction(&self, tx: BroadcastedInvokeTransactionV1) -> Result<Felt> {
        let invoke_transaction = BroadcastedInvokeTransaction::V1(tx);
        let result: InvokeTransactionResult = self
            .transport
            .request(
                "starknet_addInvokeTransaction",
                AddInvokeTransactionRequestRef {
                    invoke_transaction: &invoke_transaction,
                },
            )
            .await?;
        Ok(result.transaction_hash)
    }

    /// Submits a DECLARE v2 transaction, returning the node's answer.
    pub async fn add_declare_transaction(
        &self,
        tx: BroadcastedDeclareTransactionV2,
    ) -> Result<DeclareTransactionResult> {
        let declare_transaction = BroadcastedDeclareTransaction::V2(tx);
        self.transport
            .request(
                "starknet_addDeclareTransaction",
                AddDeclareTransactionRequestRef {
                    declare_transaction: &declare_transaction,
                },
            )
            .await
    }

    /// Receipt of `transaction_hash`, or `None` while the node does not know it.
    pub async fn get_transaction_receipt(
        &self,
        transaction_hash: &Felt,
    ) -> Result<Option<TransactionReceiptWithBlockInfo>> {
        let result: Result<TransactionReceiptWithBlockInfo> = self
            .transport
            .request(
                "starknet_getTransactionReceipt",
                GetTransactionReceiptRequestRef { transaction_hash },
            )
            .await;
        match result {
            Ok(receipt) => Ok(Some(receipt)),
            Err(e) if rpc_error_code(&e) == Some(TXN_HASH_NOT_FOUND) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Polls until `transaction_hash` is final, at most `max_attempts` times.
    ///
    /// Exhausting the budget yields [`TransactionStatus::TimedOut`], never an error.
    /// Transport errors while polling count as an attempt and are retried.
    pub async fn wait_for_transaction(&self, transaction_hash: &Felt) -> TransactionStatus {
        let attempts = self.poll.max_attempts();
        for attempt in 1..=attempts {
            match self.get_transaction_receipt(transaction_hash).await {
                Ok(Some(receipt)) => {
                    return match receipt.receipt.execution_result() {
                        ExecutionResult::Succeeded => TransactionStatus::Accepted(receipt),
                        ExecutionResult::Reverted { reason } => TransactionStatus::Reverted {
                            reason: reason.clone(),
                        },
                    };
                }
                Ok(None) => {
                    debug!(
                        "Transaction {} not final yet (attempt {}/{})",
                        felt_to_hex(transaction_hash),
                        attempt,
                        attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Polling receipt of {} failed (attempt {}/{}): {:#}",
                        felt_to_hex(transaction_hash),
                        attempt,
                        attempts,
                        e
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
        TransactionStatus::TimedOut { attempts }
    }
}
