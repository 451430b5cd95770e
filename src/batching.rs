//! Lazy Call Batching Layer
//!
//! Accounts registered here have their invocations queued instead of sent.
//! `execute_calls` later submits each queue as one multicall, in the order the
//! calls were enqueued. Unregistered accounts always submit immediately, so the
//! batcher is an optimization callers can opt out of at any point.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use starknet_types_core::felt::Felt;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::account::{Call, StarknetAccount};
use crate::chains::TransactionStatus;
use crate::crypto::felt_to_hex;

/// What `invoke` did with a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    /// Queued at `position` (0-based) in the signer's pending queue.
    Queued { position: usize },
    /// Sent right away as a single-call transaction.
    Submitted { transaction_hash: Felt },
}

impl InvokeOutcome {
    pub fn transaction_hash(&self) -> Option<Felt> {
        match self {
            InvokeOutcome::Submitted { transaction_hash } => Some(*transaction_hash),
            InvokeOutcome::Queued { .. } => None,
        }
    }
}

/// One flushed queue.
#[derive(Debug, Clone)]
pub struct FlushedBatch {
    pub address: Felt,
    pub transaction_hash: Felt,
    pub calls: usize,
}

struct Registration {
    account: Arc<StarknetAccount>,
    queue: Vec<Call>,
}

/// Per-signer pending call queues.
#[derive(Default)]
pub struct CallBatcher {
    registrations: Arc<RwLock<HashMap<Felt, Registration>>>,
}

impl CallBatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts queueing calls of `account`. Keeps an existing queue untouched.
    pub async fn register(&self, account: Arc<StarknetAccount>) {
        let mut registrations = self.registrations.write().await;
        registrations
            .entry(account.address())
            .or_insert_with(|| Registration {
                account,
                queue: Vec::new(),
            });
    }

    pub async fn is_registered(&self, address: &Felt) -> bool {
        self.registrations.read().await.contains_key(address)
    }

    /// Calls waiting for `address`, in submission order.
    pub async fn pending(&self, address: &Felt) -> Vec<Call> {
        self.registrations
            .read()
            .await
            .get(address)
            .map(|r| r.queue.clone())
            .unwrap_or_default()
    }

    /// Queues `call` when `account` is registered, otherwise submits it.
    pub async fn invoke(&self, account: &Arc<StarknetAccount>, call: Call) -> Result<InvokeOutcome> {
        {
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(&account.address()) {
                registration.queue.push(call);
                return Ok(InvokeOutcome::Queued {
                    position: registration.queue.len() - 1,
                });
            }
        }
        let transaction_hash = account.execute(&[call]).await?;
        Ok(InvokeOutcome::Submitted { transaction_hash })
    }

    /// Flushes every non-empty queue as one multicall per account.
    ///
    /// All queues are processed even when some fail. Once a batch has been
    /// submitted its calls leave the queue; a submission error keeps them queued.
    ///
    /// # Returns
    ///
    /// * `Ok(Vec<FlushedBatch>)` - Every batch accepted
    /// * `Err(anyhow::Error)` - At least one batch failed; the message lists all of them
    pub async fn execute_calls(&self) -> Result<Vec<FlushedBatch>> {
        let snapshot: Vec<(Arc<StarknetAccount>, Vec<Call>)> = {
            let registrations = self.registrations.read().await;
            registrations
                .values()
                .filter(|r| !r.queue.is_empty())
                .map(|r| (r.account.clone(), r.queue.clone()))
                .collect()
        };

        let results = join_all(
            snapshot
                .into_iter()
                .map(|(account, calls)| async move { self.flush_one(account, calls).await }),
        )
        .await;

        let mut flushed = Vec::new();
        let mut failures = Vec::new();
        for result in results {
            match result {
                Ok(batch) => flushed.push(batch),
                Err(e) => failures.push(format!("{:#}", e)),
            }
        }
        if !failures.is_empty() {
            anyhow::bail!(
                "{} batch(es) failed to flush:\n  - {}",
                failures.len(),
                failures.join("\n  - ")
            );
        }
        Ok(flushed)
    }

    async fn flush_one(&self, account: Arc<StarknetAccount>, calls: Vec<Call>) -> Result<FlushedBatch> {
        let address = account.address();
        let count = calls.len();
        let submitted = account.execute(&calls).await;

        // Submitted calls leave the queue; anything appended meanwhile stays
        if submitted.is_ok() {
            let mut registrations = self.registrations.write().await;
            if let Some(registration) = registrations.get_mut(&address) {
                let drained = count.min(registration.queue.len());
                registration.queue.drain(..drained);
            }
        }

        let transaction_hash = submitted.map_err(|e| {
            error!("❌ Batch of {} call(s) from {} not submitted: {:#}", count, felt_to_hex(&address), e);
            e.context(format!("{}: submission failed", felt_to_hex(&address)))
        })?;

        match account.client().wait_for_transaction(&transaction_hash).await {
            TransactionStatus::Accepted(_) => {
                info!(
                    "✅ Batch of {} call(s) from {} accepted in {}",
                    count,
                    felt_to_hex(&address),
                    felt_to_hex(&transaction_hash)
                );
                Ok(FlushedBatch {
                    address,
                    transaction_hash,
                    calls: count,
                })
            }
            status => {
                error!(
                    "❌ Batch {} from {} not accepted: {:?}",
                    felt_to_hex(&transaction_hash),
                    felt_to_hex(&address),
                    status
                );
                anyhow::bail!(
                    "{}: batch {} not accepted ({:?})",
                    felt_to_hex(&address),
                    felt_to_hex(&transaction_hash),
                    status
                )
            }
        }
    }

    /// Flushes `address`'s queue and stops batching for it.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(hash))` - Pending calls were flushed in transaction `hash`
    /// * `Ok(None)` - Nothing was pending (or the address was not registered)
    /// * `Err(anyhow::Error)` - The flush failed; the address stays registered
    pub async fn unregister(&self, address: &Felt) -> Result<Option<Felt>> {
        let pending = {
            let registrations = self.registrations.read().await;
            registrations
                .get(address)
                .filter(|r| !r.queue.is_empty())
                .map(|r| (r.account.clone(), r.queue.clone()))
        };

        let flushed = match pending {
            Some((account, calls)) => Some(self.flush_one(account, calls).await?.transaction_hash),
            None => None,
        };

        self.registrations.write().await.remove(address);
        Ok(flushed)
    }
}
