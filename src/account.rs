//! Starknet Accounts
//!
//! The capability interface callers need from an account (address + signing),
//! a local key implementation, and [`StarknetAccount`] which ties a signer to
//! a client to build, sign and submit transactions.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use starknet_core::crypto::compute_hash_on_elements;
use starknet_core::types::{BroadcastedDeclareTransactionV2, BroadcastedInvokeTransactionV1, FlattenedSierraClass};
use starknet_core::utils::{get_udc_deployed_address, UdcUniqueness};
use starknet_types_core::felt::Felt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chains::{StarknetClient, TransactionStatus};
use crate::crypto::starknet::{stark_public_key, stark_sign};
use crate::crypto::{felt_to_hex, selector};

pub use starknet_core::types::{Call, TransactionReceiptWithBlockInfo};

// ============================================================================
// CALLS
// ============================================================================

/// Builds a call from an entry point name.
pub fn build_call(to: Felt, entrypoint: &str, calldata: Vec<Felt>) -> Result<Call> {
    Ok(Call {
        to,
        selector: selector(entrypoint)?,
        calldata,
    })
}

/// `__execute__` calldata for a list of calls (Cairo 1 account layout):
/// `[n, (to, selector, len, calldata...)*]`
pub fn encode_multicall(calls: &[Call]) -> Vec<Felt> {
    let mut out = Vec::with_capacity(1 + calls.iter().map(|c| 3 + c.calldata.len()).sum::<usize>());
    out.push(Felt::from(calls.len() as u64));
    for call in calls {
        out.push(call.to);
        out.push(call.selector);
        out.push(Felt::from(call.calldata.len() as u64));
        out.extend_from_slice(&call.calldata);
    }
    out
}

// ============================================================================
// UNIVERSAL DEPLOYER
// ============================================================================

/// Universal Deployer Contract, same address on every network.
pub const UDC_ADDRESS: Felt =
    Felt::from_hex_unchecked("0x041a78e741e5af2fec34b695679bc6891742439f7afb8484ecd7766661ad02bf");

/// Builds a non-unique `deployContract` call and the address it deploys to.
pub fn udc_deploy_call(class_hash: &Felt, salt: &Felt, constructor_calldata: &[Felt]) -> Result<(Call, Felt)> {
    let address = get_udc_deployed_address(*salt, *class_hash, &UdcUniqueness::NotUnique, constructor_calldata);
    let mut calldata = vec![
        *class_hash,
        *salt,
        Felt::ZERO,
        Felt::from(constructor_calldata.len() as u64),
    ];
    calldata.extend_from_slice(constructor_calldata);
    Ok((build_call(UDC_ADDRESS, "deployContract", calldata)?, address))
}

// ============================================================================
// TRANSACTION HASHES
// ============================================================================

/// `"invoke"` as a short string.
const PREFIX_INVOKE: Felt = Felt::from_hex_unchecked("0x696e766f6b65");

/// `"declare"` as a short string.
const PREFIX_DECLARE: Felt = Felt::from_hex_unchecked("0x6465636c617265");

/// Hash an INVOKE v1 transaction is signed over.
pub fn invoke_v1_hash(tx: &BroadcastedInvokeTransactionV1, chain_id: &Felt) -> Felt {
    compute_hash_on_elements(&[
        PREFIX_INVOKE,
        Felt::ONE,
        tx.sender_address,
        Felt::ZERO,
        compute_hash_on_elements(&tx.calldata),
        tx.max_fee,
        *chain_id,
        tx.nonce,
    ])
}

/// Hash a DECLARE v2 transaction is signed over.
pub fn declare_v2_hash(tx: &BroadcastedDeclareTransactionV2, chain_id: &Felt) -> Felt {
    compute_hash_on_elements(&[
        PREFIX_DECLARE,
        Felt::TWO,
        tx.sender_address,
        Felt::ZERO,
        compute_hash_on_elements(&[tx.contract_class.class_hash()]),
        tx.max_fee,
        *chain_id,
        tx.nonce,
        tx.compiled_class_hash,
    ])
}

// ============================================================================
// SIGNER
// ============================================================================

/// Minimal capability an account exposes: who it is and how it signs.
pub trait AccountSigner: Send + Sync {
    /// On-chain address of the account.
    fn address(&self) -> Felt;

    /// Signature over a transaction hash, in the account's expected layout.
    fn sign_transaction_hash(&self, hash: &Felt) -> Result<Vec<Felt>>;
}

/// Account controlled by a Stark private key held in memory.
#[derive(Clone)]
pub struct LocalSigner {
    address: Felt,
    private_key: Felt,
}

impl LocalSigner {
    pub fn new(address: Felt, private_key: Felt) -> Self {
        Self {
            address,
            private_key,
        }
    }

    pub fn public_key(&self) -> Felt {
        stark_public_key(&self.private_key)
    }
}

impl fmt::Debug for LocalSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSigner")
            .field("address", &felt_to_hex(&self.address))
            .finish_non_exhaustive()
    }
}

impl AccountSigner for LocalSigner {
    fn address(&self) -> Felt {
        self.address
    }

    fn sign_transaction_hash(&self, hash: &Felt) -> Result<Vec<Felt>> {
        let (r, s) = stark_sign(&self.private_key, hash)?;
        Ok(vec![r, s])
    }
}

// ============================================================================
// ACCOUNT
// ============================================================================

/// A signer bound to a network.
///
/// Nonce fetch and submission are serialized per account so concurrent callers
/// never reuse a nonce.
pub struct StarknetAccount {
    client: Arc<StarknetClient>,
    signer: Arc<dyn AccountSigner>,
    chain_id: Felt,
    max_fee: Felt,
    submit_lock: Mutex<()>,
}

impl fmt::Debug for StarknetAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StarknetAccount")
            .field("address", &felt_to_hex(&self.address()))
            .field("chain_id", &felt_to_hex(&self.chain_id))
            .finish_non_exhaustive()
    }
}

impl StarknetAccount {
    pub fn new(
        client: Arc<StarknetClient>,
        signer: Arc<dyn AccountSigner>,
        chain_id: Felt,
        max_fee: Felt,
    ) -> Self {
        Self {
            client,
            signer,
            chain_id,
            max_fee,
            submit_lock: Mutex::new(()),
        }
    }

    pub fn address(&self) -> Felt {
        self.signer.address()
    }

    pub fn client(&self) -> &Arc<StarknetClient> {
        &self.client
    }

    pub fn chain_id(&self) -> Felt {
        self.chain_id
    }

    pub fn max_fee(&self) -> Felt {
        self.max_fee
    }

    /// Current (pending) nonce of the account.
    pub async fn nonce(&self) -> Result<Felt> {
        self.client.get_nonce(&self.address()).await
    }

    /// Signs and submits one INVOKE transaction carrying `calls`.
    ///
    /// # Returns
    ///
    /// * `Ok(Felt)` - Transaction hash
    /// * `Err(anyhow::Error)` - Signing or submission failed
    pub async fn execute(&self, calls: &[Call]) -> Result<Felt> {
        if calls.is_empty() {
            anyhow::bail!("Refusing to submit a transaction without calls");
        }
        let _guard = self.submit_lock.lock().await;

        let nonce = self.nonce().await?;
        let mut tx = BroadcastedInvokeTransactionV1 {
            sender_address: self.address(),
            calldata: encode_multicall(calls),
            max_fee: self.max_fee,
            signature: Vec::new(),
            nonce,
            is_query: false,
        };
        tx.signature = self
            .signer
            .sign_transaction_hash(&invoke_v1_hash(&tx, &self.chain_id))?;

        let transaction_hash = self
            .client
            .add_invoke_transaction(tx)
            .await
            .with_context(|| {
                format!("Failed to submit invoke from {}", felt_to_hex(&self.address()))
            })?;
        debug!(
            "⏳ {} call(s) from {} submitted as {} (nonce {})",
            calls.len(),
            felt_to_hex(&self.address()),
            felt_to_hex(&transaction_hash),
            felt_to_hex(&nonce)
        );
        Ok(transaction_hash)
    }

    /// Submits `calls` and polls for finality.
    ///
    /// Returns the transaction hash with its final status; a timed-out or
    /// reverted transaction is a status, not an error.
    pub async fn execute_and_wait(&self, calls: &[Call]) -> Result<(Felt, TransactionStatus)> {
        let transaction_hash = self.execute(calls).await?;
        let status = self.client.wait_for_transaction(&transaction_hash).await;
        Ok((transaction_hash, status))
    }

    /// Submits `calls` and requires them to be accepted.
    pub async fn execute_confirmed(&self, calls: &[Call]) -> Result<(Felt, TransactionReceiptWithBlockInfo)> {
        let (transaction_hash, status) = self.execute_and_wait(calls).await?;
        let receipt = status.into_receipt(&transaction_hash)?;
        Ok((transaction_hash, receipt))
    }

    /// Signs and submits a DECLARE v2 transaction.
    ///
    /// # Returns
    ///
    /// * `Ok((transaction_hash, class_hash))` - As reported by the node
    pub async fn declare(
        &self,
        contract_class: Arc<FlattenedSierraClass>,
        compiled_class_hash: &Felt,
    ) -> Result<(Felt, Felt)> {
        let class_hash = contract_class.class_hash();
        let _guard = self.submit_lock.lock().await;

        let nonce = self.nonce().await?;
        let mut tx = BroadcastedDeclareTransactionV2 {
            sender_address: self.address(),
            compiled_class_hash: *compiled_class_hash,
            max_fee: self.max_fee,
            signature: Vec::new(),
            nonce,
            contract_class,
            is_query: false,
        };
        tx.signature = self
            .signer
            .sign_transaction_hash(&declare_v2_hash(&tx, &self.chain_id))?;

        let result = self
            .client
            .add_declare_transaction(tx)
            .await
            .with_context(|| format!("Failed to declare class {}", felt_to_hex(&class_hash)))?;
        if result.class_hash != class_hash {
            anyhow::bail!(
                "Node declared class {} but {} was computed locally",
                felt_to_hex(&result.class_hash),
                felt_to_hex(&class_hash)
            );
        }
        info!(
            "⏳ Declare of {} submitted as {}",
            felt_to_hex(&class_hash),
            felt_to_hex(&result.transaction_hash)
        );
        Ok((result.transaction_hash, result.class_hash))
    }
}
