//! EVM transaction submission
//!
//! Signs companion-VM transactions and wraps them into Starknet invocations
//! of the core contract's `eth_send_transaction`, sent from the signer's
//! companion account. The companion account validates the secp256k1 signature
//! itself, so the Starknet signature slot carries the EVM one.

use anyhow::{Context, Result};
use starknet_core::types::{BroadcastedInvokeTransactionV1, Event};
use starknet_types_core::felt::Felt;
use tracing::{error, info, warn};

use super::calldata::{pack_bytes, signature_felts};
use super::transaction::{FeeModel, SignedTransaction, TransactionRequest, UnsignedTransaction};
use crate::account::encode_multicall;
use crate::chains::{EvmClient, TransactionStatus};
use crate::core_contract::{CoreContract, TRANSACTION_EXECUTED_EVENT};
use crate::crypto::{felt_to_hex, felt_to_u64, selector, EvmAddress, EvmSigner, RecoverableSignature};
use crate::error::DeployerError;

/// Decoded `transaction_executed` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionExecuted {
    pub return_data: Vec<u8>,
    pub success: bool,
    pub gas_used: u64,
}

/// Result of a submission through the native ledger.
#[derive(Debug, Clone)]
pub struct EthSendOutcome {
    pub evm_transaction_hash: [u8; 32],
    pub starknet_transaction_hash: Felt,
    pub status: TransactionStatus,
    /// Present when the Starknet transaction was accepted.
    pub execution: Option<TransactionExecuted>,
}

impl EthSendOutcome {
    /// Accepted on the ledger and successful inside the EVM.
    pub fn is_success(&self) -> bool {
        self.execution.as_ref().map(|e| e.success).unwrap_or(false)
    }

    pub fn evm_transaction_hash_hex(&self) -> String {
        format!("0x{}", hex::encode(self.evm_transaction_hash))
    }
}

/// A signed payload plus the metadata needed to submit it.
#[derive(Debug, Clone)]
pub struct SignedPayload {
    pub sender: EvmAddress,
    pub nonce: u64,
    pub signing_payload: Vec<u8>,
    pub signature: RecoverableSignature,
    pub v: u64,
    pub evm_transaction_hash: [u8; 32],
}

impl SignedPayload {
    pub fn from_signed(sender: EvmAddress, signed: &SignedTransaction) -> Result<Self> {
        Ok(Self {
            sender,
            nonce: signed.transaction.nonce,
            signing_payload: signed.signing_payload()?,
            signature: signed.signature,
            v: signed.v(),
            evm_transaction_hash: signed.hash()?,
        })
    }
}

/// Builds, signs and submits companion-VM transactions.
#[derive(Debug, Clone)]
pub struct EthTransactionSender {
    core: CoreContract,
    chain_id: u64,
    max_fee: Felt,
    companion: Option<EvmClient>,
}

impl EthTransactionSender {
    /// # Arguments
    ///
    /// * `core` - Core contract the transactions are routed through
    /// * `chain_id` - Companion chain id used in signatures
    /// * `max_fee` - Max fee of the wrapping Starknet invocation
    pub fn new(core: CoreContract, chain_id: u64, max_fee: Felt) -> Self {
        Self {
            core,
            chain_id,
            max_fee,
            companion: None,
        }
    }

    /// Enables [`EthTransactionSender::send_via_companion`].
    pub fn with_companion(mut self, companion: EvmClient) -> Self {
        self.companion = Some(companion);
        self
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn core(&self) -> &CoreContract {
        &self.core
    }

    /// Starknet nonce of the companion account of `sender`.
    pub async fn nonce_of(&self, sender: &EvmAddress) -> Result<u64> {
        let companion = self.core.compute_starknet_address(sender).await?;
        let nonce = self.core.client().get_nonce(&companion).await?;
        felt_to_u64(&nonce)
    }

    /// Fills in nonce and fee fields of `request`.
    ///
    /// Without explicit fee fields the transaction becomes EIP-1559 at the
    /// core contract's current base fee with no priority fee.
    pub async fn prepare(&self, sender: &EvmAddress, request: &TransactionRequest) -> Result<UnsignedTransaction> {
        let fee = match request.fee_model() {
            Some(fee) => fee,
            None => FeeModel::FeeMarket {
                max_fee_per_gas: self.core.get_base_fee().await?,
                max_priority_fee_per_gas: 0,
                access_list: request.access_list.clone().unwrap_or_default(),
            },
        };
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.nonce_of(sender).await?,
        };
        Ok(UnsignedTransaction {
            chain_id: Some(self.chain_id),
            nonce,
            gas_limit: request.gas_limit,
            to: request.to,
            value: request.value,
            data: request.data.clone(),
            fee,
        })
    }

    /// Prepares and signs `request` with `signer`.
    pub async fn sign(&self, signer: &EvmSigner, request: &TransactionRequest) -> Result<SignedTransaction> {
        self.prepare(&signer.address(), request).await?.sign(signer)
    }

    /// Signs `request`, submits it through the native ledger and waits for
    /// the result.
    ///
    /// # Returns
    ///
    /// * `Ok(EthSendOutcome)` - Submitted; inspect `status` and `execution`
    /// * `Err(anyhow::Error)` - Signing, submission or event decoding failed
    pub async fn send(&self, signer: &EvmSigner, request: &TransactionRequest) -> Result<EthSendOutcome> {
        let signed = self.sign(signer, request).await?;
        let payload = SignedPayload::from_signed(signer.address(), &signed)?;
        self.submit(&payload).await
    }

    /// Submits an already signed payload verbatim.
    pub async fn submit(&self, payload: &SignedPayload) -> Result<EthSendOutcome> {
        let companion = self.core.compute_starknet_address(&payload.sender).await?;
        let call = self
            .core
            .eth_send_transaction_call(pack_bytes(&payload.signing_payload))?;
        let tx = BroadcastedInvokeTransactionV1 {
            sender_address: companion,
            calldata: encode_multicall(&[call]),
            max_fee: self.max_fee,
            signature: signature_felts(&payload.signature, payload.v),
            nonce: Felt::from(payload.nonce),
            is_query: false,
        };

        let client = self.core.client();
        let starknet_transaction_hash = client
            .add_invoke_transaction(tx)
            .await
            .with_context(|| format!("Failed to submit EVM transaction from {}", payload.sender))?;
        info!(
            "⏳ EVM transaction 0x{} from {} submitted as {}",
            hex::encode(payload.evm_transaction_hash),
            payload.sender,
            felt_to_hex(&starknet_transaction_hash)
        );

        let status = client.wait_for_transaction(&starknet_transaction_hash).await;
        let execution = match status.receipt() {
            Some(receipt) => Some(decode_transaction_executed(
                receipt.receipt.events(),
                &self.core.address(),
                &starknet_transaction_hash,
            )?),
            None => {
                warn!(
                    "⚠️  EVM transaction from {} not accepted: {:?}",
                    payload.sender, status
                );
                None
            }
        };
        if let Some(execution) = &execution {
            if execution.success {
                info!("✅ EVM transaction executed, gas used {}", execution.gas_used);
            } else {
                error!(
                    "❌ EVM transaction 0x{} reverted inside the EVM",
                    hex::encode(payload.evm_transaction_hash)
                );
            }
        }

        Ok(EthSendOutcome {
            evm_transaction_hash: payload.evm_transaction_hash,
            starknet_transaction_hash,
            status,
            execution,
        })
    }

    /// Sends `request` through the companion EVM RPC instead of the ledger.
    ///
    /// The nonce comes from `eth_getTransactionCount` when not set.
    ///
    /// # Returns
    ///
    /// * `Ok((tx_hash, success))` - Broadcast; `success` is false on a failed
    ///   or missing receipt
    /// * `Err(anyhow::Error)` - No companion RPC configured, or RPC failure
    pub async fn send_via_companion(
        &self,
        signer: &EvmSigner,
        request: &TransactionRequest,
    ) -> Result<(String, bool)> {
        let companion = self.companion.as_ref().ok_or_else(|| {
            DeployerError::Config("no companion RPC endpoint configured".into())
        })?;

        let mut request = request.clone();
        if request.nonce.is_none() {
            request.nonce = Some(companion.get_transaction_count(&signer.address()).await?);
        }
        let signed = self.sign(signer, &request).await?;
        let tx_hash = companion.send_raw_transaction(&signed.raw()?).await?;
        info!("⏳ EVM transaction {} broadcast via companion RPC", tx_hash);

        let success = companion.wait_for_receipt(&tx_hash).await?;
        if success {
            info!("✅ EVM transaction {} succeeded", tx_hash);
        } else {
            warn!("⚠️  EVM transaction {} failed or has no receipt", tx_hash);
        }
        Ok((tx_hash, success))
    }
}

/// Decodes the unique `transaction_executed` event emitted by `core` among
/// `events`. Layout: `[len, return_data..., success, gas_used]`.
///
/// # Returns
///
/// * `Ok(TransactionExecuted)` - Exactly one matching event
/// * `Err(anyhow::Error)` - [`DeployerError::EventCount`] for zero or several
///   matches, [`DeployerError::Malformed`] for a bad layout
pub fn decode_transaction_executed(
    events: &[Event],
    core: &Felt,
    transaction_hash: &Felt,
) -> Result<TransactionExecuted> {
    let key = selector(TRANSACTION_EXECUTED_EVENT)?;
    let matches: Vec<&[Felt]> = events
        .iter()
        .filter(|event| event.from_address == *core && event.keys.first() == Some(&key))
        .map(|event| event.data.as_slice())
        .collect();
    if matches.len() != 1 {
        return Err(DeployerError::EventCount {
            event: TRANSACTION_EXECUTED_EVENT.to_string(),
            transaction_hash: felt_to_hex(transaction_hash),
            found: matches.len(),
        }
        .into());
    }
    let data = matches[0];

    let malformed = |reason: String| DeployerError::malformed("transaction_executed event", reason);
    let len = data
        .first()
        .ok_or_else(|| malformed("empty data".into()))
        .and_then(|len| felt_to_u64(len).map_err(|e| malformed(format!("{:#}", e))))?;
    // The declared length must leave room for success and gas_used
    let len = usize::try_from(len)
        .ok()
        .filter(|len| len.checked_add(3) == Some(data.len()))
        .ok_or_else(|| malformed(format!("return data length {} does not match {} data felts", len, data.len())))?;
    let return_data = data[1..=len]
        .iter()
        .map(|felt| {
            felt_to_u64(felt)
                .ok()
                .and_then(|b| u8::try_from(b).ok())
                .ok_or_else(|| malformed(format!("return byte {} out of range", felt_to_hex(felt))))
        })
        .collect::<std::result::Result<Vec<u8>, _>>()?;
    let success = data[len + 1] != Felt::ZERO;
    let gas_used = felt_to_u64(&data[len + 2]).map_err(|e| malformed(format!("{:#}", e)))?;

    Ok(TransactionExecuted {
        return_data,
        success,
        gas_used,
    })
}
