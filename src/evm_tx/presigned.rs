//! Pre-signed transaction replays
//!
//! Raw legacy transactions signed without a chain id (for example the
//! keyless deployment of a well-known factory). They are valid on every chain,
//! so the original bytes are replayed as-is.

use anyhow::{Context, Result};

use super::rlp::RlpItem;
use super::sender::SignedPayload;
use super::transaction::{create_address, FeeModel, UnsignedTransaction};
use crate::crypto::evm::recover_address;
use crate::crypto::{keccak256, EvmAddress, RecoverableSignature};
use crate::error::DeployerError;

/// A decoded pre-EIP-155 legacy transaction.
#[derive(Debug, Clone)]
pub struct PresignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: RecoverableSignature,
    pub v: u64,
    pub sender: EvmAddress,
    pub hash: [u8; 32],
}

fn word(item: &RlpItem, field: &str) -> Result<[u8; 32]> {
    let bytes = item.as_bytes()?;
    if bytes.len() > 32 {
        return Err(DeployerError::malformed(
            "pre-signed transaction",
            format!("{} longer than 32 bytes", field),
        )
        .into());
    }
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(bytes);
    Ok(out)
}

impl PresignedTransaction {
    /// Decodes a raw signed transaction and recovers its sender.
    ///
    /// # Returns
    ///
    /// * `Ok(PresignedTransaction)` - Valid pre-EIP-155 transaction
    /// * `Err(anyhow::Error)` - Not RLP, not a 9-field legacy transaction,
    ///   carries a chain id, or the signature does not recover
    pub fn decode(raw: &[u8]) -> Result<Self> {
        let malformed = |reason: String| DeployerError::malformed("pre-signed transaction", reason);

        let item = RlpItem::decode(raw).context("Pre-signed transaction is not valid RLP")?;
        let fields = item.as_list().context("Pre-signed transaction is not a legacy transaction")?;
        if fields.len() != 9 {
            return Err(malformed(format!("expected 9 fields, found {}", fields.len())).into());
        }

        let v = fields[6].as_u64()?;
        if v != 27 && v != 28 {
            return Err(malformed(format!("v = {} carries a chain id or is invalid", v)).into());
        }
        let to = match fields[3].as_bytes()? {
            [] => None,
            bytes if bytes.len() == 20 => {
                let mut address = [0u8; 20];
                address.copy_from_slice(bytes);
                Some(EvmAddress(address))
            }
            bytes => return Err(malformed(format!("recipient of {} bytes", bytes.len())).into()),
        };

        let transaction = UnsignedTransaction {
            chain_id: None,
            nonce: fields[0].as_u64()?,
            gas_limit: fields[2].as_u64()?,
            to,
            value: fields[4].as_u128()?,
            data: fields[5].as_bytes()?.to_vec(),
            fee: FeeModel::Legacy {
                gas_price: fields[1].as_u128()?,
            },
        };
        let signature = RecoverableSignature {
            r: word(&fields[7], "r")?,
            s: word(&fields[8], "s")?,
            recovery_id: (v - 27) as u8,
        };
        let sender = recover_address(&transaction.signing_hash()?, &signature)
            .context("Failed to recover pre-signed transaction sender")?;

        Ok(Self {
            transaction,
            signature,
            v,
            sender,
            hash: keccak256(raw),
        })
    }

    /// Decodes a `0x`-prefixed hex string.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let clean = raw.trim().strip_prefix("0x").unwrap_or(raw.trim());
        let bytes = hex::decode(clean).context("Pre-signed transaction is not valid hex")?;
        Self::decode(&bytes)
    }

    /// Address the transaction deploys to, `None` for plain calls.
    pub fn creation_address(&self) -> Option<EvmAddress> {
        match self.transaction.to {
            None => Some(create_address(&self.sender, self.transaction.nonce)),
            Some(_) => None,
        }
    }

    /// Original signing payload and signature, ready for submission.
    pub fn payload(&self) -> Result<SignedPayload> {
        Ok(SignedPayload {
            sender: self.sender,
            nonce: self.transaction.nonce,
            signing_payload: self.transaction.signing_payload()?,
            signature: self.signature,
            v: self.v,
            evm_transaction_hash: self.hash,
        })
    }
}
