//! EVM transaction model
//!
//! Fee-model selection, signing payloads for the three envelope kinds
//! (legacy, EIP-2930, EIP-1559) and their signed encodings.

use anyhow::Result;

use super::rlp::{trim_be, RlpItem};
use crate::crypto::{keccak256, EvmAddress, EvmSigner, RecoverableSignature};
use crate::error::DeployerError;

/// One EIP-2930 access list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessListItem {
    pub address: EvmAddress,
    pub storage_keys: Vec<[u8; 32]>,
}

fn encode_access_list(items: &[AccessListItem]) -> RlpItem {
    RlpItem::List(
        items
            .iter()
            .map(|item| {
                RlpItem::List(vec![
                    RlpItem::bytes(item.address.as_bytes()),
                    RlpItem::List(item.storage_keys.iter().map(|k| RlpItem::bytes(k)).collect()),
                ])
            })
            .collect(),
    )
}

/// Fee fields of a transaction. The variant determines the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeeModel {
    Legacy {
        gas_price: u128,
    },
    AccessList {
        gas_price: u128,
        access_list: Vec<AccessListItem>,
    },
    FeeMarket {
        max_fee_per_gas: u128,
        max_priority_fee_per_gas: u128,
        access_list: Vec<AccessListItem>,
    },
}

impl FeeModel {
    /// EIP-2718 type byte; `None` for legacy.
    pub fn type_byte(&self) -> Option<u8> {
        match self {
            FeeModel::Legacy { .. } => None,
            FeeModel::AccessList { .. } => Some(0x01),
            FeeModel::FeeMarket { .. } => Some(0x02),
        }
    }
}

/// What a caller wants sent. Unset fields are filled in by the sender.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRequest {
    /// `None` creates a contract.
    pub to: Option<EvmAddress>,
    pub value: u128,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub nonce: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub access_list: Option<Vec<AccessListItem>>,
}

impl TransactionRequest {
    /// Picks the envelope from the fee fields that are set.
    ///
    /// `max_fee_per_gas` selects EIP-1559, an access list with a gas price
    /// selects EIP-2930, a bare gas price selects legacy. `None` when neither
    /// gas price is set; the caller then falls back to EIP-1559 at the base fee,
    /// keeping any access list.
    pub fn fee_model(&self) -> Option<FeeModel> {
        let access_list = self.access_list.clone();
        if let Some(max_fee_per_gas) = self.max_fee_per_gas {
            return Some(FeeModel::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas: self.max_priority_fee_per_gas.unwrap_or(0),
                access_list: access_list.unwrap_or_default(),
            });
        }
        match (self.gas_price, access_list) {
            (Some(gas_price), Some(access_list)) => Some(FeeModel::AccessList {
                gas_price,
                access_list,
            }),
            (Some(gas_price), None) => Some(FeeModel::Legacy { gas_price }),
            (None, _) => None,
        }
    }
}

/// A fully specified transaction, ready to sign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// `None` only for pre-EIP-155 legacy transactions.
    pub chain_id: Option<u64>,
    pub nonce: u64,
    pub gas_limit: u64,
    pub to: Option<EvmAddress>,
    pub value: u128,
    pub data: Vec<u8>,
    pub fee: FeeModel,
}

impl UnsignedTransaction {
    fn to_item(&self) -> RlpItem {
        match &self.to {
            Some(address) => RlpItem::bytes(address.as_bytes()),
            None => RlpItem::Bytes(Vec::new()),
        }
    }

    fn typed_chain_id(&self) -> Result<u64> {
        self.chain_id.ok_or_else(|| {
            DeployerError::malformed("EVM transaction", "typed transactions require a chain id").into()
        })
    }

    /// Fields shared by the signing payload and the signed encoding.
    fn fields(&self) -> Result<Vec<RlpItem>> {
        let common = |items: &mut Vec<RlpItem>| {
            items.push(RlpItem::uint(self.gas_limit as u128));
            items.push(self.to_item());
            items.push(RlpItem::uint(self.value));
            items.push(RlpItem::bytes(&self.data));
        };
        let mut items = Vec::with_capacity(12);
        match &self.fee {
            FeeModel::Legacy { gas_price } => {
                items.push(RlpItem::uint(self.nonce as u128));
                items.push(RlpItem::uint(*gas_price));
                common(&mut items);
            }
            FeeModel::AccessList {
                gas_price,
                access_list,
            } => {
                items.push(RlpItem::uint(self.typed_chain_id()? as u128));
                items.push(RlpItem::uint(self.nonce as u128));
                items.push(RlpItem::uint(*gas_price));
                common(&mut items);
                items.push(encode_access_list(access_list));
            }
            FeeModel::FeeMarket {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                access_list,
            } => {
                items.push(RlpItem::uint(self.typed_chain_id()? as u128));
                items.push(RlpItem::uint(self.nonce as u128));
                items.push(RlpItem::uint(*max_priority_fee_per_gas));
                items.push(RlpItem::uint(*max_fee_per_gas));
                common(&mut items);
                items.push(encode_access_list(access_list));
            }
        }
        Ok(items)
    }

    fn envelope(&self, items: Vec<RlpItem>) -> Vec<u8> {
        let body = RlpItem::List(items).encode();
        match self.fee.type_byte() {
            Some(type_byte) => {
                let mut out = Vec::with_capacity(body.len() + 1);
                out.push(type_byte);
                out.extend(body);
                out
            }
            None => body,
        }
    }

    /// Bytes whose keccak hash is signed.
    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        let mut items = self.fields()?;
        if let (FeeModel::Legacy { .. }, Some(chain_id)) = (&self.fee, self.chain_id) {
            items.push(RlpItem::uint(chain_id as u128));
            items.push(RlpItem::uint(0));
            items.push(RlpItem::uint(0));
        }
        Ok(self.envelope(items))
    }

    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        Ok(keccak256(&self.signing_payload()?))
    }

    /// The `v` value carried on the wire for a given recovery id.
    ///
    /// Legacy: `27 + id` without chain id, `id + 2 * chain_id + 35` with one.
    /// Typed: the y parity itself.
    pub fn v_for(&self, recovery_id: u8) -> u64 {
        match (&self.fee, self.chain_id) {
            (FeeModel::Legacy { .. }, Some(chain_id)) => recovery_id as u64 + chain_id * 2 + 35,
            (FeeModel::Legacy { .. }, None) => 27 + recovery_id as u64,
            _ => recovery_id as u64,
        }
    }

    pub fn sign(self, signer: &EvmSigner) -> Result<SignedTransaction> {
        let hash = self.signing_hash()?;
        let signature = signer.sign_hash(&hash)?;
        Ok(SignedTransaction {
            transaction: self,
            signature,
        })
    }
}

/// A transaction with its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub transaction: UnsignedTransaction,
    pub signature: RecoverableSignature,
}

impl SignedTransaction {
    pub fn v(&self) -> u64 {
        self.transaction.v_for(self.signature.recovery_id)
    }

    /// Broadcastable encoding.
    pub fn raw(&self) -> Result<Vec<u8>> {
        let mut items = self.transaction.fields()?;
        items.push(RlpItem::uint(self.v() as u128));
        items.push(RlpItem::Bytes(trim_be(&self.signature.r)));
        items.push(RlpItem::Bytes(trim_be(&self.signature.s)));
        Ok(self.transaction.envelope(items))
    }

    /// Transaction hash as seen by the companion VM.
    pub fn hash(&self) -> Result<[u8; 32]> {
        Ok(keccak256(&self.raw()?))
    }

    pub fn signing_payload(&self) -> Result<Vec<u8>> {
        self.transaction.signing_payload()
    }
}

/// Address of a contract created by `sender` at `nonce`:
/// `keccak(rlp([sender, nonce]))[12..]`.
pub fn create_address(sender: &EvmAddress, nonce: u64) -> EvmAddress {
    let encoded = RlpItem::List(vec![
        RlpItem::bytes(sender.as_bytes()),
        RlpItem::uint(nonce as u128),
    ])
    .encode();
    let hash = keccak256(&encoded);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    EvmAddress(out)
}
