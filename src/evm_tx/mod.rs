//! EVM Transaction Construction & Submission
//!
//! Builds and signs companion-VM transactions, encodes them for the core
//! contract and submits them through the signer's companion account.

pub mod calldata;
pub mod presigned;
pub mod rlp;
pub mod sender;
pub mod transaction;

pub use calldata::{pack_bytes, signature_felts, unpack_bytes};
pub use presigned::PresignedTransaction;
pub use rlp::RlpItem;
pub use sender::{
    decode_transaction_executed, EthSendOutcome, EthTransactionSender, SignedPayload,
    TransactionExecuted,
};
pub use transaction::{
    create_address, AccessListItem, FeeModel, SignedTransaction, TransactionRequest,
    UnsignedTransaction,
};
