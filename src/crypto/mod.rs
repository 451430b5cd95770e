//! Cryptographic Operations Module
//!
//! Primitives for both address spaces:
//! - Starknet: felts, selectors and Stark-curve signing on top of `starknet-core`
//! - Companion EVM: keccak256, secp256k1 signing and address derivation
//!
//! Private keys never appear in logs; only addresses do.

pub mod evm;
pub mod starknet;

pub use evm::{keccak256, EvmAddress, EvmSigner, RecoverableSignature};
pub use starknet::{felt_to_hex, felt_to_u128, felt_to_u64, parse_felt, selector, short_string};
