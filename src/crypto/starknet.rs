//! Starknet primitives
//!
//! Felt parsing and conversions, entry point selectors and Stark-curve keys.
//! Hashing and signing come from `starknet-core`; this module only adapts
//! them to the crate's `anyhow` error style.

use anyhow::{Context, Result};
use rand::RngCore;
use starknet_core::crypto::ecdsa_sign;
use starknet_core::utils::{cairo_short_string_to_felt, get_selector_from_name};
use starknet_crypto::get_public_key;
use starknet_types_core::felt::Felt;

// ============================================================================
// FELT HELPERS
// ============================================================================

/// Parses a felt from a `0x`-prefixed hex string or a decimal string.
pub fn parse_felt(value: &str) -> Result<Felt> {
    let value = value.trim();
    if value.starts_with("0x") || value.starts_with("0X") {
        Felt::from_hex(value).map_err(|e| anyhow::anyhow!("Invalid hex felt '{}': {:?}", value, e))
    } else {
        Felt::from_dec_str(value)
            .map_err(|e| anyhow::anyhow!("Invalid decimal felt '{}': {:?}", value, e))
    }
}

/// Formats a felt as minimal `0x` hex.
pub fn felt_to_hex(value: &Felt) -> String {
    format!("{:#x}", value)
}

/// Converts a felt that must fit into 128 bits.
pub fn felt_to_u128(value: &Felt) -> Result<u128> {
    let bytes = value.to_bytes_be();
    if bytes[..16].iter().any(|b| *b != 0) {
        anyhow::bail!("Felt {} does not fit into u128", felt_to_hex(value));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&bytes[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Converts a felt that must fit into 64 bits.
pub fn felt_to_u64(value: &Felt) -> Result<u64> {
    let wide = felt_to_u128(value)?;
    u64::try_from(wide).with_context(|| format!("Felt {} does not fit into u64", felt_to_hex(value)))
}

/// Encodes an ASCII string of at most 31 characters as a felt.
pub fn short_string(value: &str) -> Result<Felt> {
    cairo_short_string_to_felt(value).with_context(|| format!("Invalid short string '{}'", value))
}

/// Entry point selector for a Cairo function name.
pub fn selector(name: &str) -> Result<Felt> {
    get_selector_from_name(name).with_context(|| format!("Invalid entry point name '{}'", name))
}

// ============================================================================
// STARK CURVE KEYS
// ============================================================================

/// Public key for a Stark private key.
pub fn stark_public_key(private_key: &Felt) -> Felt {
    get_public_key(private_key)
}

/// Signs `hash` deterministically (RFC 6979 nonce), returning `(r, s)`.
pub fn stark_sign(private_key: &Felt, hash: &Felt) -> Result<(Felt, Felt)> {
    let signature = ecdsa_sign(private_key, hash)
        .map_err(|e| anyhow::anyhow!("Failed to sign hash {}: {}", felt_to_hex(hash), e))?;
    Ok((signature.r, signature.s))
}

/// Fresh random private key below 2**248 (always inside the curve order).
pub fn random_private_key() -> Felt {
    let mut rng = rand::thread_rng();
    loop {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes[1..]);
        let key = Felt::from_bytes_be(&bytes);
        if key != Felt::ZERO {
            return key;
        }
    }
}
