//! Fee token helpers
//!
//! ERC20 `balanceOf` / `transfer` on the native fee token, plus conversion
//! between decimal ether strings and wei.

use anyhow::{Context, Result};
use starknet_types_core::felt::Felt;

use crate::account::{build_call, Call};
use crate::chains::StarknetClient;
use crate::crypto::{felt_to_hex, felt_to_u128};

/// Decimals of the native fee token.
pub const DECIMALS: u32 = 18;

/// Splits an amount into its Cairo `u256` limbs `(low, high)`.
pub fn u256_limbs(amount: u128) -> [Felt; 2] {
    [Felt::from(amount), Felt::ZERO]
}

/// Fee-token balance of `owner` in wei.
pub async fn balance_of(client: &StarknetClient, token: &Felt, owner: &Felt) -> Result<u128> {
    let result = client
        .call_function(token, "balanceOf", &[*owner])
        .await
        .with_context(|| format!("Failed to read balance of {}", felt_to_hex(owner)))?;
    match result.as_slice() {
        [low, high, ..] => {
            if *high != Felt::ZERO {
                anyhow::bail!("Balance of {} exceeds u128", felt_to_hex(owner));
            }
            felt_to_u128(low)
        }
        [low] => felt_to_u128(low),
        [] => anyhow::bail!("Empty balanceOf response for {}", felt_to_hex(owner)),
    }
}

/// `transfer(recipient, amount)` call on the fee token.
pub fn transfer_call(token: &Felt, recipient: &Felt, amount: u128) -> Result<Call> {
    let [low, high] = u256_limbs(amount);
    build_call(*token, "transfer", vec![*recipient, low, high])
}

/// Parses a decimal amount of ether (`"0.05"`) into wei.
pub fn parse_ether(value: &str) -> Result<u128> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (value, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        anyhow::bail!("Empty ether amount");
    }
    if fraction.len() > DECIMALS as usize {
        anyhow::bail!("Ether amount '{}' has more than {} decimals", value, DECIMALS);
    }
    let unit = 10u128.pow(DECIMALS);
    let whole: u128 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .with_context(|| format!("Invalid ether amount '{}'", value))?
    };
    let fraction_wei: u128 = if fraction.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", fraction, width = DECIMALS as usize);
        padded
            .parse()
            .with_context(|| format!("Invalid ether amount '{}'", value))?
    };
    whole
        .checked_mul(unit)
        .and_then(|w| w.checked_add(fraction_wei))
        .ok_or_else(|| anyhow::anyhow!("Ether amount '{}' overflows", value))
}

/// Formats wei as a decimal ether string without trailing zeros.
pub fn format_ether(wei: u128) -> String {
    let unit = 10u128.pow(DECIMALS);
    let whole = wei / unit;
    let fraction = wei % unit;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0>width$}", fraction, width = DECIMALS as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}
