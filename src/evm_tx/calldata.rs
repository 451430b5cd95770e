//! Starknet calldata for EVM transactions
//!
//! The core contract takes the signing payload as felts holding 31 bytes
//! each, prefixed by the byte length, and the signature as u128 limbs.

use anyhow::Result;
use starknet_types_core::felt::Felt;

use crate::crypto::RecoverableSignature;
use crate::error::DeployerError;

/// Bytes carried by one packed felt.
pub const BYTES_PER_FELT: usize = 31;

/// Right-aligns at most 31 big-endian bytes into a felt.
fn chunk_to_felt(chunk: &[u8]) -> Felt {
    let mut buf = [0u8; 32];
    buf[32 - chunk.len()..].copy_from_slice(chunk);
    Felt::from_bytes_be(&buf)
}

/// `[byte_len, chunk_0, chunk_1, ...]`, each chunk a big-endian value of up to
/// 31 bytes. The final chunk holds the remainder only.
pub fn pack_bytes(data: &[u8]) -> Vec<Felt> {
    let mut out = Vec::with_capacity(1 + data.len().div_ceil(BYTES_PER_FELT));
    out.push(Felt::from(data.len() as u64));
    out.extend(data.chunks(BYTES_PER_FELT).map(chunk_to_felt));
    out
}

/// Inverse of [`pack_bytes`].
pub fn unpack_bytes(packed: &[Felt]) -> Result<Vec<u8>> {
    let (len, chunks) = packed
        .split_first()
        .ok_or_else(|| DeployerError::malformed("packed bytes", "missing length prefix"))?;
    let len = crate::crypto::felt_to_u64(len)? as usize;
    if chunks.len() != len.div_ceil(BYTES_PER_FELT) {
        return Err(DeployerError::malformed(
            "packed bytes",
            format!("{} chunk(s) cannot hold {} bytes", chunks.len(), len),
        )
        .into());
    }

    let mut out = Vec::with_capacity(len);
    for (i, chunk) in chunks.iter().enumerate() {
        let width = (len - i * BYTES_PER_FELT).min(BYTES_PER_FELT);
        let bytes = chunk.to_bytes_be();
        if bytes[..32 - width].iter().any(|&b| b != 0) {
            return Err(DeployerError::malformed(
                "packed bytes",
                format!("chunk {} wider than {} bytes", i, width),
            )
            .into());
        }
        out.extend_from_slice(&bytes[32 - width..]);
    }
    Ok(out)
}

fn split_u256(word: &[u8; 32]) -> (Felt, Felt) {
    (chunk_to_felt(&word[16..]), chunk_to_felt(&word[..16]))
}

/// `[r.low, r.high, s.low, s.high, v]`
pub fn signature_felts(signature: &RecoverableSignature, v: u64) -> Vec<Felt> {
    let (r_low, r_high) = split_u256(&signature.r);
    let (s_low, s_high) = split_u256(&signature.s);
    vec![r_low, r_high, s_low, s_high, Felt::from(v)]
}
