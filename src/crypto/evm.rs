//! EVM keys and addresses
//!
//! secp256k1 signing for companion-VM transactions and 20-byte address handling.

use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use starknet_types_core::felt::Felt;

/// Keccak256 of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    Keccak256::digest(data).into()
}

// ============================================================================
// ADDRESS
// ============================================================================

/// A 20-byte address in the companion EVM address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    pub const ZERO: EvmAddress = EvmAddress([0u8; 20]);

    /// The address as a felt (for Starknet calldata).
    pub fn to_felt(&self) -> Felt {
        let mut buf = [0u8; 32];
        buf[12..].copy_from_slice(&self.0);
        Felt::from_bytes_be(&buf)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl FromStr for EvmAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let clean = s.strip_prefix("0x").unwrap_or(s);
        if clean.len() != 40 {
            anyhow::bail!("Invalid EVM address '{}': expected 40 hex characters", s);
        }
        let bytes = hex::decode(clean).with_context(|| format!("Invalid EVM address '{}'", s))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(EvmAddress(out))
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Derives the EVM address of a secp256k1 public key.
pub fn address_from_verifying_key(key: &VerifyingKey) -> EvmAddress {
    let public_key = key.to_encoded_point(false);
    // Skip the 0x04 uncompressed prefix
    let hash = keccak256(&public_key.as_bytes()[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    EvmAddress(out)
}

// ============================================================================
// SIGNER
// ============================================================================

/// Recoverable secp256k1 signature split into its wire components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    pub r: [u8; 32],
    pub s: [u8; 32],
    /// Recovery id (y parity), 0 or 1.
    pub recovery_id: u8,
}

/// Holds a secp256k1 key used to sign companion-VM transactions.
#[derive(Clone)]
pub struct EvmSigner {
    signing_key: SigningKey,
    address: EvmAddress,
}

impl EvmSigner {
    /// Creates a signer from a hex-encoded 32-byte private key.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let clean = private_key.strip_prefix("0x").unwrap_or(private_key);
        let bytes = hex::decode(clean).context("Failed to decode EVM private key hex")?;
        if bytes.len() != 32 {
            anyhow::bail!(
                "Invalid EVM private key length: expected 32 bytes, got {}",
                bytes.len()
            );
        }
        let signing_key =
            SigningKey::from_slice(&bytes).context("Invalid secp256k1 private key")?;
        let address = address_from_verifying_key(signing_key.verifying_key());
        Ok(Self {
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> EvmAddress {
        self.address
    }

    /// Signs a 32-byte prehash.
    pub fn sign_hash(&self, hash: &[u8; 32]) -> Result<RecoverableSignature> {
        let (signature, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(hash)
            .context("Failed to sign EVM transaction hash")?;
        let bytes = signature.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(RecoverableSignature {
            r,
            s,
            recovery_id: recovery_id.to_byte(),
        })
    }
}

/// Recovers the signer address of `hash` from a recoverable signature.
pub fn recover_address(hash: &[u8; 32], signature: &RecoverableSignature) -> Result<EvmAddress> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&bytes).context("Invalid secp256k1 signature")?;
    let recovery_id = RecoveryId::from_byte(signature.recovery_id)
        .ok_or_else(|| anyhow::anyhow!("Invalid recovery id {}", signature.recovery_id))?;
    let key = VerifyingKey::recover_from_prehash(hash, &sig, recovery_id)
        .context("Failed to recover signer from signature")?;
    Ok(address_from_verifying_key(&key))
}
