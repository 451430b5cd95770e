//! Companion EVM Client
//!
//! Client for the EVM JSON-RPC endpoint layered on the native ledger.
//! Only used when the endpoint is reachable; every caller has a Starknet-side
//! fallback.

use anyhow::{Context, Result};
use serde_json::json;
use tracing::debug;

use super::{parse_hex_u64, JsonRpcTransport};
use crate::config::PollPolicy;
use crate::crypto::EvmAddress;

/// Client for interacting with the companion EVM
#[derive(Debug, Clone)]
pub struct EvmClient {
    transport: JsonRpcTransport,
    poll: PollPolicy,
}

impl EvmClient {
    /// Creates a new companion EVM client
    ///
    /// # Arguments
    ///
    /// * `rpc_url` - EVM JSON-RPC endpoint
    /// * `poll` - Polling policy for `wait_for_receipt`
    ///
    /// # Returns
    ///
    /// * `Ok(EvmClient)` - Successfully created client
    /// * `Err(anyhow::Error)` - Failed to create HTTP client
    pub fn new(rpc_url: &str, poll: PollPolicy) -> Result<Self> {
        Ok(Self {
            transport: JsonRpcTransport::new(rpc_url)?,
            poll,
        })
    }

    /// `eth_chainId`
    pub async fn chain_id(&self) -> Result<u64> {
        let chain_id: String = self.transport.request("eth_chainId", json!([])).await?;
        parse_hex_u64(&chain_id)
    }

    /// Balance of `address` in wei.
    pub async fn get_balance(&self, address: &EvmAddress) -> Result<u128> {
        let balance: String = self
            .transport
            .request("eth_getBalance", json!([address.to_string(), "latest"]))
            .await?;
        let clean = balance.strip_prefix("0x").unwrap_or(&balance);
        u128::from_str_radix(clean, 16)
            .with_context(|| format!("Invalid eth_getBalance result '{}'", balance))
    }

    /// Pending transaction count of `address`.
    pub async fn get_transaction_count(&self, address: &EvmAddress) -> Result<u64> {
        let nonce: String = self
            .transport
            .request("eth_getTransactionCount", json!([address.to_string(), "pending"]))
            .await?;
        parse_hex_u64(&nonce)
    }

    /// Whether `address` holds contract code.
    pub async fn has_code(&self, address: &EvmAddress) -> Result<bool> {
        let code: String = self
            .transport
            .request("eth_getCode", json!([address.to_string(), "latest"]))
            .await?;
        let clean = code.strip_prefix("0x").unwrap_or(&code);
        Ok(!clean.is_empty() && clean.chars().any(|c| c != '0'))
    }

    /// Broadcasts a signed transaction, returning its hash.
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String> {
        self.transport
            .request(
                "eth_sendRawTransaction",
                json!([format!("0x{}", hex::encode(raw))]),
            )
            .await
            .context("eth_sendRawTransaction failed")
    }

    /// Waits for a receipt, bounded by the polling policy.
    ///
    /// Returns `Ok(true)` on status 0x1, `Ok(false)` on a failed receipt or when
    /// the budget runs out.
    pub async fn wait_for_receipt(&self, tx_hash: &str) -> Result<bool> {
        let attempts = self.poll.max_attempts();
        for attempt in 1..=attempts {
            let receipt: Option<serde_json::Value> = self
                .transport
                .request("eth_getTransactionReceipt", json!([tx_hash]))
                .await?;

            if let Some(receipt) = receipt {
                let status = receipt
                    .get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("0x0");
                return Ok(status == "0x1");
            }

            debug!("No receipt for {} yet (attempt {}/{})", tx_hash, attempt, attempts);
            if attempt < attempts {
                tokio::time::sleep(self.poll.interval).await;
            }
        }
        Ok(false)
    }
}
