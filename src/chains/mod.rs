//! Chain Clients
//!
//! JSON-RPC clients for the native ledger (Starknet) and the companion EVM.
//! Both share the request/response wrappers and error type defined here.

pub mod evm;
pub mod starknet;

pub use evm::EvmClient;
pub use starknet::{StarknetClient, TransactionStatus};

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Starknet `CONTRACT_NOT_FOUND`
pub const CONTRACT_NOT_FOUND: i64 = 20;
/// Starknet `CLASS_HASH_NOT_FOUND`
pub const CLASS_HASH_NOT_FOUND: i64 = 28;
/// Starknet `TXN_HASH_NOT_FOUND`
pub const TXN_HASH_NOT_FOUND: i64 = 29;

/// JSON-RPC request wrapper
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

/// JSON-RPC response wrapper
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Error object returned by a JSON-RPC node.
#[derive(Debug, Clone, Error)]
#[error("JSON-RPC error {code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// Returns the RPC error code carried by `err`, if any.
pub fn rpc_error_code(err: &anyhow::Error) -> Option<i64> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<RpcError>())
        .map(|e| e.code)
}

/// Builds the HTTP client shared by all chain clients.
pub(crate) fn build_http_client() -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .no_proxy() // Avoid macOS system-configuration issues in tests
        .build()
        .context("Failed to create HTTP client")
}

/// Minimal JSON-RPC 2.0 transport over HTTP POST.
#[derive(Debug, Clone)]
pub(crate) struct JsonRpcTransport {
    client: Client,
    url: String,
}

impl JsonRpcTransport {
    pub(crate) fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: build_http_client()?,
            url: url.to_string(),
        })
    }

    pub(crate) fn url(&self) -> &str {
        &self.url
    }

    /// Sends one request. A JSON-RPC error object comes back as [`RpcError`];
    /// a missing result deserializes from `null` so `Option<T>` results work.
    ///
    /// `params` is anything that serializes to the positional parameter
    /// array, such as a `json!` array or a `starknet-core` request type.
    pub(crate) async fn request<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response: JsonRpcResponse = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request to {}", method, self.url))?
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response from {}", method, self.url))?;

        if let Some(error) = response.error {
            return Err(RpcError {
                code: error.code,
                message: error.message,
            })
            .with_context(|| format!("{} failed on {}", method, self.url));
        }

        let result = response.result.unwrap_or(serde_json::Value::Null);
        serde_json::from_value(result)
            .with_context(|| format!("Unexpected {} result shape from {}", method, self.url))
    }
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(value: &str) -> Result<u64> {
    let clean = value.strip_prefix("0x").unwrap_or(value);
    u64::from_str_radix(clean, 16).with_context(|| format!("Failed to parse hex quantity '{}'", value))
}
