//! Per-network RPC provider: fee rates and raw transaction submission.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument};

use super::types::Network;
use crate::error::ProviderError;

/// Receipt for a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxReceipt {
    /// Network the transaction was sent to.
    pub network: Network,
    /// Transaction hash (0x-prefixed).
    pub tx_hash: String,
}

/// Access to a network's fee market and mempool.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// Current fee rate in wei per gas unit.
    async fn fee_rate(&self, network: Network) -> Result<u128, ProviderError>;

    /// Broadcast a signed raw transaction.
    async fn submit(&self, network: Network, tx: &[u8]) -> Result<TxReceipt, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<serde_json::Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// EVM JSON-RPC provider over HTTP.
#[derive(Debug)]
pub struct JsonRpcProvider {
    http: reqwest::Client,
    endpoints: HashMap<Network, String>,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    /// Create a provider with one endpoint per network.
    pub fn new(endpoints: HashMap<Network, String>, timeout: Duration) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(1500))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            endpoints,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint for a network.
    pub fn endpoint(&self, network: Network) -> Option<&str> {
        self.endpoints.get(&network).map(String::as_str)
    }

    async fn call(
        &self,
        network: Network,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let url = self
            .endpoint(network)
            .ok_or(ProviderError::NotConfigured(network))?;

        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let response = self.http.post(url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(ProviderError::ParseError(format!(
                "{} returned HTTP {}",
                method,
                response.status()
            )));
        }

        let rpc: RpcResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(format!("invalid rpc body: {}", e)))?;

        if let Some(err) = rpc.error {
            return Err(ProviderError::Rpc {
                network,
                code: err.code,
                message: err.message,
            });
        }

        rpc.result
            .ok_or_else(|| ProviderError::ParseError(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl NetworkProvider for JsonRpcProvider {
    #[instrument(skip(self), fields(network = %network))]
    async fn fee_rate(&self, network: Network) -> Result<u128, ProviderError> {
        let result = self.call(network, "eth_gasPrice", json!([])).await?;
        let hex_qty = result
            .as_str()
            .ok_or_else(|| ProviderError::ParseError("eth_gasPrice result not a string".into()))?;
        let wei = parse_quantity(hex_qty)?;
        debug!(wei, "Fetched fee rate");
        Ok(wei)
    }

    #[instrument(skip(self, tx), fields(network = %network, bytes = tx.len()))]
    async fn submit(&self, network: Network, tx: &[u8]) -> Result<TxReceipt, ProviderError> {
        let raw = format!("0x{}", hex::encode(tx));
        let result = self
            .call(network, "eth_sendRawTransaction", json!([raw]))
            .await?;
        let tx_hash = result
            .as_str()
            .ok_or_else(|| ProviderError::ParseError("tx hash not a string".into()))?
            .to_string();
        Ok(TxReceipt { network, tx_hash })
    }
}

/// Parse a JSON-RPC hex quantity ("0x1a") into an integer.
pub fn parse_quantity(value: &str) -> Result<u128, ProviderError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| ProviderError::ParseError(format!("quantity missing 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| ProviderError::ParseError(format!("bad quantity {}: {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_quantity_handles_hex() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x3b9aca00").unwrap(), 1_000_000_000);
        assert!(parse_quantity("1234").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[tokio::test]
    async fn unconfigured_network_is_an_error() {
        let provider = JsonRpcProvider::new(HashMap::new(), Duration::from_secs(1)).unwrap();
        let result = provider.fee_rate(Network::Base).await;
        assert!(matches!(result, Err(ProviderError::NotConfigured(Network::Base))));
    }
}
