//! Price and quote source contract.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PriceError;
use crate::network::Network;

/// Token-to-token swap request on one network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapRequest {
    /// Token sold.
    pub from_token: String,
    /// Token bought.
    pub to_token: String,
    /// Amount sold, in the smallest unit of `from_token`.
    pub amount: u128,
}

/// Quote for a swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Network quoted on.
    pub network: Network,
    /// Token sold.
    pub from_token: String,
    /// Token bought.
    pub to_token: String,
    /// Amount sold.
    pub amount_in: u128,
    /// Expected amount bought.
    pub amount_out: u128,
}

/// Receipt of an executed swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapReceipt {
    /// Network swapped on.
    pub network: Network,
    /// Transaction hash.
    pub tx_hash: String,
    /// Amount actually received.
    pub amount_out: u128,
}

/// Source of USD prices, quotes and swaps.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price per whole token for each address. Addresses the source does
    /// not know are omitted. Keys are lowercased.
    async fn prices_in_usd(
        &self,
        network: Network,
        addresses: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceError>;

    /// Quote a swap without executing it.
    async fn quote(&self, network: Network, request: &SwapRequest) -> Result<Quote, PriceError>;

    /// Execute a swap with a slippage tolerance in percent.
    async fn swap(
        &self,
        network: Network,
        request: &SwapRequest,
        slippage_percent: Decimal,
    ) -> Result<SwapReceipt, PriceError>;
}
