//! HTTP client for the swap aggregator gateway.
//!
//! The gateway exposes one path prefix per chain id:
//!
//! ```text
//! GET  /v1/{chain_id}/prices?tokens=0xa,0xb      -> {"prices": {"0xa": "1.0001"}}
//! GET  /v1/{chain_id}/quote?src=..&dst=..&amount=.. -> {"amount_out": "998877"}
//! POST /v1/{chain_id}/swap                        -> {"tx_hash": "0x..", "amount_out": "998001"}
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::source::{PriceSource, Quote, SwapReceipt, SwapRequest};
use crate::error::PriceError;
use crate::network::Network;

#[derive(Debug, Deserialize)]
struct PricesResponse {
    prices: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    amount_out: String,
}

#[derive(Debug, Serialize)]
struct SwapBody<'a> {
    src: &'a str,
    dst: &'a str,
    amount: String,
    slippage: String,
}

#[derive(Debug, Deserialize)]
struct SwapResponse {
    tx_hash: Option<String>,
    amount_out: Option<String>,
    error: Option<String>,
}

/// Aggregator gateway client.
#[derive(Debug, Clone)]
pub struct HttpPriceSource {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpPriceSource {
    /// Create a client for the gateway at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PriceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_millis(1500))
            .tcp_nodelay(true)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Gateway base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, network: Network, path: &str) -> String {
        format!("{}/v1/{}/{}", self.base_url, network.chain_id(), path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

/// Map a throttled response into a typed error.
fn rate_limited(response: &reqwest::Response) -> PriceError {
    let retry_after_seconds = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    PriceError::RateLimited { retry_after_seconds }
}

fn parse_amount(value: &str, what: &str) -> Result<u128, PriceError> {
    value
        .parse::<u128>()
        .map_err(|e| PriceError::ParseError(format!("invalid {} {}: {}", what, value, e)))
}

#[async_trait]
impl PriceSource for HttpPriceSource {
    #[instrument(skip(self, addresses), fields(network = %network, tokens = addresses.len()))]
    async fn prices_in_usd(
        &self,
        network: Network,
        addresses: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceError> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let response = self
            .authorize(self.http.get(self.url(network, "prices")))
            .query(&[("tokens", addresses.join(","))])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limited(&response));
        }

        if !response.status().is_success() {
            return Err(PriceError::Unavailable {
                network,
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: PricesResponse = response
            .json()
            .await
            .map_err(|e| PriceError::ParseError(format!("failed to parse prices: {}", e)))?;

        let mut prices = HashMap::with_capacity(body.prices.len());
        for (address, raw) in body.prices {
            match raw.parse::<Decimal>() {
                Ok(price) if price > Decimal::ZERO => {
                    prices.insert(address.to_lowercase(), price);
                }
                Ok(_) => debug!(address = %address, "Ignoring non-positive price"),
                Err(e) => warn!(address = %address, raw = %raw, error = %e, "Unparseable price"),
            }
        }

        debug!(count = prices.len(), "Fetched USD prices");
        Ok(prices)
    }

    #[instrument(skip(self, request), fields(network = %network, amount = request.amount))]
    async fn quote(&self, network: Network, request: &SwapRequest) -> Result<Quote, PriceError> {
        let response = self
            .authorize(self.http.get(self.url(network, "quote")))
            .query(&[
                ("src", request.from_token.clone()),
                ("dst", request.to_token.clone()),
                ("amount", request.amount.to_string()),
            ])
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(rate_limited(&response));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PriceError::QuoteFailed {
                network,
                reason: format!("HTTP {} - {}", status, body),
            });
        }

        let body: QuoteResponse = response
            .json()
            .await
            .map_err(|e| PriceError::ParseError(format!("failed to parse quote: {}", e)))?;

        Ok(Quote {
            network,
            from_token: request.from_token.clone(),
            to_token: request.to_token.clone(),
            amount_in: request.amount,
            amount_out: parse_amount(&body.amount_out, "amount_out")?,
        })
    }

    #[instrument(skip(self, request), fields(network = %network, amount = request.amount))]
    async fn swap(
        &self,
        network: Network,
        request: &SwapRequest,
        slippage_percent: Decimal,
    ) -> Result<SwapReceipt, PriceError> {
        let body = SwapBody {
            src: &request.from_token,
            dst: &request.to_token,
            amount: request.amount.to_string(),
            slippage: slippage_percent.to_string(),
        };

        let response = self
            .authorize(self.http.post(self.url(network, "swap")))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(PriceError::SwapFailed {
                network,
                reason: format!("HTTP {} - {}", status, text),
            });
        }

        let result: SwapResponse = response
            .json()
            .await
            .map_err(|e| PriceError::ParseError(format!("failed to parse swap: {}", e)))?;

        swap_receipt(network, result)
    }
}

fn swap_receipt(network: Network, response: SwapResponse) -> Result<SwapReceipt, PriceError> {
    if let Some(error) = response.error {
        return Err(PriceError::SwapFailed { network, reason: error });
    }

    let tx_hash = response.tx_hash.ok_or_else(|| PriceError::SwapFailed {
        network,
        reason: "no transaction hash in response".to_string(),
    })?;
    let raw = response
        .amount_out
        .ok_or_else(|| PriceError::ParseError("swap response missing amount_out".to_string()))?;

    Ok(SwapReceipt {
        network,
        tx_hash,
        amount_out: parse_amount(&raw, "amount_out")?,
    })
}
