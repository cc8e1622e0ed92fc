//! Bridge service: moves tokens between networks and waits for attestation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::error::BridgeError;
use crate::network::Network;

/// Receipt of a confirmed bridge transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeReceipt {
    /// Bridge-side transfer identifier.
    pub transfer_id: String,
    /// Network the tokens left.
    pub source_network: Network,
    /// Network the tokens arrived on.
    pub target_network: Network,
    /// Token address on the source network.
    pub token_address: String,
    /// Amount moved, smallest unit.
    pub amount: u128,
    /// Source-chain transaction, when reported.
    pub source_tx: Option<String>,
    /// Destination-chain transaction, when reported.
    pub destination_tx: Option<String>,
}

/// Cross-network token transfer.
#[async_trait]
pub trait BridgeService: Send + Sync {
    /// Move `amount` of `token_address` from `source` to `target` and return
    /// once the transfer is confirmed on the target network.
    async fn bridge(
        &self,
        source: Network,
        target: Network,
        token_address: &str,
        amount: u128,
    ) -> Result<BridgeReceipt, BridgeError>;
}

/// Transfer status reported by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TransferStatus {
    /// Submitted on the source network.
    Pending,
    /// Guardians signed; redemption pending.
    Attested,
    /// Redeemed on the target network.
    Completed,
    /// Relay gave up.
    Failed,
}

impl TransferStatus {
    /// Check if status is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

#[derive(Debug, Serialize)]
struct TransferBody<'a> {
    source_chain_id: u64,
    target_chain_id: u64,
    token: &'a str,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct TransferCreated {
    transfer_id: String,
    source_tx: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransferState {
    status: String,
    destination_tx: Option<String>,
    error: Option<String>,
}

/// REST client for the bridge relay.
#[derive(Debug, Clone)]
pub struct HttpBridge {
    http: reqwest::Client,
    base_url: String,
    confirmation_timeout: Duration,
    poll_interval: Duration,
}

impl HttpBridge {
    /// Create a relay client.
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        confirmation_timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_millis(1500))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            confirmation_timeout,
            poll_interval,
        })
    }

    async fn start_transfer(
        &self,
        source: Network,
        target: Network,
        token_address: &str,
        amount: u128,
    ) -> Result<TransferCreated, BridgeError> {
        let url = format!("{}/v1/transfers", self.base_url);
        let body = TransferBody {
            source_chain_id: source.chain_id(),
            target_chain_id: target.chain_id(),
            token: token_address,
            amount: amount.to_string(),
        };

        let response = self.http.post(&url).json(&body).send().await?;

        if response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
            return Err(BridgeError::UnsupportedRoute {
                source_network: source,
                target_network: target,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::TransferFailed(format!("HTTP {} - {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| BridgeError::TransferFailed(format!("failed to parse response: {}", e)))
    }

    async fn transfer_state(&self, transfer_id: &str) -> Result<TransferState, BridgeError> {
        let url = format!("{}/v1/transfers/{}", self.base_url, transfer_id);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(BridgeError::TransferFailed(format!(
                "status request returned HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| BridgeError::TransferFailed(format!("failed to parse status: {}", e)))
    }

    /// Poll until the transfer is terminal or the confirmation timeout elapses.
    #[instrument(skip(self), fields(transfer_id = %transfer_id))]
    async fn wait_for_confirmation(&self, transfer_id: &str) -> Result<Option<String>, BridgeError> {
        let start = Instant::now();

        loop {
            if start.elapsed() >= self.confirmation_timeout {
                warn!("Bridge attestation timed out");
                return Err(BridgeError::AttestationTimeout {
                    transfer_id: transfer_id.to_string(),
                    waited_seconds: start.elapsed().as_secs(),
                });
            }

            match self.transfer_state(transfer_id).await {
                Ok(state) => match state.status.parse::<TransferStatus>() {
                    Ok(TransferStatus::Completed) => return Ok(state.destination_tx),
                    Ok(TransferStatus::Failed) => {
                        return Err(BridgeError::TransferFailed(
                            state.error.unwrap_or_else(|| "relay reported failure".to_string()),
                        ));
                    }
                    Ok(status) => debug!(status = %status, "Transfer not final yet"),
                    Err(_) => warn!(status = %state.status, "Unknown transfer status"),
                },
                Err(e) => {
                    warn!(error = %e, "Error getting transfer status");
                }
            }

            sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl BridgeService for HttpBridge {
    #[instrument(skip(self), fields(source = %source, target = %target))]
    async fn bridge(
        &self,
        source: Network,
        target: Network,
        token_address: &str,
        amount: u128,
    ) -> Result<BridgeReceipt, BridgeError> {
        let created = self.start_transfer(source, target, token_address, amount).await?;
        info!(
            transfer_id = %created.transfer_id,
            source_tx = ?created.source_tx,
            "Bridge transfer started, waiting for attestation"
        );

        let destination_tx = self.wait_for_confirmation(&created.transfer_id).await?;
        info!(
            transfer_id = %created.transfer_id,
            destination_tx = ?destination_tx,
            "Bridge transfer completed"
        );

        Ok(BridgeReceipt {
            transfer_id: created.transfer_id,
            source_network: source,
            target_network: target,
            token_address: token_address.to_string(),
            amount,
            source_tx: created.source_tx,
            destination_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_status_parsing() {
        assert_eq!("completed".parse::<TransferStatus>().unwrap(), TransferStatus::Completed);
        assert_eq!("ATTESTED".parse::<TransferStatus>().unwrap(), TransferStatus::Attested);
        assert!("unknown".parse::<TransferStatus>().is_err());
    }

    #[test]
    fn terminal_statuses() {
        assert!(TransferStatus::Completed.is_terminal());
        assert!(TransferStatus::Failed.is_terminal());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(!TransferStatus::Attested.is_terminal());
    }

    #[tokio::test]
    async fn zero_timeout_fails_with_attestation_timeout() {
        let bridge = HttpBridge::new(
            "http://127.0.0.1:1",
            Duration::from_millis(50),
            Duration::ZERO,
            Duration::from_millis(10),
        )
        .unwrap();

        let result = bridge.wait_for_confirmation("transfer-1").await;
        assert!(matches!(
            result,
            Err(BridgeError::AttestationTimeout { ref transfer_id, .. }) if transfer_id == "transfer-1"
        ));
    }
}
