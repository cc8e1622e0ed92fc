//! Dry-run collaborators that log instead of moving funds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::info;

use super::bridge::{BridgeReceipt, BridgeService};
use super::delegate::{ActionReceipt, DelegateAction, ExecutionDelegate, Strategy};
use crate::error::{BridgeError, DelegateError, PriceError};
use crate::network::Network;
use crate::pricing::{PriceSource, Quote, SwapReceipt, SwapRequest};

/// Delegate that accepts every request.
#[derive(Debug, Default)]
pub struct SimulatedDelegate {
    sequence: AtomicU64,
}

impl SimulatedDelegate {
    /// Create a simulated delegate.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", prefix, n)
    }
}

#[async_trait]
impl ExecutionDelegate for SimulatedDelegate {
    async fn register(&self, name: &str, _description: &str) -> Result<String, DelegateError> {
        let id = self.next_id("sim-agent");
        info!(agent_id = %id, name = %name, "[DRY RUN] Agent registered");
        Ok(id)
    }

    async fn define_strategy(&self, agent_id: &str, strategy: &Strategy) -> Result<(), DelegateError> {
        info!(
            agent_id = %agent_id,
            pairs = strategy.token_pairs.len(),
            min_profit = %strategy.min_profit_threshold,
            "[DRY RUN] Strategy defined"
        );
        Ok(())
    }

    async fn execute(&self, agent_id: &str, action: &DelegateAction) -> Result<ActionReceipt, DelegateError> {
        let reference = self.next_id("sim-action");
        info!(agent_id = %agent_id, reference = %reference, action = ?action, "[DRY RUN] Would execute action");
        Ok(ActionReceipt { reference })
    }
}

/// Bridge that reports immediate completion.
#[derive(Debug, Default)]
pub struct SimulatedBridge {
    sequence: AtomicU64,
}

impl SimulatedBridge {
    /// Create a simulated bridge.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BridgeService for SimulatedBridge {
    async fn bridge(
        &self,
        source: Network,
        target: Network,
        token_address: &str,
        amount: u128,
    ) -> Result<BridgeReceipt, BridgeError> {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let transfer_id = format!("sim-transfer-{}", n);
        info!(
            transfer_id = %transfer_id,
            source = %source,
            target = %target,
            token = %token_address,
            amount = amount,
            "[DRY RUN] Would bridge tokens"
        );

        Ok(BridgeReceipt {
            transfer_id,
            source_network: source,
            target_network: target,
            token_address: token_address.to_string(),
            amount,
            source_tx: None,
            destination_tx: None,
        })
    }
}

/// Price source that reads live prices and quotes but never swaps.
pub struct DryRunPriceSource {
    inner: Arc<dyn PriceSource>,
}

impl DryRunPriceSource {
    /// Wrap a live source.
    pub fn new(inner: Arc<dyn PriceSource>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PriceSource for DryRunPriceSource {
    async fn prices_in_usd(
        &self,
        network: Network,
        addresses: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceError> {
        self.inner.prices_in_usd(network, addresses).await
    }

    async fn quote(&self, network: Network, request: &SwapRequest) -> Result<Quote, PriceError> {
        self.inner.quote(network, request).await
    }

    async fn swap(
        &self,
        network: Network,
        request: &SwapRequest,
        slippage_percent: Decimal,
    ) -> Result<SwapReceipt, PriceError> {
        let quote = self.inner.quote(network, request).await?;
        info!(
            network = %network,
            from = %request.from_token,
            to = %request.to_token,
            amount_in = request.amount,
            expected_out = quote.amount_out,
            slippage_pct = %slippage_percent,
            "[DRY RUN] Would swap"
        );

        Ok(SwapReceipt {
            network,
            tx_hash: "dry-run".to_string(),
            amount_out: quote.amount_out,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPriceSource;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn simulated_delegate_issues_distinct_ids() {
        let delegate = SimulatedDelegate::new();
        let agent = delegate.register("bot", "test").await.unwrap();
        let action = DelegateAction::CrossChainArbitrage {
            source_network: Network::Base,
            target_network: Network::Arbitrum,
            source_token: "0x1".to_string(),
            target_token: "0x2".to_string(),
            amount: 10,
        };
        let receipt = delegate.execute(&agent, &action).await.unwrap();

        assert_eq!(agent, "sim-agent-1");
        assert_eq!(receipt.reference, "sim-action-2");
    }

    #[tokio::test]
    async fn simulated_bridge_echoes_request() {
        let bridge = SimulatedBridge::new();
        let receipt = bridge
            .bridge(Network::Base, Network::Polygon, "0xabc", 500)
            .await
            .unwrap();

        assert_eq!(receipt.source_network, Network::Base);
        assert_eq!(receipt.target_network, Network::Polygon);
        assert_eq!(receipt.amount, 500);
        assert_eq!(receipt.transfer_id, "sim-transfer-1");
    }

    #[tokio::test]
    async fn dry_run_swap_uses_quote_and_never_swaps() {
        let inner = Arc::new(MockPriceSource::new());
        inner.set_quote_amount(Network::Base, 995);
        let source = DryRunPriceSource::new(inner.clone());

        let request = SwapRequest {
            from_token: "0x1".to_string(),
            to_token: "0x2".to_string(),
            amount: 1000,
        };
        let receipt = source.swap(Network::Base, &request, dec!(1)).await.unwrap();

        assert_eq!(receipt.amount_out, 995);
        assert_eq!(receipt.tx_hash, "dry-run");
        assert!(inner.swaps().is_empty());
    }
}
