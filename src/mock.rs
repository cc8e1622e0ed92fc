//! Mock collaborators for unit and integration testing.
//!
//! Every mock records the calls it receives and can be told to fail, so tests
//! can drive the finder and the orchestrator without network access.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::arbitrage::{ArbitrageOpportunity, OpportunitySource};
use crate::error::{ArbitrageError, BridgeError, DelegateError, PriceError, ProviderError};
use crate::execution::{ActionReceipt, BridgeReceipt, BridgeService, DelegateAction, ExecutionDelegate, Strategy};
use crate::network::{Network, NetworkProvider, TxReceipt};
use crate::pricing::{PriceSource, Quote, SwapReceipt, SwapRequest};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(latency) = latency {
        tokio::time::sleep(latency).await;
    }
}

/// Mock price, quote and swap source.
#[derive(Debug, Default)]
pub struct MockPriceSource {
    prices: Mutex<HashMap<(Network, String), Decimal>>,
    failing: Mutex<HashSet<Network>>,
    quote_amounts: Mutex<HashMap<Network, u128>>,
    fail_quotes: AtomicBool,
    fail_swaps: AtomicBool,
    price_calls: Mutex<Vec<Network>>,
    quotes: Mutex<Vec<(Network, SwapRequest)>>,
    swaps: Mutex<Vec<(Network, SwapRequest)>>,
}

impl MockPriceSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the USD price of an address on a network.
    pub fn set_price(&self, network: Network, address: &str, price: Decimal) {
        lock(&self.prices).insert((network, address.to_lowercase()), price);
    }

    /// Make price requests for a network fail.
    pub fn fail_network(&self, network: Network) {
        lock(&self.failing).insert(network);
    }

    /// Make price requests for a network succeed again.
    pub fn restore_network(&self, network: Network) {
        lock(&self.failing).remove(&network);
    }

    /// Fixed `amount_out` for quotes and swaps on a network. Defaults to the
    /// input amount.
    pub fn set_quote_amount(&self, network: Network, amount_out: u128) {
        lock(&self.quote_amounts).insert(network, amount_out);
    }

    /// Make every quote fail.
    pub fn fail_quotes(&self, fail: bool) {
        self.fail_quotes.store(fail, Ordering::SeqCst);
    }

    /// Make every swap fail.
    pub fn fail_swaps(&self, fail: bool) {
        self.fail_swaps.store(fail, Ordering::SeqCst);
    }

    /// Networks price requests were made for, in call order.
    pub fn price_calls(&self) -> Vec<Network> {
        lock(&self.price_calls).clone()
    }

    /// Quotes requested.
    pub fn quotes(&self) -> Vec<(Network, SwapRequest)> {
        lock(&self.quotes).clone()
    }

    /// Swaps executed.
    pub fn swaps(&self) -> Vec<(Network, SwapRequest)> {
        lock(&self.swaps).clone()
    }

    fn amount_out(&self, network: Network, amount_in: u128) -> u128 {
        lock(&self.quote_amounts).get(&network).copied().unwrap_or(amount_in)
    }
}

#[async_trait]
impl PriceSource for MockPriceSource {
    async fn prices_in_usd(
        &self,
        network: Network,
        addresses: &[String],
    ) -> Result<HashMap<String, Decimal>, PriceError> {
        lock(&self.price_calls).push(network);

        if lock(&self.failing).contains(&network) {
            return Err(PriceError::Unavailable {
                network,
                reason: "mock failure".to_string(),
            });
        }

        let prices = lock(&self.prices);
        Ok(addresses
            .iter()
            .filter_map(|address| {
                let key = address.to_lowercase();
                prices.get(&(network, key.clone())).map(|price| (key, *price))
            })
            .collect())
    }

    async fn quote(&self, network: Network, request: &SwapRequest) -> Result<Quote, PriceError> {
        lock(&self.quotes).push((network, request.clone()));

        if self.fail_quotes.load(Ordering::SeqCst) {
            return Err(PriceError::QuoteFailed {
                network,
                reason: "mock failure".to_string(),
            });
        }

        Ok(Quote {
            network,
            from_token: request.from_token.clone(),
            to_token: request.to_token.clone(),
            amount_in: request.amount,
            amount_out: self.amount_out(network, request.amount),
        })
    }

    async fn swap(
        &self,
        network: Network,
        request: &SwapRequest,
        _slippage_percent: Decimal,
    ) -> Result<SwapReceipt, PriceError> {
        if self.fail_swaps.load(Ordering::SeqCst) {
            return Err(PriceError::SwapFailed {
                network,
                reason: "mock failure".to_string(),
            });
        }

        let mut swaps = lock(&self.swaps);
        swaps.push((network, request.clone()));
        Ok(SwapReceipt {
            network,
            tx_hash: format!("0xmockswap{}", swaps.len()),
            amount_out: self.amount_out(network, request.amount),
        })
    }
}

/// Mock network provider with configurable fee rates.
#[derive(Debug, Default)]
pub struct MockNetworkProvider {
    fee_rates: Mutex<HashMap<Network, u128>>,
    failing: Mutex<HashSet<Network>>,
    fee_calls: Mutex<Vec<Network>>,
    submitted: Mutex<Vec<(Network, Vec<u8>)>>,
}

impl MockNetworkProvider {
    /// Create a provider with no fee rates; unknown networks report zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fee rate (wei per gas) of a network.
    pub fn set_fee_rate(&self, network: Network, wei: u128) {
        lock(&self.fee_rates).insert(network, wei);
    }

    /// Make fee and submit requests for a network fail.
    pub fn fail_network(&self, network: Network) {
        lock(&self.failing).insert(network);
    }

    /// Networks fee rates were requested for, in call order.
    pub fn fee_calls(&self) -> Vec<Network> {
        lock(&self.fee_calls).clone()
    }

    /// Raw transactions submitted.
    pub fn submitted(&self) -> Vec<(Network, Vec<u8>)> {
        lock(&self.submitted).clone()
    }
}

#[async_trait]
impl NetworkProvider for MockNetworkProvider {
    async fn fee_rate(&self, network: Network) -> Result<u128, ProviderError> {
        lock(&self.fee_calls).push(network);

        if lock(&self.failing).contains(&network) {
            return Err(ProviderError::Rpc {
                network,
                code: -32000,
                message: "mock failure".to_string(),
            });
        }

        Ok(lock(&self.fee_rates).get(&network).copied().unwrap_or(0))
    }

    async fn submit(&self, network: Network, tx: &[u8]) -> Result<TxReceipt, ProviderError> {
        if lock(&self.failing).contains(&network) {
            return Err(ProviderError::NotConfigured(network));
        }

        let mut submitted = lock(&self.submitted);
        submitted.push((network, tx.to_vec()));
        Ok(TxReceipt {
            network,
            tx_hash: format!("0x{}", hex::encode(tx)),
        })
    }
}

/// Mock execution delegate.
#[derive(Debug, Default)]
pub struct MockDelegate {
    fail_register: AtomicBool,
    fail_strategy: AtomicBool,
    fail_execute: AtomicBool,
    latency: Mutex<Option<Duration>>,
    registrations: AtomicUsize,
    strategies: Mutex<Vec<(String, Strategy)>>,
    actions: Mutex<Vec<(String, DelegateAction)>>,
    sequence: AtomicU64,
}

impl MockDelegate {
    /// Create a delegate that accepts everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make registration fail.
    pub fn fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    /// Make strategy definition fail.
    pub fn fail_strategy(&self, fail: bool) {
        self.fail_strategy.store(fail, Ordering::SeqCst);
    }

    /// Make action execution fail.
    pub fn fail_execute(&self, fail: bool) {
        self.fail_execute.store(fail, Ordering::SeqCst);
    }

    /// Delay every `execute` call.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Number of `register` calls.
    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    /// Strategies defined, with their agent ids.
    pub fn strategies(&self) -> Vec<(String, Strategy)> {
        lock(&self.strategies).clone()
    }

    /// Actions received, with their agent ids. Failed attempts are included.
    pub fn actions(&self) -> Vec<(String, DelegateAction)> {
        lock(&self.actions).clone()
    }
}

#[async_trait]
impl ExecutionDelegate for MockDelegate {
    async fn register(&self, name: &str, _description: &str) -> Result<String, DelegateError> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(DelegateError::RegistrationFailed("mock failure".to_string()));
        }
        Ok(format!("{}-agent", name))
    }

    async fn define_strategy(&self, agent_id: &str, strategy: &Strategy) -> Result<(), DelegateError> {
        if self.fail_strategy.load(Ordering::SeqCst) {
            return Err(DelegateError::StrategyRejected {
                agent_id: agent_id.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        lock(&self.strategies).push((agent_id.to_string(), strategy.clone()));
        Ok(())
    }

    async fn execute(&self, agent_id: &str, action: &DelegateAction) -> Result<ActionReceipt, DelegateError> {
        lock(&self.actions).push((agent_id.to_string(), action.clone()));
        let latency = *lock(&self.latency);
        simulate_latency(latency).await;

        if self.fail_execute.load(Ordering::SeqCst) {
            return Err(DelegateError::ActionFailed {
                agent_id: agent_id.to_string(),
                reason: "mock failure".to_string(),
            });
        }

        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ActionReceipt {
            reference: format!("mock-action-{}", n),
        })
    }
}

/// Arguments of one bridge call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCall {
    /// Source network.
    pub source: Network,
    /// Target network.
    pub target: Network,
    /// Token address on the source network.
    pub token_address: String,
    /// Amount, smallest unit.
    pub amount: u128,
}

/// Mock bridge service.
#[derive(Debug, Default)]
pub struct MockBridge {
    fail: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: Mutex<Vec<BridgeCall>>,
}

impl MockBridge {
    /// Create a bridge that completes every transfer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every transfer fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every transfer.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Transfers requested, failed ones included.
    pub fn calls(&self) -> Vec<BridgeCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl BridgeService for MockBridge {
    async fn bridge(
        &self,
        source: Network,
        target: Network,
        token_address: &str,
        amount: u128,
    ) -> Result<BridgeReceipt, BridgeError> {
        let transfer_id = {
            let mut calls = lock(&self.calls);
            calls.push(BridgeCall {
                source,
                target,
                token_address: token_address.to_string(),
                amount,
            });
            format!("mock-transfer-{}", calls.len())
        };
        let latency = *lock(&self.latency);
        simulate_latency(latency).await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(BridgeError::TransferFailed("mock failure".to_string()));
        }

        Ok(BridgeReceipt {
            transfer_id,
            source_network: source,
            target_network: target,
            token_address: token_address.to_string(),
            amount,
            source_tx: Some("0xmocksource".to_string()),
            destination_tx: Some("0xmockdestination".to_string()),
        })
    }
}

/// Opportunity source returning a canned list.
#[derive(Debug, Default)]
pub struct MockOpportunitySource {
    opportunities: Mutex<Vec<ArbitrageOpportunity>>,
    fail: AtomicBool,
    latency: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl MockOpportunitySource {
    /// Create a source returning `opportunities` on every scan.
    pub fn new(opportunities: Vec<ArbitrageOpportunity>) -> Self {
        Self {
            opportunities: Mutex::new(opportunities),
            ..Self::default()
        }
    }

    /// Replace the canned list.
    pub fn set_opportunities(&self, opportunities: Vec<ArbitrageOpportunity>) {
        *lock(&self.opportunities) = opportunities;
    }

    /// Make every scan fail.
    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every scan by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Number of scans requested.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OpportunitySource for MockOpportunitySource {
    async fn find_opportunities(&self) -> Result<Vec<ArbitrageOpportunity>, ArbitrageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        simulate_latency(latency).await;

        if self.fail.load(Ordering::SeqCst) {
            return Err(ArbitrageError::ScanFailed("mock failure".to_string()));
        }
        Ok(lock(&self.opportunities).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn price_source_filters_unknown_addresses() {
        let source = MockPriceSource::new();
        source.set_price(Network::Base, "0xABC", dec!(1.5));

        let prices = source
            .prices_in_usd(Network::Base, &["0xabc".to_string(), "0xdef".to_string()])
            .await
            .unwrap();

        assert_eq!(prices.len(), 1);
        assert_eq!(prices.get("0xabc"), Some(&dec!(1.5)));
        assert_eq!(source.price_calls(), vec![Network::Base]);
    }

    #[tokio::test]
    async fn failing_network_can_be_restored() {
        let source = MockPriceSource::new();
        source.fail_network(Network::Polygon);
        assert!(source.prices_in_usd(Network::Polygon, &[]).await.is_err());

        source.restore_network(Network::Polygon);
        assert!(source.prices_in_usd(Network::Polygon, &[]).await.is_ok());
    }

    #[tokio::test]
    async fn bridge_records_failed_calls() {
        let bridge = MockBridge::new();
        bridge.fail(true);

        let result = bridge.bridge(Network::Base, Network::Arbitrum, "0x1", 7).await;

        assert!(result.is_err());
        assert_eq!(bridge.calls().len(), 1);
        assert_eq!(bridge.calls()[0].amount, 7);
    }

    #[tokio::test]
    async fn provider_submit_echoes_hex() {
        let provider = MockNetworkProvider::new();
        let receipt = provider.submit(Network::Ethereum, &[0xde, 0xad]).await.unwrap();
        assert_eq!(receipt.tx_hash, "0xdead");
        assert_eq!(provider.submitted().len(), 1);
    }
}
