//! Opportunity discovery across networks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use super::calculator::{calculate_opportunity, ArbitrageOpportunity, CostModel, PricePoint};
use crate::error::{ArbitrageError, PriceError, ProviderError};
use crate::metrics;
use crate::network::{Network, NetworkProvider, TrackedToken};
use crate::pricing::{PriceSource, RateLimiter};

/// Anything the orchestrator can ask for a ranked opportunity list.
#[async_trait]
pub trait OpportunitySource: Send + Sync {
    /// Ranked opportunities, best first.
    async fn find_opportunities(&self) -> Result<Vec<ArbitrageOpportunity>, ArbitrageError>;
}

/// A per-network failure recovered during a scan.
#[derive(Debug)]
pub enum ScanFailure {
    /// Price batch failed; the network had no prices this scan.
    Prices {
        /// Network affected.
        network: Network,
        /// Underlying error.
        error: PriceError,
    },
    /// Fee rate lookup failed; pairs touching the network were skipped.
    FeeRate {
        /// Network affected.
        network: Network,
        /// Underlying error.
        error: ProviderError,
    },
}

impl ScanFailure {
    /// Network the failure applies to.
    pub fn network(&self) -> Network {
        match self {
            ScanFailure::Prices { network, .. } | ScanFailure::FeeRate { network, .. } => *network,
        }
    }
}

/// Result of one scan.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Opportunities sorted by net profit percent, best first.
    pub opportunities: Vec<ArbitrageOpportunity>,
    /// Networks that could not be fully read.
    pub failures: Vec<ScanFailure>,
}

/// network -> (lowercased address -> USD price).
pub type NetworkPriceTable = HashMap<Network, HashMap<String, Decimal>>;

/// Scans tracked tokens across networks for price divergences.
pub struct OpportunityFinder {
    prices: Arc<dyn PriceSource>,
    provider: Arc<dyn NetworkProvider>,
    limiter: Arc<RateLimiter>,
    tokens: Vec<TrackedToken>,
    networks: Vec<Network>,
    costs: CostModel,
    max_trade_size: Decimal,
}

impl OpportunityFinder {
    /// Create a finder.
    pub fn new(
        prices: Arc<dyn PriceSource>,
        provider: Arc<dyn NetworkProvider>,
        limiter: Arc<RateLimiter>,
        tokens: Vec<TrackedToken>,
        networks: Vec<Network>,
        costs: CostModel,
        max_trade_size: Decimal,
    ) -> Self {
        Self {
            prices,
            provider,
            limiter,
            tokens,
            networks,
            costs,
            max_trade_size,
        }
    }

    /// Networks scanned.
    pub fn networks(&self) -> &[Network] {
        &self.networks
    }

    /// Tokens scanned.
    pub fn tokens(&self) -> &[TrackedToken] {
        &self.tokens
    }

    /// Fetch prices and rank every profitable-looking route.
    #[instrument(skip(self), fields(networks = self.networks.len(), tokens = self.tokens.len()))]
    pub async fn scan(&self) -> Result<ScanReport, ArbitrageError> {
        if self.networks.len() < 2 {
            return Err(ArbitrageError::InsufficientNetworks {
                configured: self.networks.len(),
            });
        }
        if self.tokens.is_empty() {
            return Err(ArbitrageError::NoTrackedTokens);
        }

        let start = Instant::now();
        let mut report = ScanReport::default();
        let table = self.fetch_price_table(&mut report.failures).await;

        let mut fee_rates: HashMap<Network, Option<u128>> = HashMap::new();

        for token in &self.tokens {
            let points = token_price_points(token, &self.networks, &table);
            if points.len() < 2 {
                debug!(symbol = %token.symbol, priced_on = points.len(), "Not enough prices to compare");
                continue;
            }

            for source in &points {
                for target in &points {
                    if source.network == target.network || target.price_usd <= source.price_usd {
                        continue;
                    }

                    let Some(source_fee) = self.fee_rate(source.network, &mut fee_rates, &mut report.failures).await
                    else {
                        continue;
                    };
                    let Some(target_fee) = self.fee_rate(target.network, &mut fee_rates, &mut report.failures).await
                    else {
                        continue;
                    };

                    let Some(gas_cost) =
                        self.costs
                            .gas_cost_usd(source.network, source_fee, target.network, target_fee)
                    else {
                        warn!(source = %source.network, target = %target.network, "Gas cost out of range");
                        continue;
                    };
                    let bridge_cost = self.costs.bridge_cost_usd(source.network, target.network);

                    if let Some(opp) =
                        calculate_opportunity(token, source, target, self.max_trade_size, gas_cost, bridge_cost)
                    {
                        debug!(
                            id = %opp.id,
                            diff_pct = %opp.price_difference_percent.round_dp(4),
                            net_profit_usd = %opp.net_profit_usd.round_dp(2),
                            "Candidate opportunity"
                        );
                        report.opportunities.push(opp);
                    }
                }
            }
        }

        // Stable sort keeps scan order for ties.
        report
            .opportunities
            .sort_by(|a, b| b.net_profit_percent.cmp(&a.net_profit_percent));

        metrics::record_scan_latency(start);
        metrics::inc_scans();
        metrics::add_opportunities_detected(report.opportunities.len());

        match report.opportunities.first() {
            Some(best) => info!(
                found = report.opportunities.len(),
                failures = report.failures.len(),
                best = %best.id,
                net_profit_pct = %best.net_profit_percent.round_dp(4),
                "Scan complete"
            ),
            None => info!(failures = report.failures.len(), "Scan complete, no opportunities"),
        }

        Ok(report)
    }

    async fn fetch_price_table(&self, failures: &mut Vec<ScanFailure>) -> NetworkPriceTable {
        let mut table = NetworkPriceTable::new();

        for &network in &self.networks {
            let addresses: Vec<String> = self
                .tokens
                .iter()
                .filter_map(|t| t.address_on(network).map(str::to_lowercase))
                .collect();
            if addresses.is_empty() {
                continue;
            }

            self.limiter.acquire().await;

            match self.prices.prices_in_usd(network, &addresses).await {
                Ok(prices) => {
                    debug!(network = %network, priced = prices.len(), "Fetched prices");
                    table.insert(network, prices);
                }
                Err(error) => {
                    warn!(network = %network, error = %error, "Price fetch failed, skipping network this scan");
                    metrics::inc_price_fetch_failures(network);
                    failures.push(ScanFailure::Prices { network, error });
                }
            }
        }

        table
    }

    async fn fee_rate(
        &self,
        network: Network,
        cache: &mut HashMap<Network, Option<u128>>,
        failures: &mut Vec<ScanFailure>,
    ) -> Option<u128> {
        if let Some(cached) = cache.get(&network) {
            return *cached;
        }

        let rate = match self.provider.fee_rate(network).await {
            Ok(rate) => Some(rate),
            Err(error) => {
                warn!(network = %network, error = %error, "Fee rate unavailable, skipping routes");
                failures.push(ScanFailure::FeeRate { network, error });
                None
            }
        };
        cache.insert(network, rate);
        rate
    }
}

/// Price points for a token on every network where it has both an address and
/// a positive price, in network order.
fn token_price_points(token: &TrackedToken, networks: &[Network], table: &NetworkPriceTable) -> Vec<PricePoint> {
    networks
        .iter()
        .filter_map(|&network| {
            let address = token.address_on(network)?;
            let price = *table.get(&network)?.get(&address.to_lowercase())?;
            (price > Decimal::ZERO).then(|| PricePoint {
                network,
                address: address.to_string(),
                price_usd: price,
            })
        })
        .collect()
}

#[async_trait]
impl OpportunitySource for OpportunityFinder {
    async fn find_opportunities(&self) -> Result<Vec<ArbitrageOpportunity>, ArbitrageError> {
        self.scan().await.map(|report| report.opportunities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockNetworkProvider, MockPriceSource};
    use rust_decimal_macros::dec;

    const USDC_ARB: &str = "0xaf88d065e77c8cc2239327c5edb3a432268e5831";
    const USDC_BASE: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const USDC_OP: &str = "0x0b2c639c533813f4aa9d7837caf62653d097ff85";

    fn usdc() -> TrackedToken {
        TrackedToken::new("USDC", 6)
            .with_address(Network::Arbitrum, USDC_ARB)
            .with_address(Network::Base, USDC_BASE)
            .with_address(Network::Optimism, USDC_OP)
    }

    fn finder(prices: Arc<MockPriceSource>, provider: Arc<MockNetworkProvider>, networks: Vec<Network>) -> OpportunityFinder {
        OpportunityFinder::new(
            prices,
            provider,
            Arc::new(RateLimiter::unlimited()),
            vec![usdc()],
            networks,
            CostModel::new(dec!(0)),
            dec!(1000),
        )
    }

    fn three_networks() -> Vec<Network> {
        vec![Network::Arbitrum, Network::Base, Network::Optimism]
    }

    #[tokio::test]
    async fn ranks_by_net_profit_percent() {
        let prices = Arc::new(MockPriceSource::new());
        prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
        prices.set_price(Network::Base, USDC_BASE, dec!(1.02));
        prices.set_price(Network::Optimism, USDC_OP, dec!(1.01));

        let report = finder(prices, Arc::new(MockNetworkProvider::new()), three_networks())
            .scan()
            .await
            .unwrap();

        let ids: Vec<&str> = report.opportunities.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(ids[0], "usdc-arbitrum-base");
        assert!(report
            .opportunities
            .windows(2)
            .all(|w| w[0].net_profit_percent >= w[1].net_profit_percent));
        assert!(report
            .opportunities
            .iter()
            .all(|o| o.target_price_usd > o.source_price_usd));
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn identical_prices_yield_nothing() {
        let prices = Arc::new(MockPriceSource::new());
        for (network, address) in [
            (Network::Arbitrum, USDC_ARB),
            (Network::Base, USDC_BASE),
            (Network::Optimism, USDC_OP),
        ] {
            prices.set_price(network, address, dec!(1.00));
        }

        let report = finder(prices, Arc::new(MockNetworkProvider::new()), three_networks())
            .scan()
            .await
            .unwrap();

        assert!(report.opportunities.is_empty());
    }

    #[tokio::test]
    async fn failed_network_is_skipped_not_fatal() {
        let prices = Arc::new(MockPriceSource::new());
        prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
        prices.set_price(Network::Base, USDC_BASE, dec!(1.05));
        prices.set_price(Network::Optimism, USDC_OP, dec!(1.02));
        prices.fail_network(Network::Base);

        let report = finder(prices.clone(), Arc::new(MockNetworkProvider::new()), three_networks())
            .scan()
            .await
            .unwrap();

        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.opportunities[0].id, "usdc-arbitrum-optimism");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].network(), Network::Base);
        assert_eq!(prices.price_calls().len(), 3);
    }

    #[tokio::test]
    async fn fee_failure_skips_routes_through_network() {
        let prices = Arc::new(MockPriceSource::new());
        prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
        prices.set_price(Network::Base, USDC_BASE, dec!(1.05));
        prices.set_price(Network::Optimism, USDC_OP, dec!(1.02));
        let provider = Arc::new(MockNetworkProvider::new());
        provider.fail_network(Network::Base);

        let report = finder(prices, provider.clone(), three_networks()).scan().await.unwrap();

        assert_eq!(report.opportunities.len(), 1);
        assert_eq!(report.opportunities[0].id, "usdc-arbitrum-optimism");
        assert!(matches!(report.failures[0], ScanFailure::FeeRate { network: Network::Base, .. }));
        // Failed lookups are cached for the rest of the scan.
        let base_calls = provider.fee_calls().iter().filter(|n| **n == Network::Base).count();
        assert_eq!(base_calls, 1);
    }

    #[tokio::test]
    async fn two_percent_route_with_fixed_costs() {
        let prices = Arc::new(MockPriceSource::new());
        prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
        prices.set_price(Network::Base, USDC_BASE, dec!(1.02));
        let provider = Arc::new(MockNetworkProvider::new());
        provider.set_fee_rate(Network::Arbitrum, 10_000_000_000);
        provider.set_fee_rate(Network::Base, 12_500_000_000);

        let costs = CostModel::new(dec!(10))
            .with_native_price(Network::Arbitrum, dec!(1000))
            .with_native_price(Network::Base, dec!(1000))
            .with_bridge_cost(Network::Arbitrum, Network::Base, dec!(5));
        let finder = OpportunityFinder::new(
            prices,
            provider,
            Arc::new(RateLimiter::unlimited()),
            vec![usdc()],
            vec![Network::Arbitrum, Network::Base],
            costs,
            dec!(1000),
        );

        let opps = finder.find_opportunities().await.unwrap();

        assert_eq!(opps.len(), 1);
        let opp = &opps[0];
        assert_eq!(opp.price_difference_percent, dec!(2));
        assert_eq!(opp.estimated_gross_profit_usd, dec!(20));
        assert_eq!(opp.estimated_gas_cost_usd, dec!(5));
        assert_eq!(opp.estimated_bridge_cost_usd, dec!(5));
        assert_eq!(opp.net_profit_usd, dec!(10));
        assert_eq!(opp.net_profit_percent, dec!(1));
    }

    #[tokio::test]
    async fn single_network_is_an_error() {
        let result = finder(
            Arc::new(MockPriceSource::new()),
            Arc::new(MockNetworkProvider::new()),
            vec![Network::Base],
        )
        .scan()
        .await;

        assert!(matches!(result, Err(ArbitrageError::InsufficientNetworks { configured: 1 })));
    }

    #[tokio::test(start_paused = true)]
    async fn per_network_fetches_are_spaced_by_the_limiter() {
        let prices = Arc::new(MockPriceSource::new());
        prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
        prices.set_price(Network::Base, USDC_BASE, dec!(1.02));
        prices.set_price(Network::Optimism, USDC_OP, dec!(1.01));
        let finder = OpportunityFinder::new(
            prices.clone(),
            Arc::new(MockNetworkProvider::new()),
            Arc::new(RateLimiter::new(std::time::Duration::from_millis(500))),
            vec![usdc()],
            three_networks(),
            CostModel::new(dec!(0)),
            dec!(1000),
        );

        let start = tokio::time::Instant::now();
        let report = finder.scan().await.unwrap();

        assert!(start.elapsed() >= std::time::Duration::from_secs(1));
        assert_eq!(prices.price_calls(), three_networks());
        assert_eq!(report.opportunities.len(), 3);
    }
}
