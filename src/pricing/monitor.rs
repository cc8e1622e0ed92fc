//! Rolling price cache with change notifications.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use super::source::PriceSource;
use crate::error::PriceError;
use crate::metrics;
use crate::network::{Network, TrackedToken};

/// Latest observed price for one (symbol, network).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceEntry {
    /// Token symbol.
    pub symbol: String,
    /// Network observed on.
    pub network: Network,
    /// USD price.
    pub price: Decimal,
    /// When the price was observed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Notification emitted when a price moves past the threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceChange {
    /// Token symbol.
    pub symbol: String,
    /// Network observed on.
    pub network: Network,
    /// Price before the update.
    pub previous: Decimal,
    /// Price after the update.
    pub current: Decimal,
    /// Signed change in percent.
    pub change_percent: Decimal,
}

/// Outcome of one refresh pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Entries written.
    pub updated: usize,
    /// Changes past the threshold.
    pub changes: Vec<PriceChange>,
    /// Networks whose fetch failed.
    pub failures: Vec<PriceError>,
}

/// Maintains the latest price per (symbol, network).
pub struct PriceMonitor {
    source: Arc<dyn PriceSource>,
    limiter: Arc<RateLimiter>,
    tokens: Vec<TrackedToken>,
    networks: Vec<Network>,
    threshold_percent: Decimal,
    cache: DashMap<(String, Network), PriceEntry>,
    changes_tx: broadcast::Sender<PriceChange>,
}

impl PriceMonitor {
    /// Create a monitor. `threshold_percent` is the absolute move that triggers
    /// a notification.
    pub fn new(
        source: Arc<dyn PriceSource>,
        limiter: Arc<RateLimiter>,
        tokens: Vec<TrackedToken>,
        networks: Vec<Network>,
        threshold_percent: Decimal,
    ) -> Self {
        let (changes_tx, _) = broadcast::channel(256);
        Self {
            source,
            limiter,
            tokens,
            networks,
            threshold_percent,
            cache: DashMap::new(),
            changes_tx,
        }
    }

    /// Subscribe to price change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PriceChange> {
        self.changes_tx.subscribe()
    }

    /// Latest price for a symbol on a network.
    pub fn latest_price(&self, symbol: &str, network: Network) -> Option<Decimal> {
        self.cache
            .get(&(symbol.to_string(), network))
            .map(|entry| entry.price)
    }

    /// Every cached entry, ordered by symbol then network.
    pub fn all_prices(&self) -> Vec<PriceEntry> {
        let mut entries: Vec<PriceEntry> =
            self.cache.iter().map(|entry| entry.value().clone()).collect();
        entries.sort_by(|a, b| a.symbol.cmp(&b.symbol).then(a.network.cmp(&b.network)));
        entries
    }

    /// Overwrite the entry for (symbol, network) and return the change if it
    /// moved past the threshold. Subscribers are notified of that change.
    pub fn record(&self, symbol: &str, network: Network, price: Decimal) -> Option<PriceChange> {
        let entry = PriceEntry {
            symbol: symbol.to_string(),
            network,
            price,
            updated_at: OffsetDateTime::now_utc(),
        };
        let previous = self
            .cache
            .insert((symbol.to_string(), network), entry)
            .map(|old| old.price)?;

        if previous <= Decimal::ZERO {
            return None;
        }

        let change_percent = (price - previous) / previous * Decimal::ONE_HUNDRED;
        if change_percent.abs() <= self.threshold_percent {
            return None;
        }

        let change = PriceChange {
            symbol: symbol.to_string(),
            network,
            previous,
            current: price,
            change_percent,
        };

        info!(
            symbol = %symbol,
            network = %network,
            previous = %previous,
            current = %price,
            change_pct = %change_percent.round_dp(4),
            "Price moved past threshold"
        );
        metrics::inc_price_changes();

        // No subscribers is fine.
        let _ = self.changes_tx.send(change.clone());
        Some(change)
    }

    /// Fetch fresh prices for every network and update the cache.
    pub async fn refresh(&self) -> RefreshReport {
        let mut report = RefreshReport::default();

        for &network in &self.networks {
            let tracked: Vec<(&str, String)> = self
                .tokens
                .iter()
                .filter_map(|t| {
                    t.address_on(network)
                        .map(|addr| (t.symbol.as_str(), addr.to_lowercase()))
                })
                .collect();
            if tracked.is_empty() {
                continue;
            }

            let addresses: Vec<String> = tracked.iter().map(|(_, a)| a.clone()).collect();
            self.limiter.acquire().await;

            let prices = match self.source.prices_in_usd(network, &addresses).await {
                Ok(prices) => prices,
                Err(e) => {
                    warn!(network = %network, error = %e, "Price monitor fetch failed");
                    metrics::inc_price_fetch_failures(network);
                    report.failures.push(e);
                    continue;
                }
            };

            for (symbol, address) in tracked {
                if let Some(&price) = prices.get(&address) {
                    report.updated += 1;
                    if let Some(change) = self.record(symbol, network, price) {
                        report.changes.push(change);
                    }
                }
            }
        }

        debug!(
            updated = report.updated,
            changes = report.changes.len(),
            failures = report.failures.len(),
            "Price monitor refreshed"
        );
        report
    }

    /// Run `refresh` on a fixed interval until `shutdown` flips to true.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(period_s = period.as_secs(), "Price monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Price monitor stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPriceSource;
    use rust_decimal_macros::dec;

    const USDC_BASE: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
    const USDC_ARB: &str = "0xaf88d065e77c8cc2239327c5edb3a432268e5831";

    fn usdc() -> TrackedToken {
        TrackedToken::new("USDC", 6)
            .with_address(Network::Base, USDC_BASE)
            .with_address(Network::Arbitrum, USDC_ARB)
    }

    fn monitor(source: Arc<MockPriceSource>) -> PriceMonitor {
        PriceMonitor::new(
            source,
            Arc::new(RateLimiter::unlimited()),
            vec![usdc()],
            vec![Network::Base, Network::Arbitrum],
            dec!(1),
        )
    }

    #[test]
    fn first_observation_emits_nothing() {
        let monitor = monitor(Arc::new(MockPriceSource::new()));
        assert!(monitor.record("USDC", Network::Base, dec!(1.00)).is_none());
        assert_eq!(monitor.latest_price("USDC", Network::Base), Some(dec!(1.00)));
        assert_eq!(monitor.latest_price("USDC", Network::Arbitrum), None);
    }

    #[test]
    fn small_moves_overwrite_silently() {
        let monitor = monitor(Arc::new(MockPriceSource::new()));
        monitor.record("USDC", Network::Base, dec!(1.00));
        assert!(monitor.record("USDC", Network::Base, dec!(1.005)).is_none());
        assert_eq!(monitor.latest_price("USDC", Network::Base), Some(dec!(1.005)));
    }

    #[test]
    fn exactly_threshold_is_not_a_change() {
        let monitor = monitor(Arc::new(MockPriceSource::new()));
        monitor.record("USDC", Network::Base, dec!(1.00));
        assert!(monitor.record("USDC", Network::Base, dec!(1.01)).is_none());
    }

    #[tokio::test]
    async fn large_moves_notify_subscribers() {
        let monitor = monitor(Arc::new(MockPriceSource::new()));
        let mut rx = monitor.subscribe();

        monitor.record("USDC", Network::Base, dec!(1.00));
        let change = monitor.record("USDC", Network::Base, dec!(0.97)).unwrap();

        assert_eq!(change.previous, dec!(1.00));
        assert_eq!(change.current, dec!(0.97));
        assert_eq!(change.change_percent, dec!(-3));
        assert_eq!(rx.recv().await.unwrap(), change);
    }

    #[tokio::test]
    async fn refresh_survives_network_failure() {
        let source = Arc::new(MockPriceSource::new());
        source.set_price(Network::Arbitrum, USDC_ARB, dec!(1.001));
        source.fail_network(Network::Base);
        let monitor = monitor(source);

        let report = monitor.refresh().await;

        assert_eq!(report.updated, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(monitor.latest_price("USDC", Network::Arbitrum), Some(dec!(1.001)));
        assert_eq!(monitor.all_prices().len(), 1);
    }

    #[tokio::test]
    async fn refresh_reports_changes_between_passes() {
        let source = Arc::new(MockPriceSource::new());
        source.set_price(Network::Base, USDC_BASE, dec!(1.00));
        let monitor = monitor(source.clone());

        assert!(monitor.refresh().await.changes.is_empty());

        source.set_price(Network::Base, USDC_BASE, dec!(1.05));
        let report = monitor.refresh().await;
        assert_eq!(report.changes.len(), 1);
        assert_eq!(report.changes[0].change_percent, dec!(5));
    }
}
