//! Profit and cost calculations for cross-network opportunities.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use time::OffsetDateTime;

use crate::network::{Network, TrackedToken};

/// Gas units charged for the token approval on the source network.
pub const APPROVE_GAS_UNITS: u64 = 50_000;
/// Gas units charged for one swap.
pub const SWAP_GAS_UNITS: u64 = 200_000;

const WEI_DECIMALS: u32 = 18;

/// Typical relay fees in USD per route.
static BRIDGE_COSTS: Lazy<HashMap<(Network, Network), Decimal>> = Lazy::new(|| {
    use Network::*;

    let l1_to_l2 = Decimal::new(15, 0);
    let l2_to_l1 = Decimal::new(25, 0);
    let l2_to_l2 = Decimal::new(3, 0);

    let mut table = HashMap::new();
    for l2 in [Arbitrum, Optimism, Base] {
        table.insert((Ethereum, l2), l1_to_l2);
        table.insert((l2, Ethereum), l2_to_l1);
        for other in [Arbitrum, Optimism, Base] {
            if other != l2 {
                table.insert((l2, other), l2_to_l2);
            }
        }
        table.insert((l2, Polygon), Decimal::new(5, 0));
        table.insert((Polygon, l2), Decimal::new(5, 0));
    }
    table.insert((Ethereum, Polygon), Decimal::new(20, 0));
    table.insert((Polygon, Ethereum), Decimal::new(30, 0));
    table
});

/// Gas and bridge cost estimation.
#[derive(Debug, Clone)]
pub struct CostModel {
    bridge_costs: HashMap<(Network, Network), Decimal>,
    fallback_bridge_cost: Decimal,
    native_prices: HashMap<Network, Decimal>,
}

impl CostModel {
    /// Model using the built-in bridge table and reference native prices.
    pub fn new(fallback_bridge_cost: Decimal) -> Self {
        Self {
            bridge_costs: BRIDGE_COSTS.clone(),
            fallback_bridge_cost,
            native_prices: HashMap::new(),
        }
    }

    /// Override the bridge cost of one route.
    pub fn with_bridge_cost(mut self, source: Network, target: Network, cost: Decimal) -> Self {
        self.bridge_costs.insert((source, target), cost);
        self
    }

    /// Override the native asset USD price of a network.
    pub fn with_native_price(mut self, network: Network, price: Decimal) -> Self {
        self.native_prices.insert(network, price);
        self
    }

    /// Native asset USD price used for gas conversion.
    pub fn native_price(&self, network: Network) -> Decimal {
        self.native_prices
            .get(&network)
            .copied()
            .unwrap_or_else(|| network.reference_native_price_usd())
    }

    /// Bridge cost in USD for a route, or the fallback when the route is unknown.
    pub fn bridge_cost_usd(&self, source: Network, target: Network) -> Decimal {
        self.bridge_costs
            .get(&(source, target))
            .copied()
            .unwrap_or(self.fallback_bridge_cost)
    }

    /// Gas cost in USD of approve + swap on the source and a swap on the target.
    ///
    /// Fee rates are in wei per gas unit. Returns `None` if the fee is too large
    /// to represent.
    pub fn gas_cost_usd(
        &self,
        source: Network,
        source_fee_rate: u128,
        target: Network,
        target_fee_rate: u128,
    ) -> Option<Decimal> {
        let source_cost = self.leg_cost_usd(source, source_fee_rate, APPROVE_GAS_UNITS + SWAP_GAS_UNITS)?;
        let target_cost = self.leg_cost_usd(target, target_fee_rate, SWAP_GAS_UNITS)?;
        source_cost.checked_add(target_cost)
    }

    fn leg_cost_usd(&self, network: Network, fee_rate: u128, gas_units: u64) -> Option<Decimal> {
        let wei = fee_rate.checked_mul(u128::from(gas_units))?;
        let native = Decimal::try_from_i128_with_scale(i128::try_from(wei).ok()?, WEI_DECIMALS).ok()?;
        native.checked_mul(self.native_price(network))
    }
}

/// A token's price on one network.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    /// Network observed on.
    pub network: Network,
    /// Token address on that network.
    pub address: String,
    /// USD price per whole token.
    pub price_usd: Decimal,
}

/// Detected cross-network opportunity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbitrageOpportunity {
    /// Stable identifier: `{symbol}-{source}-{target}`, lowercase.
    pub id: String,
    /// Token symbol.
    pub token_symbol: String,
    /// Network to buy on.
    pub source_network: Network,
    /// Network to sell on.
    pub target_network: Network,
    /// Token address on the source network.
    pub source_token_address: String,
    /// Token address on the target network.
    pub target_token_address: String,
    /// USD price on the source network.
    pub source_price_usd: Decimal,
    /// USD price on the target network.
    pub target_price_usd: Decimal,
    /// (target - source) / source * 100.
    pub price_difference_percent: Decimal,
    /// Trade size in the token's smallest unit.
    #[serde(with = "crate::utils::u128_string")]
    pub trade_size: u128,
    /// Trade size in whole tokens.
    pub trade_size_tokens: Decimal,
    /// Trade size valued at the source price.
    pub trade_size_usd: Decimal,
    /// trade_size_usd * price_difference_percent / 100.
    pub estimated_gross_profit_usd: Decimal,
    /// Estimated gas across both networks.
    pub estimated_gas_cost_usd: Decimal,
    /// Estimated bridge fee.
    pub estimated_bridge_cost_usd: Decimal,
    /// gross - gas - bridge.
    pub net_profit_usd: Decimal,
    /// net_profit_usd / trade_size_usd * 100.
    pub net_profit_percent: Decimal,
    /// When the opportunity was computed.
    #[serde(with = "time::serde::rfc3339")]
    pub detected_at: OffsetDateTime,
}

impl ArbitrageOpportunity {
    /// True when the estimated net profit is positive.
    pub fn is_profitable(&self) -> bool {
        self.net_profit_usd > Decimal::ZERO
    }
}

/// Build the opportunity id for a route.
pub fn opportunity_id(symbol: &str, source: Network, target: Network) -> String {
    format!("{}-{}-{}", symbol, source, target).to_lowercase()
}

/// Scale `max_trade_size` whole tokens to the token's smallest unit.
///
/// Returns the truncated whole-token size and the integer amount.
pub fn trade_size_for(max_trade_size: Decimal, decimals: u8) -> Option<(Decimal, u128)> {
    let decimals = u32::from(decimals);
    let tokens = max_trade_size.round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
    let scale = (0..decimals).try_fold(Decimal::ONE, |acc, _| acc.checked_mul(Decimal::TEN))?;
    let units = tokens.checked_mul(scale)?.trunc().to_u128()?;
    Some((tokens, units))
}

/// Calculate an opportunity for buying on `source` and selling on `target`.
///
/// Returns `None` when the target is not strictly pricier, the source price is
/// not positive, or the trade size or its USD value cannot be represented.
pub fn calculate_opportunity(
    token: &TrackedToken,
    source: &PricePoint,
    target: &PricePoint,
    max_trade_size: Decimal,
    gas_cost_usd: Decimal,
    bridge_cost_usd: Decimal,
) -> Option<ArbitrageOpportunity> {
    if source.network == target.network || source.price_usd <= Decimal::ZERO {
        return None;
    }

    let price_difference_percent = target
        .price_usd
        .checked_sub(source.price_usd)?
        .checked_div(source.price_usd)?
        .checked_mul(Decimal::ONE_HUNDRED)?;
    if price_difference_percent <= Decimal::ZERO {
        return None;
    }

    let (trade_size_tokens, trade_size) = trade_size_for(max_trade_size, token.decimals)?;
    if trade_size == 0 {
        return None;
    }

    // Tiny prices can underflow to zero at 28 decimal places.
    let trade_size_usd = trade_size_tokens.checked_mul(source.price_usd)?;
    if trade_size_usd.is_zero() {
        return None;
    }
    let estimated_gross_profit_usd = trade_size_usd
        .checked_mul(price_difference_percent)?
        .checked_div(Decimal::ONE_HUNDRED)?;
    let net_profit_usd = estimated_gross_profit_usd
        .checked_sub(gas_cost_usd)?
        .checked_sub(bridge_cost_usd)?;
    let net_profit_percent = net_profit_usd
        .checked_div(trade_size_usd)?
        .checked_mul(Decimal::ONE_HUNDRED)?;

    Some(ArbitrageOpportunity {
        id: opportunity_id(&token.symbol, source.network, target.network),
        token_symbol: token.symbol.clone(),
        source_network: source.network,
        target_network: target.network,
        source_token_address: source.address.clone(),
        target_token_address: target.address.clone(),
        source_price_usd: source.price_usd,
        target_price_usd: target.price_usd,
        price_difference_percent,
        trade_size,
        trade_size_tokens,
        trade_size_usd,
        estimated_gross_profit_usd,
        estimated_gas_cost_usd: gas_cost_usd,
        estimated_bridge_cost_usd: bridge_cost_usd,
        net_profit_usd,
        net_profit_percent,
        detected_at: OffsetDateTime::now_utc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn usdc() -> TrackedToken {
        TrackedToken::new("USDC", 6)
            .with_address(Network::Arbitrum, "0xaaa")
            .with_address(Network::Base, "0xbbb")
    }

    fn point(network: Network, address: &str, price: Decimal) -> PricePoint {
        PricePoint {
            network,
            address: address.to_string(),
            price_usd: price,
        }
    }

    #[test]
    fn two_percent_divergence_nets_one_percent() {
        let opp = calculate_opportunity(
            &usdc(),
            &point(Network::Arbitrum, "0xaaa", dec!(1.00)),
            &point(Network::Base, "0xbbb", dec!(1.02)),
            dec!(1000),
            dec!(5),
            dec!(5),
        )
        .unwrap();

        assert_eq!(opp.id, "usdc-arbitrum-base");
        assert_eq!(opp.price_difference_percent, dec!(2));
        assert_eq!(opp.trade_size, 1_000_000_000);
        assert_eq!(opp.trade_size_usd, dec!(1000));
        assert_eq!(opp.estimated_gross_profit_usd, dec!(20));
        assert_eq!(opp.net_profit_usd, dec!(10));
        assert_eq!(opp.net_profit_percent, dec!(1));
        assert!(opp.is_profitable());
    }

    #[test]
    fn net_figures_are_consistent() {
        let opp = calculate_opportunity(
            &usdc(),
            &point(Network::Arbitrum, "0xaaa", dec!(0.997)),
            &point(Network::Base, "0xbbb", dec!(1.004)),
            dec!(250.5),
            dec!(1.37),
            dec!(3),
        )
        .unwrap();

        assert_eq!(
            opp.net_profit_usd,
            opp.estimated_gross_profit_usd - opp.estimated_gas_cost_usd - opp.estimated_bridge_cost_usd
        );
        assert_eq!(
            opp.net_profit_percent,
            opp.net_profit_usd / opp.trade_size_usd * Decimal::ONE_HUNDRED
        );
    }

    #[test]
    fn cheaper_or_equal_target_is_rejected() {
        let token = usdc();
        let a = point(Network::Arbitrum, "0xaaa", dec!(1.00));
        let same = point(Network::Base, "0xbbb", dec!(1.00));
        let lower = point(Network::Base, "0xbbb", dec!(0.99));

        assert!(calculate_opportunity(&token, &a, &same, dec!(1000), dec!(0), dec!(0)).is_none());
        assert!(calculate_opportunity(&token, &a, &lower, dec!(1000), dec!(0), dec!(0)).is_none());
    }

    #[test]
    fn zero_source_price_is_rejected() {
        let opp = calculate_opportunity(
            &usdc(),
            &point(Network::Arbitrum, "0xaaa", dec!(0)),
            &point(Network::Base, "0xbbb", dec!(1)),
            dec!(1000),
            dec!(0),
            dec!(0),
        );
        assert!(opp.is_none());
    }

    #[test]
    fn unprofitable_opportunities_are_still_returned() {
        let opp = calculate_opportunity(
            &usdc(),
            &point(Network::Arbitrum, "0xaaa", dec!(1.00)),
            &point(Network::Base, "0xbbb", dec!(1.001)),
            dec!(1000),
            dec!(5),
            dec!(5),
        )
        .unwrap();

        assert_eq!(opp.net_profit_usd, dec!(-9));
        assert!(!opp.is_profitable());
    }

    #[test]
    fn trade_size_truncates_to_token_precision() {
        assert_eq!(trade_size_for(dec!(1000), 6), Some((dec!(1000), 1_000_000_000)));
        assert_eq!(trade_size_for(dec!(1.2345678), 2), Some((dec!(1.23), 123)));
        assert_eq!(
            trade_size_for(dec!(1000), 18),
            Some((dec!(1000), 1_000_000_000_000_000_000_000))
        );
    }

    #[test]
    fn gas_cost_uses_fee_rates_and_native_price() {
        let model = CostModel::new(dec!(10))
            .with_native_price(Network::Arbitrum, dec!(1000))
            .with_native_price(Network::Base, dec!(1000));

        // 10 gwei * 250k gas = 0.0025 native; 12.5 gwei * 200k gas = 0.0025 native.
        let cost = model
            .gas_cost_usd(Network::Arbitrum, 10_000_000_000, Network::Base, 12_500_000_000)
            .unwrap();
        assert_eq!(cost, dec!(5));
    }

    #[test]
    fn bridge_cost_falls_back_for_unknown_routes() {
        let model = CostModel::new(dec!(10)).with_bridge_cost(Network::Arbitrum, Network::Base, dec!(5));

        assert_eq!(model.bridge_cost_usd(Network::Arbitrum, Network::Base), dec!(5));
        assert_eq!(model.bridge_cost_usd(Network::Ethereum, Network::Arbitrum), dec!(15));
        assert_eq!(model.bridge_cost_usd(Network::Avalanche, Network::Bsc), dec!(10));
    }

    #[test]
    fn dust_trade_value_is_rejected() {
        let tiny = dec!(0.000000000000000000000000001);
        let result = calculate_opportunity(
            &usdc(),
            &point(Network::Arbitrum, "0xaaa", tiny),
            &point(Network::Base, "0xbbb", tiny * dec!(2)),
            dec!(0.000001),
            dec!(0),
            dec!(0),
        );
        assert!(result.is_none());
    }
}
