//! End-to-end scan and execution tests.
//!
//! A real finder and orchestrator run against the in-memory collaborators
//! from `crosschain_arb::mock`, so no network access is needed.

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rust_decimal_macros::dec;
use tokio_test::{assert_err, assert_ok};

use crosschain_arb::arbitrage::{
    Collaborators, CostModel, ExecutionOutcome, OpportunityFinder, Orchestrator, OrchestratorSettings, Phase,
    TickOutcome,
};
use crosschain_arb::error::ExecutionError;
use crosschain_arb::execution::ExecutionDelegate;
use crosschain_arb::mock::{MockBridge, MockDelegate, MockNetworkProvider, MockPriceSource};
use crosschain_arb::network::{Network, TrackedToken};
use crosschain_arb::pricing::RateLimiter;

const USDC_ARB: &str = "0xaf88d065e77c8cc2239327c5edb3a432268e5831";
const USDC_BASE: &str = "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913";
const USDC_OP: &str = "0x0b2c639c533813f4aa9d7837caf62653d097ff85";

struct Bot {
    orchestrator: Arc<Orchestrator>,
    prices: Arc<MockPriceSource>,
    provider: Arc<MockNetworkProvider>,
    delegate: Arc<MockDelegate>,
    bridge: Arc<MockBridge>,
}

fn usdc() -> TrackedToken {
    TrackedToken::new("USDC", 6)
        .with_address(Network::Arbitrum, USDC_ARB)
        .with_address(Network::Base, USDC_BASE)
        .with_address(Network::Optimism, USDC_OP)
}

/// Arbitrum at $1.00, Base at $1.02, gas $5 and bridge $5 on a $1,000 trade.
fn bot(networks: Vec<Network>, with_delegate: bool) -> Bot {
    let prices = Arc::new(MockPriceSource::new());
    prices.set_price(Network::Arbitrum, USDC_ARB, dec!(1.00));
    prices.set_price(Network::Base, USDC_BASE, dec!(1.02));
    prices.set_price(Network::Optimism, USDC_OP, dec!(1.00));

    let provider = Arc::new(MockNetworkProvider::new());
    provider.set_fee_rate(Network::Arbitrum, 10_000_000_000);
    provider.set_fee_rate(Network::Base, 12_500_000_000);
    provider.set_fee_rate(Network::Optimism, 10_000_000_000);

    let costs = CostModel::new(dec!(10))
        .with_native_price(Network::Arbitrum, dec!(1000))
        .with_native_price(Network::Base, dec!(1000))
        .with_native_price(Network::Optimism, dec!(1000))
        .with_bridge_cost(Network::Arbitrum, Network::Base, dec!(5))
        .with_bridge_cost(Network::Optimism, Network::Base, dec!(5));

    let tokens = vec![usdc()];
    let finder = Arc::new(OpportunityFinder::new(
        prices.clone(),
        provider.clone(),
        Arc::new(RateLimiter::unlimited()),
        tokens.clone(),
        networks.clone(),
        costs,
        dec!(1000),
    ));

    let delegate = Arc::new(MockDelegate::new());
    let bridge = Arc::new(MockBridge::new());

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            finder,
            prices: prices.clone(),
            delegate: with_delegate.then(|| delegate.clone() as Arc<dyn ExecutionDelegate>),
            bridge: bridge.clone(),
        },
        tokens,
        networks,
        OrchestratorSettings::default(),
    ));

    Bot {
        orchestrator,
        prices,
        provider,
        delegate,
        bridge,
    }
}

fn two_networks() -> Vec<Network> {
    vec![Network::Arbitrum, Network::Base]
}

#[tokio::test]
async fn scan_ranks_the_two_percent_divergence() {
    let bot = bot(two_networks(), true);

    let opportunities = assert_ok!(bot.orchestrator.scan().await);

    assert_eq!(opportunities.len(), 1);
    let opp = &opportunities[0];
    assert_eq!(opp.id, "usdc-arbitrum-base");
    assert_eq!(opp.source_network, Network::Arbitrum);
    assert_eq!(opp.target_network, Network::Base);
    assert_eq!(opp.trade_size, 1_000_000_000);
    assert_eq!(opp.estimated_gross_profit_usd, dec!(20));
    assert_eq!(opp.net_profit_usd, dec!(10));
    assert_eq!(opp.net_profit_percent, dec!(1));
    assert_eq!(
        opp.net_profit_usd,
        opp.estimated_gross_profit_usd - opp.estimated_gas_cost_usd - opp.estimated_bridge_cost_usd
    );
}

#[tokio::test]
async fn identical_prices_produce_no_execution() {
    let bot = bot(two_networks(), true);
    bot.prices.set_price(Network::Base, USDC_BASE, dec!(1.00));
    bot.orchestrator.initialize().await;

    let outcome = bot.orchestrator.tick().await;

    assert!(matches!(outcome, TickOutcome::NoOpportunity));
    assert!(bot.delegate.actions().is_empty());
    assert!(bot.bridge.calls().is_empty());
}

#[tokio::test]
async fn failed_network_is_left_out_of_the_scan() {
    let bot = bot(vec![Network::Arbitrum, Network::Base, Network::Optimism], true);
    bot.prices.fail_network(Network::Arbitrum);

    let opportunities = assert_ok!(bot.orchestrator.scan().await);

    assert!(opportunities
        .iter()
        .all(|o| o.source_network != Network::Arbitrum && o.target_network != Network::Arbitrum));
    assert_eq!(opportunities.len(), 1);
    assert_eq!(opportunities[0].id, "usdc-optimism-base");
    assert!(!bot.provider.fee_calls().contains(&Network::Arbitrum));
}

#[tokio::test]
async fn tick_delegates_the_best_opportunity() {
    let bot = bot(two_networks(), true);
    bot.orchestrator.initialize().await;

    let outcome = bot.orchestrator.tick().await;

    match outcome {
        TickOutcome::Executed {
            opportunity_id,
            outcome: ExecutionOutcome::Delegated { agent_id, .. },
        } => {
            assert_eq!(opportunity_id, "usdc-arbitrum-base");
            assert_eq!(agent_id, "crosschain-arb-agent");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(bot.delegate.actions().len(), 1);
    assert!(bot.bridge.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn concurrent_ticks_execute_once() {
    let bot = bot(two_networks(), true);
    bot.orchestrator.initialize().await;
    bot.delegate.set_latency(Duration::from_secs(30));

    let ticks = (0..5).map(|_| bot.orchestrator.tick());
    let outcomes = futures::future::join_all(ticks).await;

    let executed = outcomes
        .iter()
        .filter(|o| matches!(o, TickOutcome::Executed { .. }))
        .count();
    let skipped = outcomes.iter().filter(|o| matches!(o, TickOutcome::Skipped)).count();

    assert_eq!(executed, 1);
    assert_eq!(skipped, 4);
    assert_eq!(bot.delegate.actions().len(), 1);
    assert_eq!(bot.orchestrator.guard().acquisitions(), 1);
    assert_eq!(bot.orchestrator.guard().releases(), 1);
    assert_eq!(bot.orchestrator.phase(), Phase::Idle);
}

#[tokio::test]
async fn held_guard_blocks_every_tick() {
    let bot = bot(two_networks(), true);
    bot.orchestrator.initialize().await;
    let permit = bot.orchestrator.try_begin().unwrap();

    for _ in 0..3 {
        assert!(matches!(bot.orchestrator.tick().await, TickOutcome::Skipped));
    }

    assert!(bot.delegate.actions().is_empty());
    assert!(bot.bridge.calls().is_empty());
    assert!(bot.prices.price_calls().is_empty());

    drop(permit);
    assert!(matches!(bot.orchestrator.tick().await, TickOutcome::Executed { .. }));
}

#[tokio::test]
async fn delegate_failure_falls_back_to_a_single_bridge() {
    let bot = bot(two_networks(), true);
    bot.orchestrator.initialize().await;
    bot.delegate.fail_execute(true);

    let outcome = bot.orchestrator.tick().await;

    assert!(matches!(
        outcome,
        TickOutcome::Executed {
            outcome: ExecutionOutcome::Bridged { delegate_error: Some(_), .. },
            ..
        }
    ));
    let calls = bot.bridge.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].source, Network::Arbitrum);
    assert_eq!(calls[0].target, Network::Base);
    assert_eq!(calls[0].token_address, USDC_ARB);
    assert_eq!(calls[0].amount, 1_000_000_000);
    assert_eq!(bot.orchestrator.stats().executions_bridged, 1);
}

#[tokio::test]
async fn bridge_failure_releases_the_guard_once() {
    let bot = bot(two_networks(), true);
    bot.orchestrator.initialize().await;
    bot.delegate.fail_execute(true);
    bot.bridge.fail(true);

    let outcome = bot.orchestrator.tick().await;

    assert!(matches!(
        outcome,
        TickOutcome::ExecutionFailed { error: ExecutionError::Bridge(_), .. }
    ));
    let guard = bot.orchestrator.guard();
    assert!(!guard.is_executing());
    assert_eq!(guard.releases(), 1);

    // The next tick is free to run again.
    bot.bridge.fail(false);
    assert!(matches!(bot.orchestrator.tick().await, TickOutcome::Executed { .. }));
    assert_eq!(guard.releases(), 2);
}

#[tokio::test]
async fn registration_failure_runs_fallback_only() {
    let bot = bot(two_networks(), true);
    bot.delegate.fail_register(true);
    bot.orchestrator.initialize().await;

    let outcome = bot.orchestrator.tick().await;

    assert!(bot.orchestrator.agent_id().is_none());
    assert!(matches!(
        outcome,
        TickOutcome::Executed {
            outcome: ExecutionOutcome::Bridged { delegate_error: None, .. },
            ..
        }
    ));
    assert!(bot.delegate.actions().is_empty());
    assert_eq!(bot.bridge.calls().len(), 1);
}

#[tokio::test]
async fn no_delegate_configured_runs_fallback_only() {
    let bot = bot(two_networks(), false);
    bot.orchestrator.initialize().await;

    let outcome = bot.orchestrator.tick().await;

    assert_eq!(bot.delegate.registrations(), 0);
    assert!(matches!(
        outcome,
        TickOutcome::Executed { outcome: ExecutionOutcome::Bridged { .. }, .. }
    ));
    assert_eq!(bot.bridge.calls().len(), 1);
}

#[tokio::test]
async fn manual_execution_is_refused_while_a_tick_holds_the_guard() {
    let bot = bot(two_networks(), true);
    let opportunity = assert_ok!(bot.orchestrator.scan().await).remove(0);
    let _permit = bot.orchestrator.try_begin().unwrap();

    let err = assert_err!(bot.orchestrator.execute(opportunity).await);

    assert!(matches!(err, ExecutionError::Busy));
    assert!(bot.bridge.calls().is_empty());
}
