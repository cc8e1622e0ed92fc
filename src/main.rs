//! Cross-network arbitrage bot entry point.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crosschain_arb::api::{create_router, AppState};
use crosschain_arb::arbitrage::{Collaborators, CostModel, OpportunityFinder, Orchestrator, OrchestratorSettings};
use crosschain_arb::config::Config;
use crosschain_arb::execution::{
    BridgeService, DryRunPriceSource, ExecutionDelegate, HttpBridge, HttpDelegateClient, SimulatedBridge,
    SimulatedDelegate,
};
use crosschain_arb::metrics;
use crosschain_arb::network::{JsonRpcProvider, Network, NetworkProvider};
use crosschain_arb::pricing::{HttpPriceSource, PriceMonitor, PriceSource, RateLimiter};
use crosschain_arb::utils::shutdown_signal;

/// Cross-network arbitrage bot.
#[derive(Parser, Debug)]
#[command(name = "crosschain-arb")]
#[command(about = "Scans token prices across networks and executes the best divergence")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Run in dry-run mode (no funds moved).
    #[arg(long)]
    dry_run: Option<bool>,

    /// HTTP server port for the command surface.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scan loop, price monitor and HTTP server (default).
    Run {
        /// Run in dry-run mode (no funds moved).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for the command surface.
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the scan interval in seconds.
        #[arg(long)]
        scan_interval: Option<u64>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Run one scan and print the ranked opportunities.
    Scan {
        /// Override the maximum trade size in whole tokens.
        #[arg(long)]
        max_trade_size: Option<Decimal>,
    },

    /// Fetch prices once and print the cache.
    Prices,

    /// Broadcast a signed raw transaction.
    SubmitRaw {
        /// Target network.
        #[arg(long)]
        network: String,

        /// Hex-encoded signed transaction.
        #[arg(long)]
        tx: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("crosschain_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::Scan { max_trade_size }) => cmd_scan(max_trade_size).await,
        Some(Command::Prices) => cmd_prices().await,
        Some(Command::SubmitRaw { network, tx }) => cmd_submit_raw(&network, &tx).await,
        Some(Command::Run {
            dry_run,
            port,
            scan_interval,
        }) => cmd_run(dry_run, port, scan_interval).await,
        None => cmd_run(args.dry_run, args.port, None).await,
    }
}

fn load_config() -> anyhow::Result<Config> {
    Config::load_validated().context("failed to load configuration")
}

/// Price source for reads, plus the one used for swaps (simulated in dry-run).
fn price_sources(config: &Config) -> anyhow::Result<(Arc<dyn PriceSource>, Arc<dyn PriceSource>)> {
    let live: Arc<dyn PriceSource> = Arc::new(HttpPriceSource::new(
        config.price_api_url.clone(),
        config.price_api_key.clone(),
        config.http_timeout(),
    )?);

    let trading: Arc<dyn PriceSource> = if config.dry_run {
        Arc::new(DryRunPriceSource::new(Arc::clone(&live)))
    } else {
        Arc::clone(&live)
    };

    Ok((live, trading))
}

fn network_provider(config: &Config) -> anyhow::Result<Arc<dyn NetworkProvider>> {
    let endpoints = config.rpc_endpoints().map_err(|e| anyhow::anyhow!(e))?;
    Ok(Arc::new(JsonRpcProvider::new(endpoints, config.http_timeout())?))
}

fn build_finder(
    config: &Config,
    prices: Arc<dyn PriceSource>,
    limiter: Arc<RateLimiter>,
) -> anyhow::Result<OpportunityFinder> {
    Ok(OpportunityFinder::new(
        prices,
        network_provider(config)?,
        limiter,
        config.tracked_tokens().map_err(|e| anyhow::anyhow!(e))?,
        config.active_networks().map_err(|e| anyhow::anyhow!(e))?,
        CostModel::new(config.bridge_fallback_cost_usd),
        config.max_trade_size,
    ))
}

fn build_monitor(config: &Config, prices: Arc<dyn PriceSource>, limiter: Arc<RateLimiter>) -> anyhow::Result<PriceMonitor> {
    Ok(PriceMonitor::new(
        prices,
        limiter,
        config.tracked_tokens().map_err(|e| anyhow::anyhow!(e))?,
        config.active_networks().map_err(|e| anyhow::anyhow!(e))?,
        config.price_change_threshold_percent,
    ))
}

fn execution_paths(
    config: &Config,
) -> anyhow::Result<(Option<Arc<dyn ExecutionDelegate>>, Arc<dyn BridgeService>)> {
    if config.dry_run {
        let delegate: Arc<dyn ExecutionDelegate> = Arc::new(SimulatedDelegate::new());
        let bridge: Arc<dyn BridgeService> = Arc::new(SimulatedBridge::new());
        return Ok((Some(delegate), bridge));
    }

    let delegate: Option<Arc<dyn ExecutionDelegate>> = match &config.delegate_api_url {
        Some(url) => {
            let client: Arc<dyn ExecutionDelegate> = Arc::new(HttpDelegateClient::new(
                url.clone(),
                config.delegate_api_key.clone(),
                config.http_timeout(),
            )?);
            Some(client)
        }
        None => None,
    };

    let bridge: Arc<dyn BridgeService> = Arc::new(HttpBridge::new(
        config.bridge_api_url.clone(),
        config.http_timeout(),
        Duration::from_secs(config.bridge_confirmation_timeout_seconds),
        Duration::from_secs(config.bridge_poll_interval_seconds),
    )?);

    Ok((delegate, bridge))
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("CROSSCHAIN ARB - CONFIGURATION CHECK");
    println!("======================================================================");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    print!("Loading tracked tokens... ");
    let tokens = match config.tracked_tokens() {
        Ok(tokens) => {
            println!("OK");
            tokens
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Token list invalid"));
        }
    };

    let networks = config.active_networks().map_err(|e| anyhow::anyhow!(e))?;
    let endpoints = config.rpc_endpoints().map_err(|e| anyhow::anyhow!(e))?;

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Networks:");
    for network in &networks {
        println!(
            "    {:<10} chain {:<6} {}",
            network.to_string(),
            network.chain_id(),
            endpoints.get(network).map(String::as_str).unwrap_or("-")
        );
    }
    println!("  Tokens:");
    for token in &tokens {
        let on: Vec<String> = networks
            .iter()
            .filter(|n| token.address_on(**n).is_some())
            .map(|n| n.to_string())
            .collect();
        println!("    {:<6} decimals {:<2} on {}", token.symbol, token.decimals, on.join(", "));
    }
    println!("  Max Trade Size: {}", config.max_trade_size);
    println!("  Min Profit: {}%", config.min_profit_percent);
    println!("  Scan Interval: {}s", config.scan_interval_seconds);
    println!("  Monitor Interval: {}s", config.monitor_interval_seconds);
    println!("  Price API: {}", config.price_api_url);
    println!(
        "  Delegate API: {}",
        config.delegate_api_url.as_deref().unwrap_or("not set (fallback only)")
    );
    println!("  Bridge API: {}", config.bridge_api_url);
    println!("  Settle On Arrival: {}", config.settle_on_arrival);
    println!("  Dry Run: {}", config.dry_run);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Run one scan and print the ranked list.
async fn cmd_scan(max_trade_size: Option<Decimal>) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(size) = max_trade_size {
        config.max_trade_size = size;
    }

    let (prices, _) = price_sources(&config)?;
    let limiter = Arc::new(RateLimiter::new(config.price_request_delay()));
    let finder = build_finder(&config, prices, limiter)?;

    let report = finder.scan().await?;

    println!("======================================================================");
    println!("CROSSCHAIN ARB - SCAN");
    println!("======================================================================");
    for failure in &report.failures {
        println!("  skipped {}: {:?}", failure.network(), failure);
    }
    if report.opportunities.is_empty() {
        println!("No opportunities found.");
    }
    for (rank, opp) in report.opportunities.iter().enumerate() {
        println!(
            "{:>2}. {:<28} diff {:>8}%  gross ${:>9}  gas ${:>7}  bridge ${:>6}  net ${:>9} ({}%)",
            rank + 1,
            opp.id,
            opp.price_difference_percent.round_dp(4),
            opp.estimated_gross_profit_usd.round_dp(2),
            opp.estimated_gas_cost_usd.round_dp(2),
            opp.estimated_bridge_cost_usd.round_dp(2),
            opp.net_profit_usd.round_dp(2),
            opp.net_profit_percent.round_dp(4),
        );
    }
    println!("======================================================================");

    Ok(())
}

/// Refresh the price cache once and print it.
async fn cmd_prices() -> anyhow::Result<()> {
    let config = load_config()?;
    let (prices, _) = price_sources(&config)?;
    let limiter = Arc::new(RateLimiter::new(config.price_request_delay()));
    let monitor = build_monitor(&config, prices, limiter)?;

    let report = monitor.refresh().await;

    println!("======================================================================");
    println!("CROSSCHAIN ARB - PRICES");
    println!("======================================================================");
    for entry in monitor.all_prices() {
        println!("  {:<6} {:<10} ${}", entry.symbol, entry.network.to_string(), entry.price);
    }
    for failure in &report.failures {
        println!("  FAILED: {}", failure);
    }
    println!("======================================================================");

    Ok(())
}

/// Broadcast a signed transaction.
async fn cmd_submit_raw(network: &str, tx: &str) -> anyhow::Result<()> {
    let config = load_config()?;
    let network = Network::from_str(network).map_err(|_| anyhow::anyhow!("unknown network: {}", network))?;
    let bytes = hex::decode(tx.trim_start_matches("0x")).context("transaction is not valid hex")?;

    let provider = network_provider(&config)?;
    let receipt = provider.submit(network, &bytes).await?;

    println!("Submitted to {}: {}", receipt.network, receipt.tx_hash);
    Ok(())
}

/// Run the scan loop, the price monitor and the HTTP server.
async fn cmd_run(dry_run_override: Option<bool>, port_override: Option<u16>, scan_interval: Option<u64>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    if let Some(seconds) = scan_interval {
        config.scan_interval_seconds = seconds;
    }

    let config = config.validated().map_err(|e| {
        error!("{}", e);
        e
    })?;

    let networks = config.active_networks().map_err(|e| anyhow::anyhow!(e))?;
    let tokens = config.tracked_tokens().map_err(|e| anyhow::anyhow!(e))?;

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.dry_run { "DRY RUN" } else { "LIVE" });
    info!(
        networks = ?networks.iter().map(|n| n.to_string()).collect::<Vec<_>>(),
        tokens = tokens.len(),
        max_trade_size = %config.max_trade_size,
        "Scanning configuration"
    );

    if config.metrics_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus exporter")?;
        info!("Prometheus exporter listening on {}", addr);
        metrics::init_metrics();
    }

    let (live_prices, trading_prices) = price_sources(&config)?;
    let limiter = Arc::new(RateLimiter::new(config.price_request_delay()));
    let finder = Arc::new(build_finder(&config, Arc::clone(&live_prices), Arc::clone(&limiter))?);
    let monitor = Arc::new(build_monitor(&config, live_prices, limiter)?);
    let (delegate, bridge) = execution_paths(&config)?;

    let orchestrator = Arc::new(Orchestrator::new(
        Collaborators {
            finder,
            prices: trading_prices,
            delegate,
            bridge,
        },
        tokens,
        networks,
        OrchestratorSettings::from_config(&config),
    ));
    orchestrator.initialize().await;

    let app_state = AppState::new(Arc::clone(&orchestrator), Arc::clone(&monitor));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);
    let router = create_router(app_state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server_rx = shutdown_rx.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let mut rx = server_rx;
                // Sender dropped or flipped: stop either way.
                let _ = rx.wait_for(|stop| *stop).await;
            })
            .await
    });

    let monitor_handle = Arc::clone(&monitor).spawn(config.monitor_interval(), shutdown_rx.clone());
    let loop_handle = Arc::clone(&orchestrator).spawn(config.scan_interval(), shutdown_rx);
    app_state.set_ready(true);

    info!("========================================");
    info!("CROSSCHAIN ARBITRAGE BOT STARTED");
    info!("========================================");

    shutdown_signal().await;
    app_state.set_ready(false);
    let _ = shutdown_tx.send(true);

    if let Err(e) = loop_handle.await {
        error!(error = %e, "Arbitrage loop task failed");
    }
    // Manual executions run outside the loop.
    if orchestrator.guard().is_executing() {
        info!("Waiting for manual execution to finish");
        while orchestrator.guard().is_executing() {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
    if let Err(e) = monitor_handle.await {
        error!(error = %e, "Price monitor task failed");
    }
    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }

    let stats = orchestrator.stats();
    info!(
        scans = stats.scans,
        executions = stats.executions_started,
        delegated = stats.executions_delegated,
        bridged = stats.executions_bridged,
        failed = stats.executions_failed,
        skipped = stats.ticks_skipped,
        "Shutdown complete"
    );

    Ok(())
}
