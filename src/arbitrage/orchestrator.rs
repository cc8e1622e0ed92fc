//! Scheduling loop, opportunity selection and the delegate/bridge execution path.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use strum::Display;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use super::calculator::ArbitrageOpportunity;
use super::finder::OpportunitySource;
use super::guard::{ExecutionGuard, ExecutionPermit};
use crate::config::Config;
use crate::error::{ArbitrageError, ExecutionError};
use crate::execution::{BridgeReceipt, BridgeService, DelegateAction, ExecutionDelegate, Strategy};
use crate::metrics;
use crate::network::{Network, TrackedToken};
use crate::pricing::{PriceSource, SwapReceipt, SwapRequest};

const AGENT_DESCRIPTION: &str = "Cross-network arbitrage executor";

/// Tunables for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Name the agent is registered under.
    pub delegate_name: String,
    /// Minimum profit handed to the agent's strategy, in percent.
    pub min_profit_percent: Decimal,
    /// Maximum trade size handed to the agent's strategy, whole tokens.
    pub max_trade_size: Decimal,
    /// Swap bridged tokens into the settlement asset on arrival.
    pub settle_on_arrival: bool,
    /// Settlement asset symbol.
    pub settlement_symbol: String,
    /// Slippage tolerance for the settlement swap, in percent.
    pub slippage_percent: Decimal,
}

impl OrchestratorSettings {
    /// Settings taken from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            delegate_name: config.delegate_name.clone(),
            min_profit_percent: config.min_profit_percent,
            max_trade_size: config.max_trade_size,
            settle_on_arrival: config.settle_on_arrival,
            settlement_symbol: config.settlement_symbol.clone(),
            slippage_percent: config.slippage_percent,
        }
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// External services the orchestrator drives.
#[derive(Clone)]
pub struct Collaborators {
    /// Ranked opportunity source.
    pub finder: Arc<dyn OpportunitySource>,
    /// Quotes and settlement swaps.
    pub prices: Arc<dyn PriceSource>,
    /// Primary execution path. `None` runs fallback-only.
    pub delegate: Option<Arc<dyn ExecutionDelegate>>,
    /// Fallback execution path.
    pub bridge: Arc<dyn BridgeService>,
}

/// Coarse state reported on the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Phase {
    /// Waiting for the next tick.
    Idle,
    /// A scan is running.
    Scanning,
    /// An execution holds the guard.
    Executing,
}

/// How an execution completed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    /// The agent accepted the action.
    Delegated {
        /// Agent id.
        agent_id: String,
        /// Agent-side reference.
        reference: String,
    },
    /// The bridge fallback moved the tokens.
    Bridged {
        /// Why the delegate was not used, if it was tried.
        delegate_error: Option<String>,
        /// Confirmed transfer.
        receipt: BridgeReceipt,
        /// Settlement-asset amount quoted on the target before bridging.
        #[serde(with = "option_u128_string")]
        expected_proceeds: Option<u128>,
        /// Settlement swap, when enabled.
        settlement: Option<SwapReceipt>,
    },
}

/// What one scheduler tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// An execution was in flight.
    Skipped,
    /// The scan failed.
    ScanFailed(ArbitrageError),
    /// Nothing to execute.
    NoOpportunity,
    /// The best opportunity was executed.
    Executed {
        /// Opportunity executed.
        opportunity_id: String,
        /// Result.
        outcome: ExecutionOutcome,
    },
    /// The best opportunity failed on every path.
    ExecutionFailed {
        /// Opportunity attempted.
        opportunity_id: String,
        /// Final error.
        error: ExecutionError,
    },
}

/// Resolved request, built only once the guard is held.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Chosen opportunity.
    pub opportunity: ArbitrageOpportunity,
    /// Token address on the source network.
    pub source_token: String,
    /// Token address on the target network.
    pub target_token: String,
    /// Agent to delegate to, if one is registered.
    pub agent_id: Option<String>,
}

impl ExecutionRequest {
    fn action(&self) -> DelegateAction {
        DelegateAction::CrossChainArbitrage {
            source_network: self.opportunity.source_network,
            target_network: self.opportunity.target_network,
            source_token: self.source_token.clone(),
            target_token: self.target_token.clone(),
            amount: self.opportunity.trade_size,
        }
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrchestratorStats {
    /// Scans completed.
    pub scans: u64,
    /// Scans that returned an error.
    pub scan_failures: u64,
    /// Opportunities returned across all scans.
    pub opportunities_found: u64,
    /// Executions started.
    pub executions_started: u64,
    /// Executions completed by the delegate.
    pub executions_delegated: u64,
    /// Executions completed by the bridge fallback.
    pub executions_bridged: u64,
    /// Executions that failed.
    pub executions_failed: u64,
    /// Ticks skipped while busy.
    pub ticks_skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    scans: AtomicU64,
    scan_failures: AtomicU64,
    opportunities_found: AtomicU64,
    executions_started: AtomicU64,
    executions_delegated: AtomicU64,
    executions_bridged: AtomicU64,
    executions_failed: AtomicU64,
    ticks_skipped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            scans: self.scans.load(Ordering::Relaxed),
            scan_failures: self.scan_failures.load(Ordering::Relaxed),
            opportunities_found: self.opportunities_found.load(Ordering::Relaxed),
            executions_started: self.executions_started.load(Ordering::Relaxed),
            executions_delegated: self.executions_delegated.load(Ordering::Relaxed),
            executions_bridged: self.executions_bridged.load(Ordering::Relaxed),
            executions_failed: self.executions_failed.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Result of the most recent execution.
#[derive(Debug, Clone, Serialize)]
pub struct LastExecution {
    /// Opportunity executed.
    pub opportunity_id: String,
    /// `delegated`, `bridged` or `failed`.
    pub result: String,
    /// Error text for failures.
    pub error: Option<String>,
    /// Completion time.
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
}

/// Status snapshot for the command surface.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Whether the guard is held.
    pub executing: bool,
    /// Registered agent, if any.
    pub agent_id: Option<String>,
    /// Agent carrying out the in-flight execution.
    pub active_delegate: Option<String>,
    /// Completion time of the last scan.
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_scan_at: Option<OffsetDateTime>,
    /// Most recent execution.
    pub last_execution: Option<LastExecution>,
    /// Counters.
    pub stats: OrchestratorStats,
}

/// Drives scanning and execution.
pub struct Orchestrator {
    collaborators: Collaborators,
    tokens: Vec<TrackedToken>,
    networks: Vec<Network>,
    settings: OrchestratorSettings,
    guard: Arc<ExecutionGuard>,
    agent_id: RwLock<Option<String>>,
    scans_in_flight: AtomicUsize,
    latest: RwLock<Vec<ArbitrageOpportunity>>,
    last_scan_at: Mutex<Option<OffsetDateTime>>,
    last_execution: Mutex<Option<LastExecution>>,
    counters: Counters,
}

struct ScanMark<'a>(&'a AtomicUsize);

impl<'a> ScanMark<'a> {
    fn new(count: &'a AtomicUsize) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for ScanMark<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Orchestrator {
    /// Create an orchestrator with no registered agent.
    pub fn new(
        collaborators: Collaborators,
        tokens: Vec<TrackedToken>,
        networks: Vec<Network>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            collaborators,
            tokens,
            networks,
            settings,
            guard: Arc::new(ExecutionGuard::new()),
            agent_id: RwLock::new(None),
            scans_in_flight: AtomicUsize::new(0),
            latest: RwLock::new(Vec::new()),
            last_scan_at: Mutex::new(None),
            last_execution: Mutex::new(None),
            counters: Counters::default(),
        }
    }

    /// Register the agent and define its strategy. Any failure leaves the
    /// orchestrator in fallback-only mode.
    #[instrument(skip(self), fields(name = %self.settings.delegate_name))]
    pub async fn initialize(&self) {
        let Some(delegate) = &self.collaborators.delegate else {
            info!("No delegate configured, running in fallback-only mode");
            return;
        };

        let agent_id = match delegate
            .register(&self.settings.delegate_name, AGENT_DESCRIPTION)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Agent registration failed, running in fallback-only mode");
                return;
            }
        };

        let strategy = Strategy::for_tokens(
            &self.tokens,
            &self.networks,
            self.settings.min_profit_percent,
            self.settings.max_trade_size,
        );

        if let Err(e) = delegate.define_strategy(&agent_id, &strategy).await {
            warn!(agent_id = %agent_id, error = %e, "Strategy rejected, running in fallback-only mode");
            return;
        }

        info!(agent_id = %agent_id, pairs = strategy.token_pairs.len(), "Delegate ready");
        *self.agent_id.write().unwrap_or_else(PoisonError::into_inner) = Some(agent_id);
    }

    /// Registered agent, if any.
    pub fn agent_id(&self) -> Option<String> {
        self.agent_id.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// The execution guard.
    pub fn guard(&self) -> &Arc<ExecutionGuard> {
        &self.guard
    }

    /// Opportunities from the most recent successful scan.
    pub fn latest_opportunities(&self) -> Vec<ArbitrageOpportunity> {
        self.latest.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Look up an opportunity from the most recent scan.
    pub fn opportunity(&self, id: &str) -> Option<ArbitrageOpportunity> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> OrchestratorStats {
        self.counters.snapshot()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        if self.guard.is_executing() {
            Phase::Executing
        } else if self.scans_in_flight.load(Ordering::Acquire) > 0 {
            Phase::Scanning
        } else {
            Phase::Idle
        }
    }

    /// Status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase(),
            executing: self.guard.is_executing(),
            agent_id: self.agent_id(),
            active_delegate: self.guard.active_delegate(),
            last_scan_at: *self.last_scan_at.lock().unwrap_or_else(PoisonError::into_inner),
            last_execution: self
                .last_execution
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
            stats: self.stats(),
        }
    }

    /// Run the finder and cache the ranked list.
    pub async fn scan(&self) -> Result<Vec<ArbitrageOpportunity>, ArbitrageError> {
        let _mark = ScanMark::new(&self.scans_in_flight);

        match self.collaborators.finder.find_opportunities().await {
            Ok(opportunities) => {
                self.counters.scans.fetch_add(1, Ordering::Relaxed);
                self.counters
                    .opportunities_found
                    .fetch_add(opportunities.len() as u64, Ordering::Relaxed);
                *self.last_scan_at.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(OffsetDateTime::now_utc());
                *self.latest.write().unwrap_or_else(PoisonError::into_inner) = opportunities.clone();
                Ok(opportunities)
            }
            Err(e) => {
                self.counters.scan_failures.fetch_add(1, Ordering::Relaxed);
                metrics::inc_scans_failed();
                Err(e)
            }
        }
    }

    /// One scheduler tick: scan, pick the best opportunity, execute it.
    ///
    /// Returns immediately with `Skipped` while an execution is in flight.
    pub async fn tick(&self) -> TickOutcome {
        if self.guard.is_executing() {
            return self.skip_tick();
        }

        let opportunities = match self.scan().await {
            Ok(opportunities) => opportunities,
            Err(e) => {
                error!(error = %e, "Scan failed");
                return TickOutcome::ScanFailed(e);
            }
        };

        let Some(best) = opportunities.into_iter().next() else {
            debug!("No opportunities this tick");
            return TickOutcome::NoOpportunity;
        };

        let Some(permit) = self.try_begin() else {
            return self.skip_tick();
        };

        let opportunity_id = best.id.clone();
        match self.execute_with(permit, best).await {
            Ok(outcome) => TickOutcome::Executed {
                opportunity_id,
                outcome,
            },
            Err(error) => TickOutcome::ExecutionFailed {
                opportunity_id,
                error,
            },
        }
    }

    fn skip_tick(&self) -> TickOutcome {
        info!(
            active_delegate = ?self.guard.active_delegate(),
            "Execution in flight, skipping tick"
        );
        self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
        metrics::inc_ticks_skipped();
        TickOutcome::Skipped
    }

    /// Claim the execution guard.
    pub fn try_begin(&self) -> Option<ExecutionPermit> {
        self.guard.try_acquire()
    }

    /// Acquire the guard and execute `opportunity`.
    pub async fn execute(&self, opportunity: ArbitrageOpportunity) -> Result<ExecutionOutcome, ExecutionError> {
        let permit = self.try_begin().ok_or(ExecutionError::Busy)?;
        self.execute_with(permit, opportunity).await
    }

    /// Execute `opportunity` under an already-held permit. The permit is
    /// released when this returns.
    #[instrument(skip_all, fields(id = %opportunity.id))]
    pub async fn execute_with(
        &self,
        permit: ExecutionPermit,
        opportunity: ArbitrageOpportunity,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let _timer = metrics::timer_execution();
        self.counters.executions_started.fetch_add(1, Ordering::Relaxed);
        metrics::inc_executions_started();

        info!(
            token = %opportunity.token_symbol,
            source = %opportunity.source_network,
            target = %opportunity.target_network,
            amount = opportunity.trade_size,
            net_profit_usd = %opportunity.net_profit_usd.round_dp(2),
            net_profit_pct = %opportunity.net_profit_percent.round_dp(4),
            "Executing opportunity"
        );

        let request = ExecutionRequest {
            source_token: opportunity.source_token_address.clone(),
            target_token: opportunity.target_token_address.clone(),
            agent_id: self.agent_id(),
            opportunity,
        };

        let result = self.run(&permit, &request).await;
        self.record(&request.opportunity.id, &result);
        drop(permit);
        result
    }

    async fn run(
        &self,
        permit: &ExecutionPermit,
        request: &ExecutionRequest,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let delegate_error = match (&self.collaborators.delegate, &request.agent_id) {
            (Some(delegate), Some(agent_id)) => {
                permit.set_active_delegate(agent_id.clone());
                match delegate.execute(agent_id, &request.action()).await {
                    Ok(receipt) => {
                        info!(agent_id = %agent_id, reference = %receipt.reference, "Delegate executed action");
                        return Ok(ExecutionOutcome::Delegated {
                            agent_id: agent_id.clone(),
                            reference: receipt.reference,
                        });
                    }
                    Err(e) => {
                        warn!(agent_id = %agent_id, error = %e, "Delegate failed, falling back to bridge");
                        Some(e.to_string())
                    }
                }
            }
            _ => {
                debug!("No agent registered, using bridge fallback");
                None
            }
        };

        self.fallback(request, delegate_error).await
    }

    async fn fallback(
        &self,
        request: &ExecutionRequest,
        delegate_error: Option<String>,
    ) -> Result<ExecutionOutcome, ExecutionError> {
        let opp = &request.opportunity;
        let settlement_token = if self.is_settlement_asset(opp) {
            None
        } else {
            self.settlement_token(opp.target_network)
        };

        let expected_proceeds = match &settlement_token {
            Some(settle_address) => {
                let quote_request = SwapRequest {
                    from_token: request.target_token.clone(),
                    to_token: settle_address.clone(),
                    amount: opp.trade_size,
                };
                match self
                    .collaborators
                    .prices
                    .quote(opp.target_network, &quote_request)
                    .await
                {
                    Ok(quote) => {
                        info!(
                            network = %opp.target_network,
                            expected_out = quote.amount_out,
                            "Target quote for bridged amount"
                        );
                        Some(quote.amount_out)
                    }
                    Err(e) => {
                        warn!(network = %opp.target_network, error = %e, "Target quote unavailable");
                        None
                    }
                }
            }
            None => None,
        };

        let receipt = self
            .collaborators
            .bridge
            .bridge(
                opp.source_network,
                opp.target_network,
                &request.source_token,
                opp.trade_size,
            )
            .await
            .map_err(|e| {
                error!(
                    source = %opp.source_network,
                    target = %opp.target_network,
                    error = %e,
                    "Bridge fallback failed"
                );
                ExecutionError::Bridge(e)
            })?;

        info!(
            transfer_id = %receipt.transfer_id,
            destination_tx = ?receipt.destination_tx,
            "Bridge fallback completed"
        );

        let settlement = if self.settings.settle_on_arrival {
            self.settle(request, &receipt).await?
        } else {
            None
        };

        Ok(ExecutionOutcome::Bridged {
            delegate_error,
            receipt,
            expected_proceeds,
            settlement,
        })
    }

    async fn settle(
        &self,
        request: &ExecutionRequest,
        receipt: &BridgeReceipt,
    ) -> Result<Option<SwapReceipt>, ExecutionError> {
        let opp = &request.opportunity;
        if self.is_settlement_asset(opp) {
            debug!("Bridged token is the settlement asset, nothing to swap");
            return Ok(None);
        }

        let settle_address =
            self.settlement_token(opp.target_network)
                .ok_or_else(|| ExecutionError::MissingTokenAddress {
                    symbol: self.settings.settlement_symbol.clone(),
                    network: opp.target_network,
                })?;

        let swap_request = SwapRequest {
            from_token: request.target_token.clone(),
            to_token: settle_address,
            amount: receipt.amount,
        };

        let swap = self
            .collaborators
            .prices
            .swap(opp.target_network, &swap_request, self.settings.slippage_percent)
            .await
            .map_err(|e| {
                error!(network = %opp.target_network, error = %e, "Settlement swap failed");
                ExecutionError::Settlement(e)
            })?;

        info!(tx = %swap.tx_hash, amount_out = swap.amount_out, "Settlement swap completed");
        Ok(Some(swap))
    }

    fn is_settlement_asset(&self, opportunity: &ArbitrageOpportunity) -> bool {
        opportunity
            .token_symbol
            .eq_ignore_ascii_case(&self.settings.settlement_symbol)
    }

    /// Settlement asset address on `network`.
    fn settlement_token(&self, network: Network) -> Option<String> {
        self.tokens
            .iter()
            .find(|t| t.symbol.eq_ignore_ascii_case(&self.settings.settlement_symbol))
            .and_then(|t| t.address_on(network))
            .map(str::to_string)
    }

    fn record(&self, opportunity_id: &str, result: &Result<ExecutionOutcome, ExecutionError>) {
        let (label, error) = match result {
            Ok(ExecutionOutcome::Delegated { .. }) => {
                self.counters.executions_delegated.fetch_add(1, Ordering::Relaxed);
                metrics::inc_executions_delegated();
                ("delegated", None)
            }
            Ok(ExecutionOutcome::Bridged { .. }) => {
                self.counters.executions_bridged.fetch_add(1, Ordering::Relaxed);
                metrics::inc_executions_bridged();
                ("bridged", None)
            }
            Err(e) => {
                self.counters.executions_failed.fetch_add(1, Ordering::Relaxed);
                metrics::inc_executions_failed();
                ("failed", Some(e.to_string()))
            }
        };

        *self.last_execution.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastExecution {
            opportunity_id: opportunity_id.to_string(),
            result: label.to_string(),
            error,
            finished_at: OffsetDateTime::now_utc(),
        });
    }

    /// Tick on a fixed interval until `shutdown` flips to true.
    ///
    /// Every tick runs in its own task so a slow execution never delays the
    /// timer and a panicking tick never stops it. A tick is skipped while the
    /// previous scan is still running. On shutdown the loop waits for running
    /// ticks, so an execution in flight always finishes and releases the guard.
    pub fn spawn(self: Arc<Self>, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut ticks = JoinSet::new();
            info!(period_s = period.as_secs(), "Arbitrage loop started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        while let Some(done) = ticks.try_join_next() {
                            log_tick_join(done);
                        }

                        if self.scans_in_flight.load(Ordering::Acquire) > 0 {
                            info!("Previous scan still running, skipping tick");
                            self.counters.ticks_skipped.fetch_add(1, Ordering::Relaxed);
                            metrics::inc_ticks_skipped();
                        } else {
                            let orchestrator = Arc::clone(&self);
                            ticks.spawn(async move {
                                if let Err(panic) = AssertUnwindSafe(orchestrator.tick()).catch_unwind().await {
                                    error!(panic = %panic_message(&*panic), "Tick panicked");
                                }
                            });
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            if !ticks.is_empty() {
                info!(running = ticks.len(), "Waiting for running ticks to finish");
            }
            while let Some(done) = ticks.join_next().await {
                log_tick_join(done);
            }

            info!("Arbitrage loop stopped");
        })
    }
}

fn log_tick_join(done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!(error = %e, "Tick task failed");
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

mod option_u128_string {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }
}
