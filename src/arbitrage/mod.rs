//! Arbitrage module for detecting and executing cross-network opportunities.
//!
//! This module handles:
//! - Gas, bridge and profit calculations
//! - Scanning tracked tokens for price divergences
//! - The single-flight execution guard
//! - The scheduling loop with delegate-then-bridge execution

pub mod calculator;
pub mod finder;
pub mod guard;
pub mod orchestrator;

pub use calculator::{calculate_opportunity, opportunity_id, ArbitrageOpportunity, CostModel, PricePoint};
pub use finder::{NetworkPriceTable, OpportunityFinder, OpportunitySource, ScanFailure, ScanReport};
pub use guard::{ExecutionGuard, ExecutionPermit};
pub use orchestrator::{
    Collaborators, ExecutionOutcome, ExecutionRequest, LastExecution, Orchestrator, OrchestratorSettings,
    OrchestratorStats, Phase, StatusSnapshot, TickOutcome,
};
