//! Cross-network token arbitrage bot.
//!
//! The same token often trades at slightly different prices on different
//! networks. This library scans tracked tokens across networks, ranks the
//! divergences by estimated net profit after gas and bridging costs, and
//! executes the best one.
//!
//! # Execution
//!
//! ```text
//! USDC on Arbitrum:  $1.00
//! USDC on Base:      $1.02
//! ─────────────────────────
//! Gross on $1,000:   $20.00
//! Gas + bridge:     -$10.00
//! Net:               $10.00 (1%)
//! ```
//!
//! Each opportunity is first handed to an execution delegate. If the delegate
//! is unavailable or rejects the action, the trade falls back to a direct
//! bridge transfer. At most one execution is in flight at any time.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`network`]: Supported networks, tracked tokens and RPC access
//! - [`pricing`]: Price gateway client, rate limiting and the price cache
//! - [`arbitrage`]: Cost model, opportunity finder and orchestrator
//! - [`execution`]: Delegate and bridge clients plus dry-run stand-ins
//! - [`api`]: HTTP API for health, status and manual execution
//! - [`metrics`]: Prometheus metrics
//! - [`mock`]: In-memory collaborators for tests and local runs
//! - [`utils`]: Utility functions

pub mod api;
pub mod arbitrage;
pub mod config;
pub mod error;
pub mod execution;
pub mod metrics;
pub mod mock;
pub mod network;
pub mod pricing;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
