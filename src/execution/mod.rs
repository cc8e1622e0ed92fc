//! Execution paths for a chosen opportunity.
//!
//! This module handles:
//! - The external trading agent (primary path)
//! - The bridge relay (fallback path)
//! - Dry-run stand-ins for both

pub mod bridge;
pub mod delegate;
pub mod simulated;

pub use bridge::{BridgeReceipt, BridgeService, HttpBridge, TransferStatus};
pub use delegate::{
    ActionReceipt, DelegateAction, ExecutionDelegate, HttpDelegateClient, Strategy, TokenPair,
};
pub use simulated::{DryRunPriceSource, SimulatedBridge, SimulatedDelegate};
