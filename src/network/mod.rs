//! Networks, tracked tokens and the per-network RPC provider.

pub mod provider;
pub mod types;

pub use provider::{JsonRpcProvider, NetworkProvider, TxReceipt};
pub use types::{default_tracked_tokens, is_valid_address, Network, TrackedToken};
